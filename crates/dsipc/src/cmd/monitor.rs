use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsipc_protocol::command::process;
use dsipc_protocol::{read_advertise, read_reply_with_timeout, CommandSet, IpcMessage};
use dsipc_transport::{poll, IpcStream, PollEvent, PollHandle, PollSource, Transport, UnixDomainSocket};
use tracing::{debug, warn};

use crate::cmd::{parse_duration, MonitorArgs};
use crate::exit::{protocol_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_advertise, print_reply, OutputFormat};

/// How often the accept loop re-checks the Ctrl-C flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let listener =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let mut handled = 0usize;
    while running.load(Ordering::SeqCst) {
        if !wait_readable(&listener)? {
            continue;
        }
        let mut stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;

        match read_advertise(&mut stream, Some(timeout)) {
            Ok(frame) => print_advertise(&frame, format),
            Err(err) => {
                warn!(error = %err, "connection did not advertise, dropping");
                continue;
            }
        }

        if args.resume {
            resume(&mut stream, timeout, format)?;
        }
        let _ = stream.close();

        handled = handled.saturating_add(1);
        if args.count.is_some_and(|count| handled >= count) {
            break;
        }
    }

    Ok(SUCCESS)
}

fn wait_readable(listener: &UnixDomainSocket) -> CliResult<bool> {
    let mut handles = [PollHandle::new(PollSource::Listener(listener), 0)];
    poll(&mut handles, Some(ACCEPT_POLL_INTERVAL))
        .map_err(|err| transport_error("poll failed", err))?;
    Ok(handles[0].events == PollEvent::Signaled)
}

fn resume(stream: &mut IpcStream, timeout: Duration, format: OutputFormat) -> CliResult<()> {
    let command_set = CommandSet::Process.into();
    IpcMessage::new(command_set, process::RESUME_RUNTIME, Vec::new())
        .and_then(|mut message| message.send(&mut *stream))
        .map_err(|err| protocol_error("resume send failed", err))?;
    let reply = read_reply_with_timeout(stream, Some(timeout))
        .map_err(|err| protocol_error("resume reply failed", err))?;
    debug!(?reply, "resume acknowledged");
    print_reply(command_set, process::RESUME_RUNTIME, &reply, format);
    Ok(())
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
