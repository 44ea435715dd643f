use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsipc_protocol::status::S_OK;
use dsipc_protocol::{send_success, IpcMessage};
use dsipc_server::{
    default_listen_path, DiagnosticsConfig, DiagnosticsServer, Handlers, ProfilerHandler,
    StaticConfig,
};
use dsipc_transport::{IpcStream, Transport};
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{server_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_command, print_event, print_ports, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = DiagnosticsConfig::from_source(&static_config(&args));
    let handlers = logging_handlers(format);
    let server = DiagnosticsServer::init_with_config(config, handlers)
        .map_err(|err| server_error("server init failed", err))?;
    if server.ports().is_empty() {
        return Err(CliError::new(FAILURE, "no diagnostic ports could be opened"));
    }
    print_ports(server.ports(), format);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running), Arc::clone(server.gate()))?;

    if !args.no_pause && server.gate().any_suspended_ports() {
        print_event("paused", "waiting for ResumeRuntime", format);
        server.pause_for_diagnostics_monitor();
        if running.load(Ordering::SeqCst) {
            print_event("resumed", "startup resumed by monitor", format);
        }
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down diagnostics server");
    server
        .shutdown()
        .map_err(|err| server_error("shutdown failed", err))?;
    Ok(SUCCESS)
}

fn static_config(args: &ServeArgs) -> StaticConfig {
    let default_port = if args.no_default_port {
        None
    } else {
        Some(args.default_port.clone().unwrap_or_else(default_listen_path))
    };
    StaticConfig {
        enable: parse_enable(&args.enable_diagnostics),
        ports: args.ports.clone().filter(|ports| !ports.trim().is_empty()),
        default_port_suspend: args.default_port_suspend,
        default_port,
    }
}

fn parse_enable(value: &str) -> bool {
    let value = value.trim();
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u32::from_str_radix(digits, 16).map_or(true, |parsed| parsed != 0)
}

/// Every command is printed and answered OK.
fn logging_handlers(format: OutputFormat) -> Handlers {
    let reply_ok = move |message: IpcMessage, mut stream: IpcStream| {
        print_command(message.header(), message.payload(), format);
        if let Err(err) = send_success(&mut stream, S_OK) {
            warn!(error = %err, "failed to reply");
        }
        let _ = stream.close();
    };
    Handlers::new(reply_ok, reply_ok)
        .with_dump(|command_id: u8, payload: &[u8]| {
            info!(command_id, payload_len = payload.len(), "dump requested");
            S_OK
        })
        .with_profiler(LoggingProfiler)
}

struct LoggingProfiler;

impl ProfilerHandler for LoggingProfiler {
    fn attach(&mut self, payload: &[u8]) -> u32 {
        info!(payload_len = payload.len(), "profiler attach requested");
        S_OK
    }

    fn startup(&mut self, payload: &[u8]) -> u32 {
        info!(payload_len = payload.len(), "startup profiler requested");
        S_OK
    }
}

fn install_ctrlc_handler(
    running: Arc<AtomicBool>,
    gate: Arc<dsipc_server::StartupGate>,
) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        gate.resume_all_ports();
        gate.signal_resume();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
