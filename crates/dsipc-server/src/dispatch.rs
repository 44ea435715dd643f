//! Dispatch loop: pulls streams from the multiplexer, decodes one message
//! from each and routes it by command set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dsipc_protocol::command::process;
use dsipc_protocol::status::{E_BAD_ENCODING, E_UNKNOWN_COMMAND, E_UNKNOWN_MAGIC, S_OK};
use dsipc_protocol::{command_name, send_error, send_success, CommandSet, IpcMessage};
use dsipc_transport::{IpcStream, Transport};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::gate::StartupGate;
use crate::handlers::Handlers;
use crate::multiplexer::{ConnectedStream, StreamFactory};

/// Second handle on the stream the dispatch thread is serving.
///
/// Reads on a diagnostics stream have no deadline, so a silent client would
/// otherwise hold the dispatch thread past shutdown. Closing this handle
/// fails the blocked read.
#[derive(Debug, Default)]
pub struct InFlight {
    stream: Mutex<Option<IpcStream>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stream` as in flight. Once shutdown has been requested the
    /// stream is closed instead.
    fn track(&self, stream: &IpcStream, shutdown: &AtomicBool) {
        let mut handle = match stream.try_clone() {
            Ok(handle) => handle,
            Err(err) => {
                debug!(error = %err, "in-flight stream not tracked");
                return;
            }
        };
        let mut slot = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        if shutdown.load(Ordering::SeqCst) {
            let _ = handle.close();
            return;
        }
        *slot = Some(handle);
    }

    fn clear(&self) {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Close the in-flight stream, if any. Called after the shutdown flag
    /// is set.
    pub fn interrupt(&self) {
        let handle = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            debug!("closing in-flight diagnostics stream");
            let _ = handle.close();
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

pub struct Dispatcher {
    factory: StreamFactory,
    handlers: Handlers,
    gate: Arc<StartupGate>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

impl Dispatcher {
    pub fn new(
        factory: StreamFactory,
        handlers: Handlers,
        gate: Arc<StartupGate>,
        shutdown: Arc<AtomicBool>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            factory,
            handlers,
            gate,
            shutdown,
            in_flight,
        }
    }

    /// Serve until shutdown is requested, then close every port.
    pub fn run(mut self) {
        info!(ports = self.factory.ports().len(), "diagnostics server started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.factory.get_next_available_stream() {
                Ok(connected) => self.handle_connection(connected),
                Err(ServerError::ShuttingDown) => break,
                Err(ServerError::NoStream) => debug!("poll cycle produced no stream"),
                Err(err) => warn!(error = %err, "diagnostics server poll cycle failed"),
            }
        }
        self.factory.close_ports();
        info!("diagnostics server stopped");
    }

    /// Read and route one message. Failures only affect this stream.
    pub fn handle_connection(&mut self, connected: ConnectedStream) {
        self.in_flight.track(&connected.stream, &self.shutdown);
        self.route(connected);
        self.in_flight.clear();
    }

    fn route(&mut self, connected: ConnectedStream) {
        let ConnectedStream { port, mut stream } = connected;

        let message = match IpcMessage::read_from(&mut stream) {
            Ok(message) => message,
            Err(err) if self.shutdown.load(Ordering::SeqCst) => {
                debug!(port, error = %err, "diagnostics read ended by shutdown");
                let _ = stream.close();
                return;
            }
            Err(err) => {
                warn!(port, error = %err, "failed to decode diagnostics message");
                reply_and_close(&mut stream, Err(E_BAD_ENCODING));
                return;
            }
        };

        let header = *message.header();
        if !header.has_valid_magic() {
            warn!(port, magic = ?header.magic, "unknown diagnostics magic");
            reply_and_close(&mut stream, Err(E_UNKNOWN_MAGIC));
            return;
        }

        info!(
            port,
            command_set = header.command_set,
            command_id = header.command_id,
            command = command_name(header.command_set, header.command_id),
            payload_len = message.payload().len(),
            "diagnostics command received"
        );

        match header.command_set() {
            Some(CommandSet::EventPipe) => self.handlers.eventpipe.handle(message, stream),
            Some(CommandSet::Process) if header.command_id == process::RESUME_RUNTIME => {
                self.resume_runtime(port, stream)
            }
            Some(CommandSet::Process) => self.handlers.process.handle(message, stream),
            #[cfg(feature = "dump")]
            Some(CommandSet::Dump) if self.handlers.dump.is_some() => self.dump(&message, stream),
            #[cfg(feature = "profiler")]
            Some(CommandSet::Profiler) if self.handlers.profiler.is_some() => {
                self.profiler(&message, stream)
            }
            _ => {
                warn!(
                    command_set = header.command_set,
                    command_id = header.command_id,
                    "unknown diagnostics command"
                );
                reply_and_close(&mut stream, Err(E_UNKNOWN_COMMAND));
            }
        }
    }

    fn resume_runtime(&mut self, port: usize, mut stream: IpcStream) {
        self.gate.resume_port(port);
        if !self.gate.any_suspended_ports() {
            debug!(port, "last suspended port resumed, releasing startup");
            self.gate.signal_resume();
        }
        reply_and_close(&mut stream, Ok(()));
    }

    #[cfg(feature = "dump")]
    fn dump(&mut self, message: &IpcMessage, mut stream: IpcStream) {
        use dsipc_protocol::command::dump;

        let command_id = message.header().command_id;
        let status = match (command_id, self.handlers.dump.as_mut()) {
            (dump::GENERATE_CORE_DUMP..=dump::GENERATE_CORE_DUMP_3, Some(handler)) => {
                handler.generate_core_dump(command_id, message.payload())
            }
            _ => E_UNKNOWN_COMMAND,
        };
        reply_and_close(&mut stream, status_result(status));
    }

    #[cfg(feature = "profiler")]
    fn profiler(&mut self, message: &IpcMessage, mut stream: IpcStream) {
        use dsipc_protocol::command::profiler;
        use dsipc_protocol::status::{E_INVALIDARG, E_RUNTIME_UNINITIALIZED};

        let paused = self.gate.is_paused_in_startup();
        let status = match (message.header().command_id, self.handlers.profiler.as_mut()) {
            (profiler::ATTACH_PROFILER, _) if paused => E_RUNTIME_UNINITIALIZED,
            (profiler::ATTACH_PROFILER, Some(handler)) => handler.attach(message.payload()),
            (profiler::STARTUP_PROFILER, _) if !paused => E_INVALIDARG,
            (profiler::STARTUP_PROFILER, Some(handler)) => handler.startup(message.payload()),
            _ => E_UNKNOWN_COMMAND,
        };
        reply_and_close(&mut stream, status_result(status));
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("factory", &self.factory)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

#[cfg(any(feature = "dump", feature = "profiler"))]
fn status_result(status: u32) -> std::result::Result<(), u32> {
    if status == S_OK {
        Ok(())
    } else {
        Err(status)
    }
}

/// Send Server/OK or Server/Error, then close. A failed send is logged;
/// the stream is not written again.
fn reply_and_close<T: Transport + ?Sized>(stream: &mut T, outcome: std::result::Result<(), u32>) {
    let sent = match outcome {
        Ok(()) => send_success(stream, S_OK),
        Err(code) => send_error(stream, code),
    };
    if let Err(err) = sent {
        debug!(error = %err, "failed to send diagnostics reply");
    }
    let _ = stream.close();
}
