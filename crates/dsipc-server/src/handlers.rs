//! Command-set handlers the dispatch loop routes to.
//!
//! EventPipe and Process handlers take ownership of the stream: they reply
//! and close it, or keep it open for streaming sessions. Dump and profiler
//! handlers only compute a status; the loop writes the reply.

use dsipc_protocol::status::E_NOTSUPPORTED;
use dsipc_protocol::{send_error, IpcMessage};
use dsipc_transport::{IpcStream, Transport};
use tracing::debug;

pub trait EventPipeHandler: Send {
    fn handle(&mut self, message: IpcMessage, stream: IpcStream);
}

/// Handles every Process command except ResumeRuntime.
pub trait ProcessHandler: Send {
    fn handle(&mut self, message: IpcMessage, stream: IpcStream);
}

impl<F> EventPipeHandler for F
where
    F: FnMut(IpcMessage, IpcStream) + Send,
{
    fn handle(&mut self, message: IpcMessage, stream: IpcStream) {
        self(message, stream)
    }
}

impl<F> ProcessHandler for F
where
    F: FnMut(IpcMessage, IpcStream) + Send,
{
    fn handle(&mut self, message: IpcMessage, stream: IpcStream) {
        self(message, stream)
    }
}

#[cfg(feature = "dump")]
pub trait DumpHandler: Send {
    /// Write a dump as requested by `payload`; returns a status code.
    fn generate_core_dump(&mut self, command_id: u8, payload: &[u8]) -> u32;
}

#[cfg(feature = "dump")]
impl<F> DumpHandler for F
where
    F: FnMut(u8, &[u8]) -> u32 + Send,
{
    fn generate_core_dump(&mut self, command_id: u8, payload: &[u8]) -> u32 {
        self(command_id, payload)
    }
}

#[cfg(feature = "profiler")]
pub trait ProfilerHandler: Send {
    /// Attach a profiler to the running process; returns a status code.
    fn attach(&mut self, payload: &[u8]) -> u32;

    /// Register a profiler to load during startup; returns a status code.
    fn startup(&mut self, payload: &[u8]) -> u32 {
        let _ = payload;
        E_NOTSUPPORTED
    }
}

/// Answers every command with `E_NOTSUPPORTED`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotSupported;

impl NotSupported {
    fn reject(message: &IpcMessage, mut stream: IpcStream) {
        debug!(
            command_set = message.header().command_set,
            command_id = message.header().command_id,
            "command not supported"
        );
        let _ = send_error(&mut stream, E_NOTSUPPORTED);
        let _ = stream.close();
    }
}

impl EventPipeHandler for NotSupported {
    fn handle(&mut self, message: IpcMessage, stream: IpcStream) {
        Self::reject(&message, stream);
    }
}

impl ProcessHandler for NotSupported {
    fn handle(&mut self, message: IpcMessage, stream: IpcStream) {
        Self::reject(&message, stream);
    }
}

/// The handler set a server dispatches to.
pub struct Handlers {
    pub(crate) eventpipe: Box<dyn EventPipeHandler>,
    pub(crate) process: Box<dyn ProcessHandler>,
    #[cfg(feature = "dump")]
    pub(crate) dump: Option<Box<dyn DumpHandler>>,
    #[cfg(feature = "profiler")]
    pub(crate) profiler: Option<Box<dyn ProfilerHandler>>,
}

impl Handlers {
    pub fn new(
        eventpipe: impl EventPipeHandler + 'static,
        process: impl ProcessHandler + 'static,
    ) -> Self {
        Self {
            eventpipe: Box::new(eventpipe),
            process: Box::new(process),
            #[cfg(feature = "dump")]
            dump: None,
            #[cfg(feature = "profiler")]
            profiler: None,
        }
    }

    #[cfg(feature = "dump")]
    pub fn with_dump(mut self, handler: impl DumpHandler + 'static) -> Self {
        self.dump = Some(Box::new(handler));
        self
    }

    #[cfg(feature = "profiler")]
    pub fn with_profiler(mut self, handler: impl ProfilerHandler + 'static) -> Self {
        self.profiler = Some(Box::new(handler));
        self
    }
}

impl Default for Handlers {
    fn default() -> Self {
        Self::new(NotSupported, NotSupported)
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Handlers");
        #[cfg(feature = "dump")]
        out.field("dump", &self.dump.is_some());
        #[cfg(feature = "profiler")]
        out.field("profiler", &self.profiler.is_some());
        out.finish_non_exhaustive()
    }
}
