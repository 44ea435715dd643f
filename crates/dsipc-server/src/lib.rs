//! In-process diagnostics IPC server.
//!
//! A background thread multiplexes every configured diagnostic port,
//! decodes one message per ready stream and routes it to the registered
//! command-set handlers. The embedding process may block its startup on
//! [`DiagnosticsServer::pause_for_diagnostics_monitor`] until a monitor
//! sends ResumeRuntime.
//!
//! ```no_run
//! use dsipc_server::{DiagnosticsServer, EnvConfig, Handlers};
//!
//! let server = DiagnosticsServer::init(&EnvConfig, Handlers::default())?;
//! server.pause_for_diagnostics_monitor();
//! // ... run ...
//! server.shutdown()?;
//! # Ok::<(), dsipc_server::ServerError>(())
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;

#[cfg(unix)]
pub mod dispatch;
#[cfg(unix)]
pub mod multiplexer;
#[cfg(unix)]
pub mod port;
#[cfg(unix)]
mod server;

pub use config::{
    default_listen_path, parse_port_list, ConfigSource, DiagnosticsConfig, EnvConfig, PortConfig,
    PortKind, StaticConfig, SuspendMode,
};
pub use error::{Result, ServerError};
pub use gate::StartupGate;
#[cfg(feature = "dump")]
pub use handlers::DumpHandler;
#[cfg(feature = "profiler")]
pub use handlers::ProfilerHandler;
pub use handlers::{EventPipeHandler, Handlers, NotSupported, ProcessHandler};

#[cfg(unix)]
pub use dispatch::InFlight;
#[cfg(unix)]
pub use multiplexer::{next_poll_timeout, ConnectedStream, PollBackoff, StreamFactory};
#[cfg(unix)]
pub use port::{DiagnosticPort, PortState};
#[cfg(unix)]
pub use server::DiagnosticsServer;
