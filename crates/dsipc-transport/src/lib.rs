//! Local transports for the diagnostics IPC server.
//!
//! Provides the connected [`IpcStream`] shared by listening and reverse
//! ports, the [`Transport`] capability trait the codec is written against,
//! and a thin wrapper over the OS `poll` primitive:
//! - Unix domain sockets (Linux/macOS)
//! - Named pipes (Windows) are not implemented; the Unix modules are
//!   compiled out and [`TransportError::Unsupported`] is reserved for them.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod poll;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{IpcStream, Transport};

#[cfg(unix)]
pub use poll::{poll, PollEvent, PollHandle, PollSource, PollWaker};
#[cfg(unix)]
pub use uds::UnixDomainSocket;
