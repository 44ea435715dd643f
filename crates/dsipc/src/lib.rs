//! Diagnostics IPC transport for an in-process runtime diagnostics server.
//!
//! External tools (tracers, dump collectors, profiler attachers) talk to the
//! process over a local socket using a small binary protocol: a fixed
//! 20-byte header, a command set and id for routing, and a payload.
//!
//! # Crate Structure
//!
//! - [`transport`]: Local streams, Unix domain socket ports and readiness polling
//! - [`protocol`]: Header/message codec, advertise frame, command sets, status codes
//! - [`server`]: Port configuration, multiplexer, dispatch loop and startup gate (behind `server` feature)

/// Re-export transport types.
pub mod transport {
    pub use dsipc_transport::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use dsipc_protocol::*;
}

/// Re-export server types (requires `server` feature).
#[cfg(feature = "server")]
pub mod server {
    pub use dsipc_server::*;
}
