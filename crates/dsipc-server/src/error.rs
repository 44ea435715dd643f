/// Errors that can occur in diagnostics server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] dsipc_transport::TransportError),

    /// Protocol-level error.
    #[error("protocol error: {0}")]
    Protocol(#[from] dsipc_protocol::ProtocolError),

    /// A diagnostic port configuration could not be used.
    #[error("invalid diagnostic port configuration: {0}")]
    Config(String),

    /// The dispatch thread could not be started.
    #[error("failed to spawn diagnostics server thread: {0}")]
    ThreadSpawn(std::io::Error),

    /// A poll cycle ended with an errored handle and no ready stream.
    #[error("poll cycle produced no stream")]
    NoStream,

    /// The dispatch thread panicked before it could be joined.
    #[error("diagnostics server thread panicked")]
    ThreadPanicked,

    /// The server is shutting down.
    #[error("diagnostics server shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, ServerError>;
