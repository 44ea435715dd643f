use dsipc_transport::TransportError;

/// Errors that can occur while encoding, decoding, or exchanging messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer than a full header's worth of bytes arrived.
    #[error("truncated header ({got} of {expected} bytes)")]
    TruncatedHeader { got: usize, expected: usize },

    /// The header declares a total size smaller than the header itself.
    #[error("declared message size {0} is smaller than the header")]
    InvalidSize(u16),

    /// The peer stopped sending before the declared payload was complete.
    #[error("truncated payload ({got} of {expected} bytes)")]
    TruncatedPayload { got: usize, expected: usize },

    /// The payload does not fit in the 16-bit size field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload buffer could not be allocated.
    #[error("failed to allocate {0} byte payload buffer")]
    Allocation(usize),

    /// The transport accepted fewer bytes than the message holds.
    #[error("short write ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },

    /// The advertise frame does not start with `ADVR_V1\0`.
    #[error("invalid advertise magic")]
    InvalidAdvertiseMagic,

    /// A payload field could not be decoded.
    #[error("malformed payload field `{0}`")]
    BadEncoding(&'static str),

    /// A reply was expected but something else arrived.
    #[error("unexpected reply (command set {command_set:#04x}, id {command_id:#04x})")]
    UnexpectedReply { command_set: u8, command_id: u8 },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
