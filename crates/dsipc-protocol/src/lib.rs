//! Wire codec for the diagnostics IPC protocol.
//!
//! Every message is a fixed 20-byte header followed by a payload:
//! - A 14-byte magic (`"DOTNET_IPC_V1\0"`) identifying the protocol version
//! - A 2-byte little-endian total size (header + payload)
//! - A command set and command id for routing
//! - 2 reserved bytes
//!
//! Reverse connections additionally open with a 34-byte advertise frame.

pub mod advertise;
pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod payload;
pub mod status;

pub use advertise::{
    advertise_cookie, build_advertise_frame, decode_advertise_frame, encode_advertise_frame,
    read_advertise, send_advertise, AdvertiseFrame, ADVERTISE_MAGIC, ADVERTISE_SIZE,
};
pub use codec::{decode_header, encode_header, IpcHeader, HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE};
pub use command::{command_name, command_set_name, CommandSet};
pub use error::{ProtocolError, Result};
pub use message::{
    decode_message, read_reply, read_reply_with_timeout, send_error, send_success, IpcMessage, Reply,
};
pub use payload::{PayloadReader, PayloadWriter};
