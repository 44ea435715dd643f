use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use dsipc_transport::Transport;
use tracing::trace;

use crate::codec::{decode_header, encode_header, IpcHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::command::{server, CommandSet};
use crate::error::{ProtocolError, Result};

/// A header plus its payload.
///
/// `header.size` always equals `HEADER_SIZE + payload.len()`; it is computed
/// on construction and validated on receipt, never copied from a peer as-is.
#[derive(Debug, Clone)]
pub struct IpcMessage {
    header: IpcHeader,
    payload: Bytes,
    /// Header and payload in one contiguous buffer, built on first send.
    buffer: Option<Bytes>,
}

impl IpcMessage {
    /// Build an outgoing message.
    pub fn new(command_set: u8, command_id: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let mut header = IpcHeader::new(command_set, command_id);
        header.size = (HEADER_SIZE + payload.len()) as u16;
        Ok(Self {
            header,
            payload,
            buffer: None,
        })
    }

    /// Server/OK reply whose payload is `code`.
    pub fn success(code: u32) -> Self {
        Self::status_reply(server::OK, code)
    }

    /// Server/Error reply whose payload is `code`.
    pub fn error(code: u32) -> Self {
        Self::status_reply(server::ERROR, code)
    }

    fn status_reply(response_id: u8, code: u32) -> Self {
        let mut header = IpcHeader::new(CommandSet::Server.into(), response_id);
        header.size = (HEADER_SIZE + 4) as u16;
        Self {
            header,
            payload: Bytes::copy_from_slice(&code.to_le_bytes()),
            buffer: None,
        }
    }

    pub fn header(&self) -> &IpcHeader {
        &self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total wire size (header + payload).
    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_flattened(&self) -> bool {
        self.buffer.is_some()
    }

    /// Concatenate header and payload into one buffer. Later calls return
    /// the buffer built by the first.
    pub fn flatten(&mut self) -> &Bytes {
        let header = &self.header;
        let payload = &self.payload;
        self.buffer.get_or_insert_with(|| {
            let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
            encode_header(header, &mut buf);
            buf.put_slice(payload);
            buf.freeze()
        })
    }

    /// Read one message: the header first, then exactly the declared payload.
    ///
    /// Both reads block without a timeout. Any short read discards the
    /// message.
    pub fn read_from<T: Transport + ?Sized>(transport: &mut T) -> Result<Self> {
        Self::read_from_with_timeout(transport, None)
    }

    /// Like [`read_from`](Self::read_from), with `timeout` bounding each of
    /// the header and payload reads. Used by clients awaiting a reply.
    pub fn read_from_with_timeout<T: Transport + ?Sized>(
        transport: &mut T,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        let got = transport.read_with_timeout(&mut raw, timeout)?;
        let header = decode_header(&raw[..got])?;

        let expected = header.payload_len();
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(expected)
            .map_err(|_| ProtocolError::Allocation(expected))?;
        payload.resize(expected, 0);

        if expected > 0 {
            let got = transport.read_with_timeout(&mut payload, timeout)?;
            if got != expected {
                return Err(ProtocolError::TruncatedPayload { got, expected });
            }
        }

        trace!(
            command_set = header.command_set,
            command_id = header.command_id,
            size = header.size,
            "decoded message"
        );

        Ok(Self {
            header,
            payload: Bytes::from(payload),
            buffer: None,
        })
    }

    /// Write the flattened message in one call with no timeout.
    pub fn send<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        let expected = self.size();
        let buffer = self.flatten().clone();
        let written = transport.write_with_timeout(&buffer, None)?;
        if written != expected {
            return Err(ProtocolError::ShortWrite { written, expected });
        }
        transport.flush_stream()?;
        Ok(())
    }
}

/// Read one message from `transport`.
pub fn decode_message<T: Transport + ?Sized>(transport: &mut T) -> Result<IpcMessage> {
    IpcMessage::read_from(transport)
}

/// Send a Server/OK reply carrying `code`.
pub fn send_success<T: Transport + ?Sized>(transport: &mut T, code: u32) -> Result<()> {
    IpcMessage::success(code).send(transport)
}

/// Send a Server/Error reply carrying `code`.
pub fn send_error<T: Transport + ?Sized>(transport: &mut T, code: u32) -> Result<()> {
    IpcMessage::error(code).send(transport)
}

/// A Server reply as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Server/OK with its raw payload (usually a `u32` status, sometimes more).
    Ok(Bytes),
    /// Server/Error with its status code.
    Error(u32),
}

impl Reply {
    /// Leading `u32` of an OK payload, if present.
    pub fn status(&self) -> Option<u32> {
        match self {
            Reply::Ok(payload) if payload.len() >= 4 => Some((&payload[..4]).get_u32_le()),
            Reply::Ok(_) => None,
            Reply::Error(code) => Some(*code),
        }
    }
}

/// Read a Server reply (client side).
pub fn read_reply<T: Transport + ?Sized>(transport: &mut T) -> Result<Reply> {
    read_reply_with_timeout(transport, None)
}

/// Read a Server reply, giving up after `timeout` per read.
pub fn read_reply_with_timeout<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Option<Duration>,
) -> Result<Reply> {
    let message = IpcMessage::read_from_with_timeout(transport, timeout)?;
    let header = *message.header();
    match (header.command_set(), header.command_id) {
        (Some(CommandSet::Server), server::OK) => Ok(Reply::Ok(message.into_payload())),
        (Some(CommandSet::Server), server::ERROR) => {
            let mut payload = message.into_payload();
            if payload.len() < 4 {
                return Err(ProtocolError::BadEncoding("error code"));
            }
            Ok(Reply::Error(payload.get_u32_le()))
        }
        _ => Err(ProtocolError::UnexpectedReply {
            command_set: header.command_set,
            command_id: header.command_id,
        }),
    }
}
