use bytes::{Buf, BufMut, BytesMut};

use crate::command::CommandSet;
use crate::error::{ProtocolError, Result};

/// Header: magic (14) + size (2) + command set (1) + command id (1) + reserved (2).
pub const HEADER_SIZE: usize = 20;

/// Magic bytes: "DOTNET_IPC_V1" plus a trailing NUL.
pub const MAGIC: [u8; 14] = *b"DOTNET_IPC_V1\0";

/// Largest representable message (header + payload).
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Largest payload that still fits the 16-bit size field.
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Fixed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHeader {
    pub magic: [u8; 14],
    /// Total bytes on the wire: header plus payload.
    pub size: u16,
    pub command_set: u8,
    pub command_id: u8,
    pub reserved: u16,
}

impl IpcHeader {
    /// Header for a message with an empty payload.
    pub fn new(command_set: u8, command_id: u8) -> Self {
        Self {
            magic: MAGIC,
            size: HEADER_SIZE as u16,
            command_set,
            command_id,
            reserved: 0,
        }
    }

    /// True if the magic matches [`MAGIC`] byte for byte.
    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Payload length implied by `size`.
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Typed command set, if the byte is a known one.
    pub fn command_set(&self) -> Option<CommandSet> {
        CommandSet::try_from(self.command_set).ok()
    }
}

/// Encode a header into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────┬─────────┬─────────┬──────────┐
/// │ Magic (14B)      │ Size     │ Cmd set │ Cmd id  │ Reserved │
/// │ "DOTNET_IPC_V1\0"│ (2B LE)  │ (1B)    │ (1B)    │ (2B, 0)  │
/// └──────────────────┴──────────┴─────────┴─────────┴──────────┘
/// ```
///
/// Multi-byte fields are written little-endian regardless of host order.
pub fn encode_header(header: &IpcHeader, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    dst.put_slice(&header.magic);
    dst.put_u16_le(header.size);
    dst.put_u8(header.command_set);
    dst.put_u8(header.command_id);
    dst.put_u16_le(0);
}

/// Decode a header from the first [`HEADER_SIZE`] bytes of `src`.
///
/// Fails on a short buffer or a `size` smaller than the header. The magic is
/// not checked here; the dispatcher answers a bad magic with its own error.
pub fn decode_header(src: &[u8]) -> Result<IpcHeader> {
    if src.len() < HEADER_SIZE {
        return Err(ProtocolError::TruncatedHeader {
            got: src.len(),
            expected: HEADER_SIZE,
        });
    }

    let mut cursor = &src[..HEADER_SIZE];
    let mut magic = [0u8; 14];
    cursor.copy_to_slice(&mut magic);
    let size = cursor.get_u16_le();
    let command_set = cursor.get_u8();
    let command_id = cursor.get_u8();
    let reserved = cursor.get_u16_le();

    if (size as usize) < HEADER_SIZE {
        return Err(ProtocolError::InvalidSize(size));
    }

    Ok(IpcHeader {
        magic,
        size,
        command_set,
        command_id,
        reserved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::process;

    #[test]
    fn test_encode_decode_roundtrip() {
        for (set, id) in [(0x01u8, 0x01u8), (0x02, 0x00), (0x04, 0x08), (0xFF, 0xFF)] {
            let header = IpcHeader::new(set, id);
            let mut buf = BytesMut::new();
            encode_header(&header, &mut buf);
            assert_eq!(buf.len(), HEADER_SIZE);
            assert_eq!(decode_header(&buf).unwrap(), header);
        }
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let mut header = IpcHeader::new(CommandSet::Process.into(), process::RESUME_RUNTIME);
        header.size = 0x0123;
        let mut buf = BytesMut::new();
        encode_header(&header, &mut buf);

        assert_eq!(&buf[..14], b"DOTNET_IPC_V1\0");
        assert_eq!(&buf[14..16], &[0x23, 0x01]);
        assert_eq!(buf[16], 0x04);
        assert_eq!(buf[17], 0x01);
        assert_eq!(&buf[18..20], &[0, 0]);
    }

    #[test]
    fn test_reserved_is_zero_on_send_and_kept_on_receive() {
        let mut header = IpcHeader::new(0x02, 0x01);
        header.reserved = 0xBEEF;
        let mut buf = BytesMut::new();
        encode_header(&header, &mut buf);
        assert_eq!(&buf[18..20], &[0, 0]);

        buf[18] = 0x34;
        buf[19] = 0x12;
        assert_eq!(decode_header(&buf).unwrap().reserved, 0x1234);
    }

    #[test]
    fn test_decode_truncated_header() {
        let err = decode_header(&MAGIC).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedHeader {
                got: 14,
                expected: HEADER_SIZE
            }
        ));
    }

    #[test]
    fn test_decode_size_smaller_than_header() {
        let mut header = IpcHeader::new(0x02, 0x01);
        header.size = (HEADER_SIZE - 1) as u16;
        let mut buf = BytesMut::new();
        encode_header(&header, &mut buf);

        let err = decode_header(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSize(19)));
    }

    #[test]
    fn test_bad_magic_still_decodes() {
        let mut buf = BytesMut::new();
        encode_header(&IpcHeader::new(0x02, 0x01), &mut buf);
        buf[0] = b'X';

        let header = decode_header(&buf).unwrap();
        assert!(!header.has_valid_magic());
    }

    #[test]
    fn test_payload_len_and_command_set() {
        let mut header = IpcHeader::new(CommandSet::EventPipe.into(), 0x02);
        header.size = (HEADER_SIZE + 12) as u16;
        assert_eq!(header.payload_len(), 12);
        assert_eq!(header.command_set(), Some(CommandSet::EventPipe));

        let unknown = IpcHeader::new(0x42, 0);
        assert_eq!(unknown.command_set(), None);
    }
}
