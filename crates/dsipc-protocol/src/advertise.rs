//! The one-shot advertise frame sent on reverse connections.
//!
//! A runtime that dials out to a monitor identifies itself with this frame
//! before any header-framed traffic flows:
//! ```text
//! ┌─────────────┬──────────────────────┬──────────┬──────────┐
//! │ "ADVR_V1\0" │ cookie (16B, GUID LE)│ pid (8B) │ 0 (2B)   │
//! └─────────────┴──────────────────────┴──────────┴──────────┘
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use bytes::{Buf, BufMut};
use dsipc_transport::Transport;
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

pub const ADVERTISE_MAGIC: [u8; 8] = *b"ADVR_V1\0";
pub const ADVERTISE_SIZE: usize = 34;

/// Bound on the advertise write; a monitor that is not reading is treated
/// as a failed connect.
pub const ADVERTISE_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

static COOKIE: OnceLock<Uuid> = OnceLock::new();

/// Process-lifetime cookie, generated on first use.
pub fn advertise_cookie() -> Uuid {
    *COOKIE.get_or_init(Uuid::new_v4)
}

/// Advertise frame for this process.
pub fn build_advertise_frame() -> [u8; ADVERTISE_SIZE] {
    encode_advertise_frame(&advertise_cookie(), u64::from(std::process::id()))
}

/// Advertise frame for an explicit cookie and pid.
///
/// The cookie is written in GUID layout: `data1`, `data2` and `data3` are
/// each byte-swapped to little-endian, the trailing 8 bytes are copied.
pub fn encode_advertise_frame(cookie: &Uuid, pid: u64) -> [u8; ADVERTISE_SIZE] {
    let mut frame = [0u8; ADVERTISE_SIZE];
    let mut dst = &mut frame[..];
    dst.put_slice(&ADVERTISE_MAGIC);
    dst.put_slice(&cookie.to_bytes_le());
    dst.put_u64_le(pid);
    dst.put_u16_le(0);
    frame
}

/// Parsed advertise frame (monitor side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertiseFrame {
    pub cookie: Uuid,
    pub pid: u64,
}

/// Parse an advertise frame.
pub fn decode_advertise_frame(src: &[u8]) -> Result<AdvertiseFrame> {
    if src.len() < ADVERTISE_SIZE {
        return Err(ProtocolError::TruncatedHeader {
            got: src.len(),
            expected: ADVERTISE_SIZE,
        });
    }
    if src[..8] != ADVERTISE_MAGIC {
        return Err(ProtocolError::InvalidAdvertiseMagic);
    }

    let mut cursor = &src[8..ADVERTISE_SIZE];
    let mut cookie = [0u8; 16];
    cursor.copy_to_slice(&mut cookie);
    let pid = cursor.get_u64_le();

    Ok(AdvertiseFrame {
        cookie: Uuid::from_bytes_le(cookie),
        pid,
    })
}

/// Send this process's advertise frame with the bounded write timeout.
pub fn send_advertise<T: Transport + ?Sized>(transport: &mut T) -> Result<()> {
    let frame = build_advertise_frame();
    let written = transport.write_with_timeout(&frame, Some(ADVERTISE_WRITE_TIMEOUT))?;
    if written != ADVERTISE_SIZE {
        return Err(ProtocolError::ShortWrite {
            written,
            expected: ADVERTISE_SIZE,
        });
    }
    Ok(())
}

/// Read an advertise frame from a freshly accepted reverse connection.
pub fn read_advertise<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Option<Duration>,
) -> Result<AdvertiseFrame> {
    let mut raw = [0u8; ADVERTISE_SIZE];
    let got = transport.read_with_timeout(&mut raw, timeout)?;
    decode_advertise_frame(&raw[..got])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_always_34_bytes_with_magic_first() {
        let frame = build_advertise_frame();
        assert_eq!(frame.len(), ADVERTISE_SIZE);
        assert_eq!(&frame[..8], b"ADVR_V1\0");
        assert_eq!(&frame[32..], &[0, 0]);
    }

    #[test]
    fn cookie_is_stable_for_process_lifetime() {
        assert_eq!(advertise_cookie(), advertise_cookie());
        assert_eq!(build_advertise_frame(), build_advertise_frame());
    }

    #[test]
    fn cookie_fields_are_little_endian_per_field() {
        let cookie = Uuid::from_fields(
            0x0102_0304,
            0x0506,
            0x0708,
            &[0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10],
        );
        let frame = encode_advertise_frame(&cookie, 0x1122_3344_5566_7788);

        assert_eq!(&frame[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[12..14], &[0x06, 0x05]);
        assert_eq!(&frame[14..16], &[0x08, 0x07]);
        assert_eq!(
            &frame[16..24],
            &[0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10]
        );
        assert_eq!(
            &frame[24..32],
            &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn decode_recovers_cookie_and_pid() {
        let frame = build_advertise_frame();
        let parsed = decode_advertise_frame(&frame).unwrap();
        assert_eq!(parsed.cookie, advertise_cookie());
        assert_eq!(parsed.pid, u64::from(std::process::id()));
    }

    #[test]
    fn decode_rejects_bad_magic_and_short_input() {
        let mut frame = build_advertise_frame();
        frame[0] = b'X';
        assert!(matches!(
            decode_advertise_frame(&frame),
            Err(ProtocolError::InvalidAdvertiseMagic)
        ));
        assert!(matches!(
            decode_advertise_frame(&frame[..20]),
            Err(ProtocolError::TruncatedHeader { got: 20, .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn send_and_read_over_socket_pair() {
        let (mut left, mut right) = dsipc_transport::IpcStream::pair().unwrap();
        send_advertise(&mut left).unwrap();
        let parsed = read_advertise(&mut right, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(parsed.pid, u64::from(std::process::id()));
    }
}
