//! Primitive readers and writers for command payloads.
//!
//! Command handlers own their payload layouts; these helpers cover the
//! building blocks they share. Strings are a `u32` character count
//! (including the terminating NUL) followed by UTF-16LE code units; a count
//! of zero encodes an absent string.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// Sequential reader over a payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        self.require(1, field)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        self.require(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        self.require(8, field)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_guid(&mut self, field: &'static str) -> Result<Uuid> {
        self.require(16, field)?;
        let mut raw = [0u8; 16];
        self.buf.copy_to_slice(&mut raw);
        Ok(Uuid::from_bytes_le(raw))
    }

    /// Length-prefixed UTF-16 string; `None` when the count is zero.
    pub fn read_string(&mut self, field: &'static str) -> Result<Option<String>> {
        let chars = self.read_u32(field)? as usize;
        if chars == 0 {
            return Ok(None);
        }
        let byte_len = chars
            .checked_mul(2)
            .ok_or(ProtocolError::BadEncoding(field))?;
        self.require(byte_len, field)?;

        let mut units = Vec::with_capacity(chars);
        for _ in 0..chars {
            units.push(self.buf.get_u16_le());
        }
        if units.pop() != Some(0) {
            return Err(ProtocolError::BadEncoding(field));
        }
        String::from_utf16(&units)
            .map(Some)
            .map_err(|_| ProtocolError::BadEncoding(field))
    }

    /// Length-prefixed byte array.
    pub fn read_bytes(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let len = self.read_u32(field)? as usize;
        self.require(len, field)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn require(&self, len: usize, field: &'static str) -> Result<()> {
        if self.buf.len() < len {
            return Err(ProtocolError::BadEncoding(field));
        }
        Ok(())
    }
}

/// Builder for payloads in the same encoding [`PayloadReader`] consumes.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn put_guid(&mut self, value: &Uuid) -> &mut Self {
        self.buf.put_slice(&value.to_bytes_le());
        self
    }

    pub fn put_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            None => {
                self.buf.put_u32_le(0);
            }
            Some(text) => {
                let units: Vec<u16> = text.encode_utf16().collect();
                self.buf.put_u32_le(units.len() as u32 + 1);
                for unit in units {
                    self.buf.put_u16_le(unit);
                }
                self.buf.put_u16_le(0);
            }
        }
        self
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
