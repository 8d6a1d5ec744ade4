//! On-disk record layout.
//!
//! Each record is `status u8 | key_len u16 | value_len u64 | key | value`,
//! little-endian, unaligned. A status byte outside {VALID, DELETED} marks
//! the end of the reconstructable log; zero-filled block padding reads as
//! exactly that.

use byteorder::{ByteOrder, LittleEndian};

use crate::errinput;
use crate::error::Result;

/// Fixed header length: status, key length, value length.
pub const HEADER_SIZE: usize = 11;

/// Keys are bounded by the u16 key-length field.
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// A live record.
pub const STATUS_VALID: u8 = 0x02;
/// A tombstoned record: it still occupies log space but is absent from the
/// index.
pub const STATUS_DELETED: u8 = 0x01;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub status: u8,
    pub key_len: u16,
    pub value_len: u64,
}

impl Header {
    /// Header for a new live record, validating the key bounds.
    pub fn valid(key: &[u8], value: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return errinput!("key must not be empty");
        }
        if key.len() > MAX_KEY_SIZE {
            return errinput!("key length {} exceeds {}", key.len(), MAX_KEY_SIZE);
        }
        Ok(Self {
            status: STATUS_VALID,
            key_len: key.len() as u16,
            value_len: value.len() as u64,
        })
    }

    /// True when the status byte marks a record rather than the log
    /// terminator.
    pub fn is_record(&self) -> bool {
        self.status == STATUS_VALID || self.status == STATUS_DELETED
    }

    /// Total on-disk length of the record this header describes.
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.key_len as u64 + self.value_len
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.status;
        LittleEndian::write_u16(&mut buf[1..3], self.key_len);
        LittleEndian::write_u64(&mut buf[3..11], self.value_len);
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            status: buf[0],
            key_len: LittleEndian::read_u16(&buf[1..3]),
            value_len: LittleEndian::read_u64(&buf[3..11]),
        }
    }
}
