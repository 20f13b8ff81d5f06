//! Hint record encoding
//!
//! `[timestamp:4][key_len:4][value_len:4][value_offset:8][key]`

use crate::error::{CaskError, Result};

use super::{is_sentinel, read_u32, read_u64, TOMBSTONE};

/// Fixed hint header size: Tstamp (4) + KeyLen (4) + ValueLen (4) + ValueOffset (8)
pub const HINT_HEADER_SIZE: usize = 20;

/// Parsed fixed-size header of a hint record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintHeader {
    pub timestamp: u32,
    pub key_len: u32,
    pub value_len: u32,
    pub value_offset: u64,
}

impl HintHeader {
    pub fn is_tombstone(&self) -> bool {
        self.value_len == TOMBSTONE
    }

    pub fn is_sentinel(&self) -> bool {
        is_sentinel(self.key_len, self.value_len)
    }
}

/// Encode a hint for the record of `key` whose value starts at `value_offset`
pub fn encode_hint(timestamp: u32, value_len: u32, value_offset: u64, key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HINT_HEADER_SIZE + key.len());
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&value_len.to_le_bytes());
    buf.extend_from_slice(&value_offset.to_le_bytes());
    buf.extend_from_slice(key);
    buf
}

/// Decode the fixed part of a hint record
pub fn decode_hint(bytes: &[u8]) -> Result<HintHeader> {
    if bytes.len() < HINT_HEADER_SIZE {
        return Err(CaskError::Format(format!(
            "Hint header needs {} bytes, got {}",
            HINT_HEADER_SIZE,
            bytes.len()
        )));
    }

    Ok(HintHeader {
        timestamp: read_u32(bytes, 0),
        key_len: read_u32(bytes, 4),
        value_len: read_u32(bytes, 8),
        value_offset: read_u64(bytes, 12),
    })
}
