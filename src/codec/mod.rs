//! Codec Module
//!
//! Fixed-layout binary encoding for data records and hint records.
//!
//! ## Responsibilities
//! - Encode/decode data records with a CRC32 over everything after the checksum
//! - Encode/decode hint records (the compact per-file index used at startup)
//! - Define the tombstone and sentinel conventions shared by every layer
//!
//! ## Data Record Format
//! ```text
//! ┌───────────┬───────────┬──────────┬──────────┬───────┬─────────┐
//! │ CRC32 (4) │ Tstamp (4)│ KeyLen(4)│ ValLen(4)│  Key  │  Value  │
//! └───────────┴───────────┴──────────┴──────────┴───────┴─────────┘
//!              └────────────── covered by CRC32 ───────────────────┘
//! ```
//!
//! ## Hint Record Format
//! ```text
//! ┌───────────┬──────────┬──────────┬────────────────┬───────┐
//! │ Tstamp (4)│ KeyLen(4)│ ValLen(4)│ ValueOffset (8)│  Key  │
//! └───────────┴──────────┴──────────┴────────────────┴───────┘
//! ```
//!
//! All integers are little-endian. `ValLen == u32::MAX` marks a tombstone
//! (no value bytes follow). `KeyLen == 0 && ValLen == 0` is a structural
//! no-op and is skipped wherever records are replayed.

mod hint;
mod record;

use std::time::{SystemTime, UNIX_EPOCH};

pub use hint::{decode_hint, encode_hint, HintHeader, HINT_HEADER_SIZE};
pub use record::{
    decode_record, decode_record_header, decode_record_value, encode_record, encode_tombstone,
    DecodedRecord, RecordHeader, HEADER_SIZE,
};

/// Value length reserved for tombstones
pub const TOMBSTONE: u32 = u32::MAX;

/// Current wall-clock time in whole seconds, as stored in record headers
pub fn timestamp_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// True when a (key_len, value_len) pair is the zero-length sentinel
pub(crate) fn is_sentinel(key_len: u32, value_len: u32) -> bool {
    key_len == 0 && value_len == 0
}

/// Little-endian u32 at `pos`; callers have already bounds-checked `buf`
pub(crate) fn read_u32(buf: &[u8], pos: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(raw)
}

/// Little-endian u64 at `pos`; callers have already bounds-checked `buf`
pub(crate) fn read_u64(buf: &[u8], pos: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(raw)
}
