//! Data record encoding
//!
//! `[crc:4][timestamp:4][key_len:4][value_len:4][key][value]`

use crate::error::{CaskError, Result};

use super::{is_sentinel, read_u32, TOMBSTONE};

/// Fixed header size: CRC (4) + Timestamp (4) + KeyLen (4) + ValueLen (4)
pub const HEADER_SIZE: usize = 16;

/// Parsed fixed-size header of a data record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u32,
    pub timestamp: u32,
    pub key_len: u32,
    pub value_len: u32,
}

impl RecordHeader {
    /// Deletion marker: the key is real, no value bytes follow
    pub fn is_tombstone(&self) -> bool {
        self.value_len == TOMBSTONE
    }

    /// Zero-length structural no-op
    pub fn is_sentinel(&self) -> bool {
        is_sentinel(self.key_len, self.value_len)
    }

    /// Number of value bytes actually stored after the key
    pub fn stored_value_len(&self) -> u64 {
        if self.is_tombstone() {
            0
        } else {
            self.value_len as u64
        }
    }

    /// Bytes following the header (key + stored value)
    pub fn body_len(&self) -> u64 {
        self.key_len as u64 + self.stored_value_len()
    }

    /// Full on-disk length of the record
    pub fn record_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.body_len()
    }
}

/// A fully decoded and checksum-verified record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub timestamp: u32,
    pub key: Vec<u8>,
    /// `None` for tombstones
    pub value: Option<Vec<u8>>,
}

/// Encode a live record
pub fn encode_record(timestamp: u32, key: &[u8], value: &[u8]) -> Vec<u8> {
    encode_raw(timestamp, key, value.len() as u32, value)
}

/// Encode a deletion marker for `key`
pub fn encode_tombstone(timestamp: u32, key: &[u8]) -> Vec<u8> {
    encode_raw(timestamp, key, TOMBSTONE, &[])
}

fn encode_raw(timestamp: u32, key: &[u8], value_len_field: u32, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    buf.extend_from_slice(&[0u8; 4]); // checksum placeholder
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&value_len_field.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);

    let checksum = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// Parse the fixed header without verifying the checksum
pub fn decode_record_header(bytes: &[u8]) -> Result<RecordHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(CaskError::Format(format!(
            "Record header needs {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    Ok(RecordHeader {
        checksum: read_u32(bytes, 0),
        timestamp: read_u32(bytes, 4),
        key_len: read_u32(bytes, 8),
        value_len: read_u32(bytes, 12),
    })
}

/// Decode one complete record, verifying its checksum
///
/// `bytes` must hold exactly one record. The checksum is checked before the
/// length fields are trusted, so any damaged byte surfaces as `Checksum`.
pub fn decode_record(bytes: &[u8]) -> Result<DecodedRecord> {
    let header = decode_record_header(bytes)?;

    let actual = crc32fast::hash(&bytes[4..]);
    if actual != header.checksum {
        return Err(CaskError::Checksum {
            expected: header.checksum,
            actual,
        });
    }

    if header.record_len() != bytes.len() as u64 {
        return Err(CaskError::Format(format!(
            "Record declares {} bytes but buffer holds {}",
            header.record_len(),
            bytes.len()
        )));
    }

    let key_end = HEADER_SIZE + header.key_len as usize;
    let key = bytes[HEADER_SIZE..key_end].to_vec();
    let value = if header.is_tombstone() {
        None
    } else {
        Some(bytes[key_end..].to_vec())
    };

    Ok(DecodedRecord {
        timestamp: header.timestamp,
        key,
        value,
    })
}

/// Decode a record and return its value
pub fn decode_record_value(bytes: &[u8]) -> Result<Vec<u8>> {
    decode_record(bytes)?
        .value
        .ok_or_else(|| CaskError::Format("Tombstone record carries no value".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_varied_lengths() {
        let values: [&[u8]; 4] = [b"", b"v", b"hello world", &[0xAB; 4096]];
        for value in values {
            let buf = encode_record(1_700_000_000, b"key", value);
            assert_eq!(buf.len(), HEADER_SIZE + 3 + value.len());
            assert_eq!(decode_record_value(&buf).unwrap(), value);
        }
    }

    #[test]
    fn test_header_fields() {
        let buf = encode_record(42, b"abc", b"12345");
        let header = decode_record_header(&buf).unwrap();

        assert_eq!(header.timestamp, 42);
        assert_eq!(header.key_len, 3);
        assert_eq!(header.value_len, 5);
        assert_eq!(header.record_len(), buf.len() as u64);
        assert_eq!(header.checksum, crc32fast::hash(&buf[4..]));
    }

    #[test]
    fn test_every_flipped_byte_is_detected() {
        let buf = encode_record(7, b"key", b"value");
        for i in 0..buf.len() {
            let mut damaged = buf.clone();
            damaged[i] ^= 0x01;
            match decode_record(&damaged) {
                Err(CaskError::Checksum { .. }) => {}
                other => panic!("byte {} flipped, expected checksum error, got {:?}", i, other),
            }
        }
    }

    #[test]
    fn test_tombstone_layout() {
        let buf = encode_tombstone(9, b"gone");
        let header = decode_record_header(&buf).unwrap();

        assert!(header.is_tombstone());
        assert!(!header.is_sentinel());
        assert_eq!(buf.len(), HEADER_SIZE + 4);

        let record = decode_record(&buf).unwrap();
        assert_eq!(record.key, b"gone");
        assert_eq!(record.value, None);
        assert!(matches!(decode_record_value(&buf), Err(CaskError::Format(_))));
    }

    #[test]
    fn test_truncated_header() {
        let result = decode_record_header(&[0u8; 10]);
        assert!(matches!(result, Err(CaskError::Format(_))));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut buf = encode_record(1, b"k", b"v");
        buf.push(0);
        // CRC covers the extra byte, so the mismatch shows up first
        assert!(decode_record(&buf).is_err());
    }
}
