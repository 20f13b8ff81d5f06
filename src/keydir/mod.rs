//! KeyDir Module
//!
//! In-memory index from key to the location of its newest value.
//!
//! ## Responsibilities
//! - Point lookups for the read path
//! - Unconditional installs for live writes (caller already serialized)
//! - Recency-checked installs for compaction rewrites
//! - Never persisted: rebuilt from hint files on every open
//!
//! ## Recency
//! Two entries for the same key are ordered by `(timestamp, file_id, value_offset)`,
//! all ascending; the greater one wins.

mod index;

use std::cmp::Ordering;

use crate::file::FileId;

pub use index::KeyDir;

/// Where the newest value of one key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexEntry {
    /// Data file holding the record
    pub file_id: FileId,
    /// Byte offset of the value inside the data file
    pub value_offset: u64,
    /// Length of the value in bytes
    pub value_len: u32,
    /// Seconds since the Unix epoch when the record was written
    pub timestamp: u32,
}

impl IndexEntry {
    /// Total order used to resolve two entries for the same key
    pub fn recency_cmp(&self, other: &IndexEntry) -> Ordering {
        (self.timestamp, self.file_id, self.value_offset).cmp(&(
            other.timestamp,
            other.file_id,
            other.value_offset,
        ))
    }

    /// True when `self` strictly supersedes `other`
    pub fn is_newer_than(&self, other: &IndexEntry) -> bool {
        self.recency_cmp(other) == Ordering::Greater
    }

    /// Same physical record (file and offset), regardless of timestamp
    pub fn same_location(&self, other: &IndexEntry) -> bool {
        self.file_id == other.file_id && self.value_offset == other.value_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: u32, file_id: FileId, value_offset: u64) -> IndexEntry {
        IndexEntry {
            file_id,
            value_offset,
            value_len: 1,
            timestamp,
        }
    }

    #[test]
    fn test_timestamp_dominates() {
        assert!(entry(2, 1, 0).is_newer_than(&entry(1, 9, 900)));
        assert!(!entry(1, 9, 900).is_newer_than(&entry(2, 1, 0)));
    }

    #[test]
    fn test_file_id_breaks_timestamp_tie() {
        assert!(entry(5, 3, 0).is_newer_than(&entry(5, 2, 500)));
    }

    #[test]
    fn test_offset_breaks_file_tie() {
        assert!(entry(5, 3, 40).is_newer_than(&entry(5, 3, 20)));
    }

    #[test]
    fn test_equal_is_not_newer() {
        let e = entry(5, 3, 40);
        assert!(!e.is_newer_than(&e));
        assert!(e.same_location(&entry(9, 3, 40)));
    }
}
