//! KeyDir implementation
//!
//! HashMap-based index with its own RwLock, independent of the engine lock.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::file::FileId;

use super::IndexEntry;

/// In-memory key index
///
/// ## Concurrency:
/// - `entries`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - All methods use `&self`; `compare_and_set` decides and writes under one guard
#[derive(Debug, Default)]
pub struct KeyDir {
    entries: RwLock<HashMap<Vec<u8>, IndexEntry>>,
}

impl KeyDir {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of the newest value of `key`
    pub fn lookup(&self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.read().get(key).copied()
    }

    /// Whether `key` is live
    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Forget `key`, returning its last entry
    pub fn delete(&self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.write().remove(key)
    }

    /// Unconditional overwrite
    pub fn put(&self, key: Vec<u8>, entry: IndexEntry) {
        self.entries.write().insert(key, entry);
    }

    /// Install `candidate` only if `key` is absent or `candidate` is newer
    ///
    /// Returns whether the index changed.
    pub fn compare_and_set(&self, key: &[u8], candidate: IndexEntry) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(current) if !candidate.is_newer_than(current) => false,
            Some(current) => {
                *current = candidate;
                true
            }
            None => {
                entries.insert(key.to_vec(), candidate);
                true
            }
        }
    }

    /// Point every entry in `old_id` at `new_id`; returns how many moved
    pub fn remap_file_id(&self, old_id: FileId, new_id: FileId) -> usize {
        let mut moved = 0;
        for entry in self.entries.write().values_mut() {
            if entry.file_id == old_id {
                entry.file_id = new_id;
                moved += 1;
            }
        }
        moved
    }

    /// Number of entries living in `file_id`
    pub fn count_in_file(&self, file_id: FileId) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.file_id == file_id)
            .count()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every live key
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.read().keys().cloned().collect()
    }
}
