//! File Registry
//!
//! Frozen, read-only data files keyed by id.
//!
//! ## Responsibilities
//! - Hand out shared handles to frozen files for the read path
//! - Lazily reopen files that were never opened (or were evicted)
//! - Forget files retired by compaction

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

use super::{AppendFile, FileId};

/// Registry of frozen files
///
/// ## Concurrency:
/// - `files`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - Handles are `Arc`s: a reader that fetched a file keeps it open even if
///   compaction removes it from the map mid-read
pub struct FileRegistry {
    /// Directory the files live in (for lazy opens)
    dir: PathBuf,

    files: RwLock<HashMap<FileId, Arc<AppendFile>>>,
}

impl FileRegistry {
    /// Create an empty registry for files in `dir`
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Registered handle for `id`
    pub fn get(&self, id: FileId) -> Option<Arc<AppendFile>> {
        self.files.read().get(&id).cloned()
    }

    /// Registered handle for `id`, opening the data file from disk if needed
    ///
    /// Fails with `FileNotFound` when the file is gone from disk.
    pub fn get_or_open(&self, id: FileId) -> Result<Arc<AppendFile>> {
        if let Some(file) = self.get(id) {
            return Ok(file);
        }

        let opened = Arc::new(AppendFile::open_read_only(&self.dir, id)?);
        tracing::debug!(file_id = id, "Opened frozen data file");

        // Another reader may have raced us; keep whichever landed first
        let mut files = self.files.write();
        Ok(files.entry(id).or_insert(opened).clone())
    }

    /// Register a frozen file under `id`
    pub fn put(&self, id: FileId, file: Arc<AppendFile>) {
        self.files.write().insert(id, file);
    }

    /// Forget `id`; the handles close once the last in-flight reader drops them
    ///
    /// Returns whether the id was registered.
    pub fn remove_and_close(&self, id: FileId) -> bool {
        let removed = self.files.write().remove(&id);
        removed.is_some()
    }

    /// Registered ids, ascending
    pub fn ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.files.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Forget every file
    pub fn clear(&self) {
        self.files.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncStrategy;
    use crate::error::CaskError;
    use tempfile::TempDir;

    fn frozen_file(dir: &Path, id: FileId) -> Arc<AppendFile> {
        let mut file = AppendFile::create(dir, id, SyncStrategy::OnRotate).unwrap();
        file.write(b"k", b"v").unwrap();
        Arc::new(file.freeze().unwrap())
    }

    #[test]
    fn test_put_get_remove() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        assert!(registry.is_empty());

        registry.put(10, frozen_file(temp.path(), 10));
        registry.put(2, frozen_file(temp.path(), 2));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![2, 10]);
        assert_eq!(registry.get(10).unwrap().id(), 10);

        assert!(registry.remove_and_close(10));
        assert!(!registry.remove_and_close(10));
        assert!(registry.get(10).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_open_lazily_registers() {
        let temp = TempDir::new().unwrap();
        drop(frozen_file(temp.path(), 4));

        let registry = FileRegistry::new(temp.path());
        assert!(registry.get(4).is_none());

        let file = registry.get_or_open(4).unwrap();
        assert!(!file.is_writable());
        assert_eq!(registry.ids(), vec![4]);
    }

    #[test]
    fn test_get_or_open_missing() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        assert!(matches!(registry.get_or_open(9), Err(CaskError::FileNotFound(9))));
    }

    #[test]
    fn test_removed_handle_stays_readable() {
        let temp = TempDir::new().unwrap();
        let registry = FileRegistry::new(temp.path());
        registry.put(1, frozen_file(temp.path(), 1));

        let held = registry.get(1).unwrap();
        registry.remove_and_close(1);
        assert_eq!(held.read_value((16 + 1) as u64, 1).unwrap(), b"v");
    }
}
