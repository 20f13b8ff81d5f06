//! File Module
//!
//! Physical data/hint file pairs and the registry of frozen ones.
//!
//! ## Responsibilities
//! - Append records and hints at the logical end of the active pair
//! - Random-offset value reads for the get path
//! - Sequential scans of data files (compaction) and hint files (recovery)
//! - Track frozen, read-only files by id
//! - Name, discover and number files in the data directory
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── bitcask.lock
//!   ├── 1718000000000.data   ← frozen
//!   ├── 1718000000000.hint
//!   ├── 1718000052113.data   ← active (highest id)
//!   └── 1718000052113.hint
//! ```
//! Anything that is not `<decimal id>.data` / `<decimal id>.hint` is ignored.

mod append;
mod registry;
mod scan;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

pub use append::AppendFile;
pub use registry::FileRegistry;
pub use scan::{HintReader, HintRecord, RecordScanner, ScannedRecord};

/// Identifier of a data/hint pair; also its file stem
pub type FileId = u64;

/// Extension of data files
pub const DATA_EXT: &str = "data";

/// Extension of hint files
pub const HINT_EXT: &str = "hint";

/// Path of the data file for `id`
pub fn data_path(dir: &Path, id: FileId) -> PathBuf {
    dir.join(format!("{}.{}", id, DATA_EXT))
}

/// Path of the hint file for `id`
pub fn hint_path(dir: &Path, id: FileId) -> PathBuf {
    dir.join(format!("{}.{}", id, HINT_EXT))
}

/// Parse a file id from a name of the form `<digits>.<ext>`
/// "1718000000000.hint" → Some(1718000000000)
fn parse_file_id(path: &Path, ext: &str) -> Option<FileId> {
    if path.extension()?.to_str()? != ext {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Ids of every file with extension `ext` in `dir`, ascending
fn list_ids(dir: &Path, ext: &str) -> Result<Vec<FileId>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(id) = parse_file_id(&path, ext) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Ids of every hint file in `dir`, ascending
pub fn list_hint_ids(dir: &Path) -> Result<Vec<FileId>> {
    list_ids(dir, HINT_EXT)
}

/// Ids of every data file in `dir`, ascending
pub fn list_data_ids(dir: &Path) -> Result<Vec<FileId>> {
    list_ids(dir, DATA_EXT)
}

/// Hands out strictly increasing, time-derived file ids
///
/// Ids are milliseconds since the Unix epoch, bumped past the last id issued
/// so two rotations within one clock tick never collide.
#[derive(Debug)]
pub struct FileIdGenerator {
    last: AtomicU64,
}

impl FileIdGenerator {
    /// Start issuing ids greater than `floor` (the largest id already on disk)
    pub fn new(floor: FileId) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Next unused id
    pub fn next_id(&self) -> FileId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(current + 1);
            match self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => current = actual,
            }
        }
    }
}
