//! Append File
//!
//! One data file paired with its hint file. Writes go to the logical end
//! tracked in memory; reads seek anywhere in the data file.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::codec::{self, HEADER_SIZE, TOMBSTONE};
use crate::config::SyncStrategy;
use crate::error::{CaskError, Result};
use crate::keydir::IndexEntry;

use super::{data_path, hint_path, FileId};

/// A data/hint file pair
///
/// ## Concurrency:
/// - Appends take `&mut self`; the engine only hands out `&mut` under its write lock
/// - Reads take `&self`; the data handle sits behind a Mutex because seeking moves
///   the shared cursor
pub struct AppendFile {
    id: FileId,
    data_path: PathBuf,
    hint_path: PathBuf,

    /// Data file handle (read + write while active, read-only when frozen)
    data: Mutex<File>,

    /// Hint file handle; `None` once frozen or when opened read-only
    hint: Option<File>,

    /// Logical end of the data file (bytes of complete records)
    offset: u64,

    /// Logical end of the hint file
    hint_offset: u64,

    sync_strategy: SyncStrategy,

    /// Set after a failed append; the engine rotates away from suspect files
    suspect: bool,
}

impl AppendFile {
    /// Create a brand-new, empty pair; fails if either file already exists
    pub fn create(dir: &Path, id: FileId, sync_strategy: SyncStrategy) -> Result<Self> {
        let data_path = data_path(dir, id);
        let hint_path = hint_path(dir, id);

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&data_path)?;
        let hint = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&hint_path)?;

        Ok(Self {
            id,
            data_path,
            hint_path,
            data: Mutex::new(data),
            hint: Some(hint),
            offset: 0,
            hint_offset: 0,
            sync_strategy,
            suspect: false,
        })
    }

    /// Reopen an existing pair for appending at its current end
    pub fn open_writable(dir: &Path, id: FileId, sync_strategy: SyncStrategy) -> Result<Self> {
        let data_path = data_path(dir, id);
        let hint_path = hint_path(dir, id);

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&data_path)?;
        let hint = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&hint_path)?;

        let offset = data.metadata()?.len();
        let hint_offset = hint.metadata()?.len();

        Ok(Self {
            id,
            data_path,
            hint_path,
            data: Mutex::new(data),
            hint: Some(hint),
            offset,
            hint_offset,
            sync_strategy,
            suspect: false,
        })
    }

    /// Open the data file of a frozen pair for reading only
    pub fn open_read_only(dir: &Path, id: FileId) -> Result<Self> {
        let data_path = data_path(dir, id);
        let data = File::open(&data_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CaskError::FileNotFound(id),
            _ => CaskError::Io(e),
        })?;
        let offset = data.metadata()?.len();

        Ok(Self {
            id,
            hint_path: hint_path(dir, id),
            data_path,
            data: Mutex::new(data),
            hint: None,
            offset,
            hint_offset: 0,
            sync_strategy: SyncStrategy::OnRotate,
            suspect: false,
        })
    }

    /// Append a live record and its hint, returning where the value landed
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<IndexEntry> {
        self.write_with_timestamp(codec::timestamp_now(), key, value)
    }

    /// Append a live record stamped with an explicit timestamp
    pub fn write_with_timestamp(
        &mut self,
        timestamp: u32,
        key: &[u8],
        value: &[u8],
    ) -> Result<IndexEntry> {
        let record = codec::encode_record(timestamp, key, value);
        let value_offset = self.offset + (HEADER_SIZE + key.len()) as u64;
        let value_len = value.len() as u32;
        let hint = codec::encode_hint(timestamp, value_len, value_offset, key);

        self.append(&record, &hint)?;

        Ok(IndexEntry {
            file_id: self.id,
            value_offset,
            value_len,
            timestamp,
        })
    }

    /// Append a tombstone for `key`
    pub fn mark_deleted(&mut self, key: &[u8]) -> Result<()> {
        let timestamp = codec::timestamp_now();
        let record = codec::encode_tombstone(timestamp, key);
        let value_offset = self.offset + (HEADER_SIZE + key.len()) as u64;
        let hint = codec::encode_hint(timestamp, TOMBSTONE, value_offset, key);

        self.append(&record, &hint)
    }

    /// Write a record/hint pair at the logical ends; both land or the write fails
    fn append(&mut self, record: &[u8], hint: &[u8]) -> Result<()> {
        let Some(hint_file) = self.hint.as_mut() else {
            return Err(CaskError::InvalidInput(format!(
                "Data file {} is frozen and cannot be appended to",
                self.id
            )));
        };
        let data_file = self.data.get_mut();

        let result = write_at(data_file, self.offset, record)
            .and_then(|_| write_at(hint_file, self.hint_offset, hint))
            .and_then(|_| match self.sync_strategy {
                SyncStrategy::EveryWrite => {
                    data_file.sync_data()?;
                    hint_file.sync_data()
                }
                SyncStrategy::OnRotate => Ok(()),
            });

        if let Err(e) = result {
            self.suspect = true;
            // Drop any partial tail so recovery never sees a torn record
            if let Err(trunc) = data_file.set_len(self.offset) {
                tracing::warn!(file_id = self.id, error = %trunc, "Failed to cut data file back");
            }
            if let Err(trunc) = hint_file.set_len(self.hint_offset) {
                tracing::warn!(file_id = self.id, error = %trunc, "Failed to cut hint file back");
            }
            tracing::error!(file_id = self.id, error = %e, "Append failed, file marked suspect");
            return Err(CaskError::Io(e));
        }

        self.offset += record.len() as u64;
        self.hint_offset += hint.len() as u64;
        Ok(())
    }

    /// Cut the data file back to `end`, dropping bytes no hint accounts for
    ///
    /// Returns how many bytes went away.
    pub fn truncate_data(&mut self, end: u64) -> Result<u64> {
        if end >= self.offset {
            return Ok(0);
        }
        let dropped = self.offset - end;
        self.data.get_mut().set_len(end)?;
        self.offset = end;
        Ok(dropped)
    }

    /// Swap the data handle for a read-only one so the next append fails
    #[cfg(test)]
    pub(crate) fn reopen_data_read_only(&mut self) -> Result<()> {
        self.data = Mutex::new(File::open(&self.data_path)?);
        Ok(())
    }

    /// Read `len` bytes of value starting at `offset`
    pub fn read_value(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.read_exact_at(offset, len as usize)
    }

    /// Read and verify the whole record behind `entry`, returning its value
    ///
    /// The index stores only the value range; the record start is recovered
    /// from the key length, which the caller knows.
    pub fn read_record(&self, key: &[u8], entry: &IndexEntry) -> Result<Vec<u8>> {
        let prefix = (HEADER_SIZE + key.len()) as u64;
        let start = entry.value_offset.checked_sub(prefix).ok_or_else(|| {
            CaskError::Format(format!(
                "Value offset {} in file {} is inside the record header",
                entry.value_offset, self.id
            ))
        })?;
        let len = prefix as usize + entry.value_len as usize;

        let buf = self.read_exact_at(start, len)?;
        let record = codec::decode_record(&buf)?;
        if record.key != key {
            return Err(CaskError::Format(format!(
                "Record at offset {} in file {} belongs to another key",
                start, self.id
            )));
        }
        record
            .value
            .ok_or_else(|| CaskError::Format("Index points at a tombstone".to_string()))
    }

    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.data.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// fsync both files (no-op for the hint of a read-only pair)
    pub fn sync(&mut self) -> Result<()> {
        self.data.get_mut().sync_all()?;
        if let Some(hint) = self.hint.as_mut() {
            hint.sync_all()?;
        }
        Ok(())
    }

    /// Sync and drop the hint handle; the pair becomes read-only
    pub fn freeze(mut self) -> Result<Self> {
        self.sync()?;
        self.hint = None;
        Ok(self)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> FileId {
        self.id
    }

    /// Bytes of complete records written so far
    pub fn size(&self) -> u64 {
        self.offset
    }

    pub fn is_writable(&self) -> bool {
        self.hint.is_some()
    }

    pub fn is_suspect(&self) -> bool {
        self.suspect
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn hint_path(&self) -> &Path {
        &self.hint_path
    }
}

fn write_at(file: &mut File, offset: u64, buf: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}
