//! Engine Module
//!
//! The storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate the active file, the file registry and the key index
//! - Handle concurrent read/write access
//! - Rotate the active file when it outgrows the configured size
//! - Rebuild the index from hint files on startup
//! - Own the background compactor

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::codec;
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::file::{
    self, AppendFile, FileId, FileIdGenerator, FileRegistry, HintReader,
};
use crate::keydir::{IndexEntry, KeyDir};
use crate::lock::DirLock;
use crate::merge::{self, Compactor, MergePhase, MergeStats};

/// Attempts a read makes when the file it needs vanished underneath it
const READ_RETRIES: usize = 3;

/// Attempts to find an unused file id before giving up
const CREATE_RETRIES: usize = 16;

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/rotation/compaction rewrites): exclusive `writer` lock
///   - Only ONE mutation at a time; the active file's offset is never raced
///
/// - **Reads** (get): shared `writer` lock
///   - Unlimited concurrent readers; none observes a half-written record
///   - KeyDir and FileRegistry have their own internal locks, always taken
///     after the engine lock
pub struct Engine {
    inner: Arc<EngineInner>,

    /// Background compactor, `None` when merging is disabled or after close
    compactor: Option<Compactor>,

    closed: bool,
}

/// State shared between the engine handle and the compactor thread
pub(crate) struct EngineInner {
    /// Engine configuration
    config: Config,

    /// Data directory
    dir: PathBuf,

    /// Engine lock guarding the active file
    writer: RwLock<Writer>,

    /// Frozen files (internal RwLock)
    registry: FileRegistry,

    /// Key index (internal RwLock)
    keydir: KeyDir,

    /// Source of new file ids
    ids: FileIdGenerator,

    /// Serializes compaction cycles (background and manual)
    merge_guard: Mutex<()>,

    /// What the compactor is doing right now
    merge_phase: Mutex<MergePhase>,
}

/// Everything only a writer may touch
struct Writer {
    /// The single file accepting appends
    active: AppendFile,

    /// Directory lock; `None` once released by close
    dir_lock: Option<DirLock>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory and take its lock
    /// 2. Replay every hint file, oldest id first, into the key index
    /// 3. Reopen the newest file for appending (or create one)
    /// 4. Start the compactor if enabled
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let dir = config.data_dir.clone();

        let mut dir_lock = DirLock::acquire(&dir)?;

        let keydir = KeyDir::new();
        let hint_ids = file::list_hint_ids(&dir)?;
        let mut newest_end = 0;
        for &id in &hint_ids {
            newest_end = replay_hint_file(&dir, id, &keydir)?;
        }

        let data_ids = file::list_data_ids(&dir)?;
        let floor = hint_ids
            .last()
            .copied()
            .max(data_ids.last().copied())
            .unwrap_or(0);
        let ids = FileIdGenerator::new(floor);

        // A data file newer than every hint has no index to append against
        let active = match hint_ids.last() {
            Some(&id) if id == floor => {
                let mut file = AppendFile::open_writable(&dir, id, config.sync_strategy)?;
                // A crash mid-append leaves bytes past the last hint
                let dropped = file.truncate_data(newest_end)?;
                if dropped > 0 {
                    tracing::warn!(file_id = id, bytes = dropped, "Dropped torn tail of active file");
                }
                file
            }
            _ => create_file(&dir, &ids, &config)?,
        };
        dir_lock.record_active(active.id())?;

        tracing::info!(
            dir = %dir.display(),
            keys = keydir.len(),
            files = hint_ids.len(),
            active = active.id(),
            "Engine opened"
        );

        let inner = Arc::new(EngineInner {
            registry: FileRegistry::new(&dir),
            writer: RwLock::new(Writer {
                active,
                dir_lock: Some(dir_lock),
            }),
            keydir,
            ids,
            dir,
            merge_guard: Mutex::new(()),
            merge_phase: Mutex::new(MergePhase::Idle),
            config,
        });

        let compactor = if inner.config.merge_enabled {
            Some(Compactor::spawn(
                Arc::clone(&inner),
                inner.config.merge_interval,
            )?)
        } else {
            None
        };

        Ok(Self {
            inner,
            compactor,
            closed: false,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Get the newest value of `key`
    ///
    /// Fails with `KeyNotFound` if the key was never written or was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    /// Store `value` under `key`; visible to every `get` once this returns
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    /// Delete `key`; fails with `KeyNotFound` if it is not live
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    /// Run one compaction cycle now, on the calling thread
    pub fn merge(&self) -> Result<MergeStats> {
        merge::run_cycle(&self.inner, None)
    }

    /// fsync the active data/hint pair
    pub fn sync(&self) -> Result<()> {
        self.inner.writer.write().active.sync()
    }

    /// Close the engine gracefully
    ///
    /// Stops the compactor, syncs the active file and removes the lock file.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(compactor) = self.compactor.take() {
            compactor.stop();
        }

        let mut writer = self.inner.writer.write();
        let synced = writer.active.sync();
        let released = match writer.dir_lock.take() {
            Some(lock) => lock.release(),
            None => Ok(()),
        };
        self.inner.registry.clear();

        tracing::info!(dir = %self.inner.dir.display(), "Engine closed");
        synced.and(released)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Id of the file currently accepting appends
    pub fn active_file_id(&self) -> FileId {
        self.inner.active_file_id()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.inner.keydir.len()
    }

    /// Whether `key` is live (index only, no disk access)
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.inner.keydir.contains(key)
    }

    /// Snapshot of every live key, unordered
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.keydir.keys()
    }

    /// Ids of every data file on disk, ascending
    pub fn file_ids(&self) -> Result<Vec<FileId>> {
        file::list_data_ids(&self.inner.dir)
    }

    /// Current compactor phase
    pub fn merge_phase(&self) -> MergePhase {
        self.inner.merge_phase()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "Engine shutdown on drop failed");
        }
    }
}

impl EngineInner {
    pub(crate) fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let writer = self.writer.read();

        let mut missing = None;
        for _ in 0..READ_RETRIES {
            let entry = self.keydir.lookup(key).ok_or(CaskError::KeyNotFound)?;

            let result = if entry.file_id == writer.active.id() {
                writer.active.read_record(key, &entry)
            } else {
                self.registry
                    .get_or_open(entry.file_id)
                    .and_then(|file| file.read_record(key, &entry))
            };

            match result {
                Err(CaskError::FileNotFound(id)) => {
                    tracing::debug!(file_id = id, "Data file vanished during read, retrying");
                    missing = Some(id);
                }
                other => return other,
            }
        }

        Err(CaskError::FileNotFound(missing.unwrap_or_default()))
    }

    pub(crate) fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        if value.len() >= codec::TOMBSTONE as usize {
            return Err(CaskError::InvalidInput(format!(
                "Value of {} bytes exceeds the maximum of {}",
                value.len(),
                codec::TOMBSTONE - 1
            )));
        }

        let mut writer = self.writer.write();
        self.rotate_if_needed(&mut writer)?;

        let entry = writer.active.write(key, value)?;
        self.keydir.put(key.to_vec(), entry);
        Ok(())
    }

    pub(crate) fn delete(&self, key: &[u8]) -> Result<()> {
        let mut writer = self.writer.write();
        if !self.keydir.contains(key) {
            return Err(CaskError::KeyNotFound);
        }

        self.rotate_if_needed(&mut writer)?;
        writer.active.mark_deleted(key)?;
        self.keydir.delete(key);
        Ok(())
    }

    /// Move a live record into the active file on behalf of compaction
    ///
    /// Only rewrites when the index still points at `expected`; a key that was
    /// overwritten or deleted after the scan read it is left alone. Returns
    /// whether the record moved. The source file stays registered; the
    /// compactor evicts it once the whole file is done.
    pub(crate) fn put_rewrite(&self, key: &[u8], value: &[u8], expected: IndexEntry) -> Result<bool> {
        let mut writer = self.writer.write();
        match self.keydir.lookup(key) {
            Some(current) if current.same_location(&expected) => {}
            _ => return Ok(false),
        }

        self.rotate_if_needed(&mut writer)?;

        // Never let a clock step backwards make the copy look older than the original
        let timestamp = codec::timestamp_now().max(expected.timestamp);
        let entry = writer.active.write_with_timestamp(timestamp, key, value)?;
        if !self.keydir.compare_and_set(key, entry) {
            tracing::warn!(file_id = entry.file_id, "Rewritten record lost the recency check");
            return Ok(false);
        }
        Ok(true)
    }

    /// Drop the cached handle of a file the compactor has finished with
    pub(crate) fn evict_file(&self, id: FileId) {
        if self.registry.remove_and_close(id) {
            tracing::debug!(file_id = id, "Evicted merged file from registry");
        }
    }

    /// Delete fully compacted files, oldest first; returns how many went away
    ///
    /// Runs under the engine lock so no reader can be resolving a location
    /// inside a file while it disappears.
    pub(crate) fn retire_files(&self, ids: &[FileId]) -> Result<usize> {
        let mut writer = self.writer.write();
        // Rewritten copies must be durable before the originals go
        writer.active.sync()?;

        let mut ordered = ids.to_vec();
        ordered.sort_unstable();

        let mut retired = 0;
        for id in ordered {
            if id == writer.active.id() {
                continue;
            }
            // Newer files may hold tombstones shadowing this one, so stop here
            let live = self.keydir.count_in_file(id);
            if live > 0 {
                tracing::warn!(file_id = id, live, "File still owns live keys, stopping retirement");
                break;
            }

            self.registry.remove_and_close(id);
            remove_if_exists(&file::hint_path(&self.dir, id))?;
            remove_if_exists(&file::data_path(&self.dir, id))?;
            tracing::debug!(file_id = id, "Retired data file");
            retired += 1;
        }
        Ok(retired)
    }

    /// Rotate when the active file is full or suspect
    fn rotate_if_needed(&self, writer: &mut Writer) -> Result<()> {
        let active = &writer.active;
        if active.is_suspect() || active.size() > self.config.max_file_size {
            self.rotate(writer)?;
        }
        Ok(())
    }

    /// Freeze the active file into the registry and start a fresh one
    fn rotate(&self, writer: &mut Writer) -> Result<()> {
        let fresh = create_file(&self.dir, &self.ids, &self.config)?;
        let new_id = fresh.id();
        let old = std::mem::replace(&mut writer.active, fresh);
        let old_id = old.id();
        let old_size = old.size();

        if let Some(lock) = writer.dir_lock.as_mut() {
            lock.record_active(new_id)?;
        }

        // A failed freeze leaves the file on disk; reads reopen it lazily
        let frozen = old.freeze()?;
        self.registry.put(old_id, Arc::new(frozen));

        tracing::info!(from = old_id, to = new_id, bytes = old_size, "Rotated active file");
        Ok(())
    }

    pub(crate) fn active_file_id(&self) -> FileId {
        self.writer.read().active.id()
    }

    pub(crate) fn keydir(&self) -> &KeyDir {
        &self.keydir
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn merge_guard(&self) -> &Mutex<()> {
        &self.merge_guard
    }

    pub(crate) fn merge_phase(&self) -> MergePhase {
        *self.merge_phase.lock()
    }

    pub(crate) fn set_merge_phase(&self, phase: MergePhase) {
        *self.merge_phase.lock() = phase;
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(CaskError::InvalidInput("Key must not be empty".to_string()));
    }
    if key.len() > u32::MAX as usize {
        return Err(CaskError::InvalidInput(format!(
            "Key of {} bytes is too long",
            key.len()
        )));
    }
    Ok(())
}

/// Create a fresh pair under a new id, skipping ids already taken on disk
fn create_file(dir: &Path, ids: &FileIdGenerator, config: &Config) -> Result<AppendFile> {
    let mut last_err = None;
    for _ in 0..CREATE_RETRIES {
        let id = ids.next_id();
        match AppendFile::create(dir, id, config.sync_strategy) {
            Ok(file) => return Ok(file),
            Err(CaskError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(file_id = id, "File id already taken, trying the next one");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(CaskError::Io(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AlreadyExists, "no free file id")
    })))
}

/// Install every hint of file `id` into `keydir`
///
/// Hints are replayed in file order, so later records (and later files)
/// overwrite earlier ones. Tombstones remove the key. Returns the end of the
/// last record the hints account for.
fn replay_hint_file(dir: &Path, id: FileId, keydir: &KeyDir) -> Result<u64> {
    let data_len = match fs::metadata(file::data_path(dir, id)) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => return Err(CaskError::Io(e)),
    };

    let mut installed = 0usize;
    let mut logical_end = 0u64;
    for hint in HintReader::open(&file::hint_path(dir, id), id)? {
        let hint = hint?;
        let header = hint.header;

        let stored_len = if header.is_tombstone() { 0 } else { header.value_len as u64 };
        let end = match header.value_offset.checked_add(stored_len) {
            Some(end) if end <= data_len => end,
            _ => {
                return Err(CaskError::Format(format!(
                    "Hint in file {} points past the end of its data ({} bytes)",
                    id, data_len
                )))
            }
        };
        logical_end = logical_end.max(end);

        if header.is_tombstone() {
            keydir.delete(&hint.key);
            continue;
        }

        keydir.put(
            hint.key,
            IndexEntry {
                file_id: id,
                value_offset: header.value_offset,
                value_len: header.value_len,
                timestamp: header.timestamp,
            },
        );
        installed += 1;
    }

    tracing::debug!(file_id = id, hints = installed, "Replayed hint file");
    Ok(logical_end)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CaskError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use tempfile::TempDir;

    fn small_engine(max_file_size: u64) -> (TempDir, Engine) {
        let temp = TempDir::new().unwrap();
        let config = Config::builder()
            .data_dir(temp.path())
            .max_file_size(max_file_size)
            .merge_enabled(false)
            .merge_min_files(1)
            .build();
        let engine = Engine::open(config).unwrap();
        (temp, engine)
    }

    fn active_size(engine: &Engine) -> u64 {
        engine.inner.writer.read().active.size()
    }

    #[test]
    fn test_put_rewrite_skips_overwritten_key() {
        let (_temp, engine) = small_engine(1 << 20);
        engine.put(b"k", b"old").unwrap();
        let scanned = engine.inner.keydir.lookup(b"k").unwrap();
        engine.put(b"k", b"new").unwrap();
        let current = engine.inner.keydir.lookup(b"k").unwrap();
        let size = active_size(&engine);

        assert!(!engine.inner.put_rewrite(b"k", b"old", scanned).unwrap());
        assert_eq!(engine.inner.keydir.lookup(b"k"), Some(current));
        assert_eq!(active_size(&engine), size);
        assert_eq!(engine.get(b"k").unwrap(), b"new");
    }

    #[test]
    fn test_put_rewrite_skips_deleted_key() {
        let (_temp, engine) = small_engine(1 << 20);
        engine.put(b"k", b"v").unwrap();
        let scanned = engine.inner.keydir.lookup(b"k").unwrap();
        engine.delete(b"k").unwrap();

        assert!(!engine.inner.put_rewrite(b"k", b"v", scanned).unwrap());
        assert!(!engine.contains_key(b"k"));
        assert!(matches!(engine.get(b"k"), Err(CaskError::KeyNotFound)));
    }

    #[test]
    fn test_put_rewrite_moves_live_record() {
        let (_temp, engine) = small_engine(0);
        engine.put(b"k", b"v").unwrap();
        let scanned = engine.inner.keydir.lookup(b"k").unwrap();
        engine.put(b"other", b"x").unwrap();
        assert_ne!(engine.active_file_id(), scanned.file_id);

        assert!(engine.inner.put_rewrite(b"k", b"v", scanned).unwrap());

        let moved = engine.inner.keydir.lookup(b"k").unwrap();
        assert!(moved.is_newer_than(&scanned));
        assert_eq!(moved.file_id, engine.active_file_id());
        assert_eq!(engine.get(b"k").unwrap(), b"v");
        // The source stays cached until its whole file has been merged
        assert!(engine.inner.registry.get(scanned.file_id).is_some());

        engine.inner.evict_file(scanned.file_id);
        assert!(engine.inner.registry.get(scanned.file_id).is_none());
    }

    #[test]
    fn test_stopped_cycle_keeps_every_file() {
        let (temp, engine) = small_engine(64);
        for i in 0..20 {
            engine
                .put(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        let before = engine.file_ids().unwrap();
        assert!(before.len() > 2);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        drop(stop_tx);
        let stats = merge::run_cycle(&engine.inner, Some(&stop_rx)).unwrap();

        assert!(stats.interrupted);
        assert_eq!(stats.files_scanned, 0);
        assert_eq!(stats.files_retired, 0);
        assert_eq!(engine.file_ids().unwrap(), before);
        for id in &before {
            assert!(file::hint_path(temp.path(), *id).exists());
        }
        assert_eq!(engine.merge_phase(), MergePhase::Idle);
        for i in 0..20 {
            assert_eq!(
                engine.get(format!("key{}", i).as_bytes()).unwrap(),
                format!("value{}", i).into_bytes()
            );
        }
    }

    #[test]
    fn test_failed_append_rotates_to_fresh_file() {
        let (_temp, engine) = small_engine(1 << 20);
        engine.put(b"before", b"1").unwrap();
        let first = engine.active_file_id();
        engine.inner.writer.write().active.reopen_data_read_only().unwrap();

        assert!(matches!(engine.put(b"lost", b"2"), Err(CaskError::Io(_))));
        assert!(engine.inner.writer.read().active.is_suspect());
        assert!(!engine.contains_key(b"lost"));
        assert_eq!(engine.active_file_id(), first);

        engine.put(b"after", b"3").unwrap();

        assert_ne!(engine.active_file_id(), first);
        assert!(!engine.inner.writer.read().active.is_suspect());
        assert_eq!(engine.get(b"before").unwrap(), b"1");
        assert_eq!(engine.get(b"after").unwrap(), b"3");
    }
}
