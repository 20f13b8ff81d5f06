//! Directory Lock
//!
//! Exclusive-create lock file guarding a data directory against a second
//! engine instance. The file body is diagnostic only:
//! `<pid>\t<active file id>.data`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::file::{FileId, DATA_EXT};

/// Name of the lock file inside the data directory
pub const LOCK_FILE_NAME: &str = "bitcask.lock";

/// Held lock on a data directory; released by `release` or on drop
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    file: Option<File>,
}

impl DirLock {
    /// Take the lock on `dir`; fails with `LockHeld` if the lock file exists
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => CaskError::LockHeld(path.clone()),
                _ => CaskError::Io(e),
            })?;

        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Rewrite the diagnostic body with the current active file
    pub fn record_active(&mut self, active: FileId) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            let body = format!("{}\t{}.{}", std::process::id(), active, DATA_EXT);
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(body.as_bytes())?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close and delete the lock file
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(CaskError::Io(e)),
            }
            tracing::debug!(path = %self.path.display(), "Released directory lock");
        }
        Ok(())
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails() {
        let temp = TempDir::new().unwrap();
        let lock = DirLock::acquire(temp.path()).unwrap();
        assert!(matches!(DirLock::acquire(temp.path()), Err(CaskError::LockHeld(_))));

        lock.release().unwrap();
        assert!(!temp.path().join(LOCK_FILE_NAME).exists());
        DirLock::acquire(temp.path()).unwrap();
    }

    #[test]
    fn test_record_active_body() {
        let temp = TempDir::new().unwrap();
        let mut lock = DirLock::acquire(temp.path()).unwrap();
        lock.record_active(123456789).unwrap();
        lock.record_active(42).unwrap();

        let body = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(body, format!("{}\t42.data", std::process::id()));
    }

    #[test]
    fn test_drop_releases() {
        let temp = TempDir::new().unwrap();
        {
            let _lock = DirLock::acquire(temp.path()).unwrap();
            assert!(temp.path().join(LOCK_FILE_NAME).exists());
        }
        assert!(!temp.path().join(LOCK_FILE_NAME).exists());
    }
}
