//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ entities.log      # Entity journal
//! └─ queue.log         # Operation queue journal
//! ```
//!
//! The LOCK file ensures only one process writes to the store at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const ENTITIES_FILE: &str = "entities.log";
const QUEUE_FILE: &str = "queue.log";

/// Holds the store directory and its exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the directory is missing and
    /// `create_if_missing` is false, and `DatabaseLocked` if another
    /// process holds the lock.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::InvalidPath(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::InvalidPath(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the entity journal.
    #[must_use]
    pub fn entities_path(&self) -> PathBuf {
        self.path.join(ENTITIES_FILE)
    }

    /// Path of the queue journal.
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.path.join(QUEUE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        let store_dir = StoreDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(store_dir.entities_path(), path.join("entities.log"));
        assert_eq!(store_dir.queue_path(), path.join("queue.log"));
    }

    #[test]
    fn missing_directory_without_create() {
        let dir = tempdir().unwrap();
        let result = StoreDir::open(&dir.path().join("absent"), false);
        assert!(matches!(result, Err(CoreError::InvalidPath(_))));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _first = StoreDir::open(dir.path(), true).unwrap();
        let second = StoreDir::open(dir.path(), true);
        assert!(matches!(second, Err(CoreError::DatabaseLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        {
            let _first = StoreDir::open(dir.path(), true).unwrap();
        }
        assert!(StoreDir::open(dir.path(), true).is_ok());
    }
}
