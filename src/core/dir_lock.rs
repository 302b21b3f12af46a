//! Exclusive ownership of a store directory

use crate::core::error::{Result, StoreError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LOCK_FILE: &str = "LOCK";

/// Exclusive file system lock on the `LOCK` file inside a store directory
///
/// Only one open store may own the data and bitmap files. The lock is
/// released when this value is dropped or the process exits.
#[derive(Debug)]
pub struct DirLock {
    /// Must stay open for the lock to be held
    file: File,
    directory: PathBuf,
}

impl DirLock {
    /// Lock an existing directory
    ///
    /// # Errors
    ///
    /// `DirectoryLocked` if another instance, in this process or another,
    /// already holds the lock.
    pub fn acquire(directory: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(directory.join(LOCK_FILE))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(StoreError::DirectoryLocked(directory.to_path_buf()));
            }
            return Err(e.into());
        }

        Ok(DirLock {
            file,
            directory: directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to unlock {}: {}", self.directory.display(), e);
        }
    }
}
