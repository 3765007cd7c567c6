//! Cross-process ownership of a snapshot.
//!
//! Transition claims only exist in the memory of the process that took them,
//! so two processes working on one snapshot would overwrite each other's
//! changes and could move the same file twice. Whoever opens a catalog for
//! writing holds this lock first.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive advisory lock on `<snapshot>.lock`, released on drop.
#[derive(Debug)]
pub struct SnapshotLock {
    // Closing the file releases the lock.
    _file: File,
    path: PathBuf,
}

impl SnapshotLock {
    /// Take the lock for the snapshot at `snapshot`, without waiting.
    ///
    /// # Errors
    ///
    /// [`Locked`](ErrorKind::Locked) if another process (or another handle
    /// in this one) already holds it.
    pub fn acquire(snapshot: impl AsRef<Path>) -> Result<Self> {
        let mut path = snapshot.as_ref().to_path_buf().into_os_string();
        path.push(".lock");
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .or_raise(|| ErrorKind::Io(path.clone()))?;
        match file.try_lock() {
            Ok(()) => {},
            Err(TryLockError::WouldBlock) => exn::bail!(ErrorKind::Locked(path)),
            Err(TryLockError::Error(e)) => return Err(e).or_raise(|| ErrorKind::Io(path)),
        }
        debug!(path = %path.display(), "acquired snapshot lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
