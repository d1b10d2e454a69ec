//! Repository locks
//!
//! Two locks with different lifetimes:
//!
//! - [`RepoLockFile`]: an advisory `fs2` lock on `<data_dir>/repo.lock`, held
//!   for as long as the instance is open. It keeps a second process from
//!   opening the same repository; within a process the instance registry
//!   deduplicates handles instead.
//! - [`WriterLock`]: the in-process mutex serializing commit-engine
//!   mutations. Held across tree build, WAL append, object writes, ref CAS
//!   and the notes append; readers never take it.

use chrondb_core::{ChronError, ChronResult};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

/// File name of the process-exclusive repository lock.
pub const REPO_LOCK_FILE: &str = "repo.lock";

/// Process-exclusive advisory lock on the repository directory
pub struct RepoLockFile {
    file: File,
}

impl RepoLockFile {
    /// Acquire the lock, failing immediately when another process holds it.
    pub fn acquire(data_dir: &Path) -> ChronResult<Self> {
        let path = data_dir.join(REPO_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            ChronError::storage(format!(
                "repository at {} is locked by another process",
                data_dir.display()
            ))
        })?;
        debug!(path = %path.display(), "repository lock acquired");
        Ok(RepoLockFile { file })
    }
}

impl Drop for RepoLockFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// In-process single-writer mutex
///
/// Fairness and poisoning behavior come from `parking_lot`; a panicking
/// writer does not wedge subsequent writers.
#[derive(Default)]
pub struct WriterLock {
    inner: Mutex<()>,
}

impl WriterLock {
    /// Create an unlocked writer lock.
    pub fn new() -> Self {
        WriterLock {
            inner: Mutex::new(()),
        }
    }

    /// Block until the write lock is held.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }

    /// Try to take the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.inner.try_lock()
    }
}
