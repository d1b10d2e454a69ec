//! Named refs with atomic compare-and-set
//!
//! Refs are files under `<data_dir>/refs/` holding a commit id in hex, plus a
//! `HEAD` file naming the session's default branch. Updates take a per-store
//! mutex, then a per-ref `.lock` file, write a temp file and rename it into
//! place. The lock file guards against a second process; the rename keeps
//! readers from ever seeing a torn write. Stale lock files (left by a crashed
//! writer) are swept at startup.

use chrondb_core::{BranchName, ChronError, ChronResult, ObjectId};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Ref name of a branch head.
pub fn branch_ref(branch: &BranchName) -> String {
    format!("heads/{}", branch)
}

/// Ref name of the notes sidecar chain.
pub const NOTES_REF: &str = "notes/chrondb";

/// Age past which an abandoned `.lock` file is considered stale.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Outcome of a compare-and-set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The ref was updated
    Ok,
    /// The ref did not hold the expected value; nothing was written
    Mismatch {
        /// Value actually held (None when the ref is absent)
        actual: Option<ObjectId>,
    },
}

impl CasOutcome {
    /// Check whether the CAS applied.
    pub fn is_ok(&self) -> bool {
        matches!(self, CasOutcome::Ok)
    }
}

/// Store of named refs
pub struct RefStore {
    root: PathBuf,
    head_path: PathBuf,
    // Serializes in-process updates; the .lock file serializes across
    // processes.
    update_lock: Mutex<()>,
}

impl RefStore {
    /// Open (and create if needed) the refs store under `data_dir`.
    pub fn open(data_dir: &Path) -> ChronResult<Self> {
        let root = data_dir.join("refs");
        std::fs::create_dir_all(root.join("heads"))?;
        std::fs::create_dir_all(root.join("notes"))?;
        Ok(RefStore {
            root,
            head_path: data_dir.join("HEAD"),
            update_lock: Mutex::new(()),
        })
    }

    fn ref_path(&self, name: &str) -> ChronResult<PathBuf> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(ChronError::invalid_input(format!("bad ref name: {}", name)));
        }
        Ok(self.root.join(name))
    }

    /// Read a ref; `None` when absent.
    pub fn read(&self, name: &str) -> ChronResult<Option<ObjectId>> {
        let path = self.ref_path(name)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let id = ObjectId::from_hex(text.trim())
                    .map_err(|_| ChronError::corrupt(format!("ref {} holds garbage", name)))?;
                Ok(Some(id))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically advance a ref from `expected` to `new`.
    ///
    /// `expected = None` asserts the ref does not exist yet (branch
    /// creation). The comparison and write happen under the per-ref lock
    /// file, so a racing writer in another process observes a mismatch
    /// instead of clobbering.
    pub fn compare_and_set(
        &self,
        name: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
    ) -> ChronResult<CasOutcome> {
        let path = self.ref_path(name)?;
        let _guard = self.update_lock.lock();
        let _file_lock = RefLock::acquire(&path)?;

        let actual = self.read(name)?;
        if actual != expected {
            return Ok(CasOutcome::Mismatch { actual });
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, format!("{}\n", new.to_hex()))?;
        std::fs::rename(&tmp, &path)?;
        Ok(CasOutcome::Ok)
    }

    /// Overwrite a ref regardless of its current value.
    ///
    /// Used by fetch (force semantics) and recovery; normal commits go
    /// through [`RefStore::compare_and_set`].
    pub fn force_set(&self, name: &str, id: ObjectId) -> ChronResult<()> {
        let path = self.ref_path(name)?;
        let _guard = self.update_lock.lock();
        let _file_lock = RefLock::acquire(&path)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, format!("{}\n", id.to_hex()))?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Delete a ref; absent is `NotFound`.
    pub fn delete(&self, name: &str) -> ChronResult<()> {
        let path = self.ref_path(name)?;
        let _guard = self.update_lock.lock();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ChronError::not_found(format!("ref {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All refs as `(name, id)` pairs, sorted by name.
    pub fn list(&self) -> ChronResult<Vec<(String, ObjectId)>> {
        let mut out = Vec::new();
        self.walk(&self.root.clone(), String::new(), &mut out)?;
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn walk(
        &self,
        dir: &Path,
        prefix: String,
        out: &mut Vec<(String, ObjectId)>,
    ) -> ChronResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let name = if prefix.is_empty() {
                file_name.clone()
            } else {
                format!("{}/{}", prefix, file_name)
            };
            if entry.file_type()?.is_dir() {
                self.walk(&entry.path(), name, out)?;
            } else {
                if file_name.ends_with(".lock") || file_name.ends_with(".tmp") {
                    continue;
                }
                if let Some(id) = self.read(&name)? {
                    out.push((name, id));
                }
            }
        }
        Ok(())
    }

    /// Branch names (refs under `heads/`), sorted.
    pub fn list_branches(&self) -> ChronResult<Vec<BranchName>> {
        let mut out = Vec::new();
        for (name, _) in self.list()? {
            if let Some(branch) = name.strip_prefix("heads/") {
                out.push(BranchName::new(branch)?);
            }
        }
        Ok(out)
    }

    /// Read the session default branch from `HEAD`.
    pub fn read_head(&self) -> ChronResult<BranchName> {
        let text = std::fs::read_to_string(&self.head_path)?;
        let name = text
            .trim()
            .strip_prefix("ref: refs/heads/")
            .ok_or_else(|| ChronError::corrupt("HEAD is not a branch pointer"))?;
        BranchName::new(name)
    }

    /// Point `HEAD` at a branch.
    pub fn write_head(&self, branch: &BranchName) -> ChronResult<()> {
        let tmp = self.head_path.with_extension("tmp");
        std::fs::write(&tmp, format!("ref: refs/heads/{}\n", branch))?;
        std::fs::rename(&tmp, &self.head_path)?;
        Ok(())
    }

    /// Remove `.lock` and `.tmp` files older than `max_age`.
    ///
    /// Called at startup (spec'd recovery step 2). A lock younger than
    /// `max_age` may belong to a live writer and is left alone.
    pub fn cleanup_stale_locks(&self, max_age: Duration) -> ChronResult<usize> {
        let mut removed = 0;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if !(name.ends_with(".lock") || name.ends_with(".tmp")) {
                    continue;
                }
                let age = entry
                    .metadata()?
                    .modified()?
                    .elapsed()
                    .unwrap_or(Duration::ZERO);
                if age >= max_age {
                    warn!(path = %entry.path().display(), "removing stale lock file");
                    std::fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!(removed, "stale ref locks cleaned");
        }
        Ok(removed)
    }
}

/// Exclusive per-ref lock file, released on drop
struct RefLock {
    path: PathBuf,
}

impl RefLock {
    fn acquire(ref_path: &Path) -> ChronResult<RefLock> {
        let path = PathBuf::from(format!("{}.lock", ref_path.display()));
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(RefLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(ChronError::storage(
                format!("ref is locked by another writer: {}", path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
