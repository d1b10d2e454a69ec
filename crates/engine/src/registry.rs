//! Instance registry
//!
//! Process-wide deduplication of open instances, keyed by the canonical
//! `(data_path, index_path)` pair. Foreign-function callers open and close by
//! path; the registry hands every caller of the same pair the same `Arc`d
//! instance and tears it down only when the last `close` lands. Without this,
//! a second open of the same directories would trip over the repository lock
//! the first one holds.

use crate::database::Database;
use chrondb_core::{ChronError, ChronResult};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

struct Entry {
    db: Arc<Database>,
    refcount: usize,
}

static REGISTRY: Lazy<Mutex<HashMap<(PathBuf, PathBuf), Entry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn canonical_key(data_dir: &Path, index_dir: &Path) -> ChronResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(index_dir)?;
    Ok((data_dir.canonicalize()?, index_dir.canonicalize()?))
}

/// Open an instance, reusing an already-open one for the same directories.
pub fn open(data_dir: &Path, index_dir: &Path) -> ChronResult<Arc<Database>> {
    let key = canonical_key(data_dir, index_dir)?;
    let mut registry = REGISTRY.lock();
    if let Some(entry) = registry.get_mut(&key) {
        entry.refcount += 1;
        debug!(data_dir = %key.0.display(), refcount = entry.refcount, "instance reused");
        return Ok(Arc::clone(&entry.db));
    }
    let db = Arc::new(Database::open(data_dir, index_dir)?);
    registry.insert(
        key,
        Entry {
            db: Arc::clone(&db),
            refcount: 1,
        },
    );
    Ok(db)
}

/// Close one handle; tears the instance down when the count reaches zero.
///
/// Returns `true` when this call closed the last handle.
pub fn close(data_dir: &Path, index_dir: &Path) -> ChronResult<bool> {
    let key = canonical_key(data_dir, index_dir)?;
    let mut registry = REGISTRY.lock();
    let entry = registry
        .get_mut(&key)
        .ok_or_else(|| ChronError::not_found(format!("open instance at {}", key.0.display())))?;
    entry.refcount -= 1;
    if entry.refcount > 0 {
        debug!(data_dir = %key.0.display(), refcount = entry.refcount, "instance released");
        return Ok(false);
    }
    let entry = registry.remove(&key).expect("entry checked above");
    entry.db.close()?;
    Ok(true)
}

/// Number of registered instances (diagnostics and tests).
pub fn open_instances() -> usize {
    REGISTRY.lock().len()
}
