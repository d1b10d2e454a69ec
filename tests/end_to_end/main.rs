//! End-to-end scenarios over the public surface
//!
//! Each module drives a full instance on a temp directory: document
//! lifecycle, time travel, branching, search, schema/select, and crash
//! recovery.

mod crash;
mod documents;
mod queries;
mod time_travel;

use chrondb::Chrondb;
use tempfile::TempDir;

pub fn open() -> (TempDir, Chrondb) {
    let dir = TempDir::new().unwrap();
    let db = Chrondb::open(dir.path().join("data"), dir.path().join("index")).unwrap();
    (dir, db)
}
