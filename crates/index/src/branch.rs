//! Near-real-time branch index
//!
//! Writers mutate a live [`IndexState`]; readers borrow the last published
//! snapshot (an `Arc` clone, so borrowing never blocks writers). The snapshot
//! is republished when the refresh cadence elapses, or immediately when a
//! writer requests refresh-on-commit. Snapshot generations are monotone per
//! branch: a document visible at generation G stays visible until a delete is
//! published at some later generation.

use crate::inverted::IndexState;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One branch's index, NRT-published
pub struct BranchIndex {
    live: RwLock<IndexState>,
    published: RwLock<Arc<IndexState>>,
    last_refresh: Mutex<Instant>,
    refresh_interval: Duration,
}

impl BranchIndex {
    /// Create an empty branch index with the given reader-refresh cadence.
    pub fn new(refresh_interval: Duration) -> Self {
        BranchIndex {
            live: RwLock::new(IndexState::new()),
            published: RwLock::new(Arc::new(IndexState::new())),
            last_refresh: Mutex::new(Instant::now()),
            refresh_interval,
        }
    }

    /// Index (or replace) a document's flattened fields in the live state.
    ///
    /// Not visible to readers until the next refresh.
    pub fn index_document(&self, doc_id: &str, fields: BTreeMap<String, Value>) {
        self.live.write().index_document(doc_id, fields);
    }

    /// Remove a document from the live state.
    pub fn delete_document(&self, doc_id: &str) {
        self.live.write().remove_document(doc_id);
    }

    /// Drop all live and published content.
    pub fn clear(&self) {
        self.live.write().clear();
        self.refresh();
    }

    /// Publish the live state to readers immediately.
    pub fn refresh(&self) {
        let snapshot = Arc::new(self.live.read().clone());
        let generation = snapshot.generation();
        *self.published.write() = snapshot;
        *self.last_refresh.lock() = Instant::now();
        debug!(generation, "index reader refreshed");
    }

    /// Borrow a point-in-time reader.
    ///
    /// Publishes first when the cadence has elapsed, so a steady stream of
    /// readers keeps the snapshot at most one interval stale.
    pub fn reader(&self) -> Arc<IndexState> {
        let due = {
            let last = self.last_refresh.lock();
            last.elapsed() >= self.refresh_interval
        };
        if due {
            self.refresh();
        }
        Arc::clone(&self.published.read())
    }

    /// Borrow the published reader without checking the cadence.
    pub fn reader_no_refresh(&self) -> Arc<IndexState> {
        Arc::clone(&self.published.read())
    }

    /// Generation of the live (unpublished) state.
    pub fn live_generation(&self) -> u64 {
        self.live.read().generation()
    }

    /// Number of documents in the live state.
    pub fn live_doc_count(&self) -> usize {
        self.live.read().doc_count()
    }
}
