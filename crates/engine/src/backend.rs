//! Storage backend boundary
//!
//! A narrow trait over the document operations every surface needs, with two
//! implementations: the durable [`Database`] and an in-memory
//! [`MemoryBackend`] for tests and embedding scenarios that do not want a
//! filesystem. Adapters program against the trait, so swapping a test double
//! in never touches protocol code.

use crate::database::Database;
use crate::history::HistoryEntry;
use chrondb_concurrency::TxContext;
use chrondb_core::{BranchName, ChronError, ChronResult, DocId, Document, ObjectId, TableName};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Narrow document-store interface
pub trait DocumentBackend: Send + Sync {
    /// Write a document.
    fn save(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        doc: Document,
    ) -> ChronResult<ObjectId>;

    /// Read a document at the branch tip.
    fn get(&self, branch: &BranchName, id: &DocId) -> ChronResult<Option<Document>>;

    /// Tombstone a document.
    fn delete(&self, ctx: &mut TxContext, branch: &BranchName, id: &DocId)
        -> ChronResult<ObjectId>;

    /// Documents whose id starts with `prefix`, in id order.
    fn list_by_prefix(&self, branch: &BranchName, prefix: &str) -> ChronResult<Vec<Document>>;

    /// Documents of one table, in id order.
    fn list_by_table(&self, branch: &BranchName, table: &TableName)
        -> ChronResult<Vec<Document>>;

    /// Newest-first history of a document.
    fn history(&self, branch: &BranchName, id: &DocId) -> ChronResult<Vec<HistoryEntry>>;

    /// Release resources.
    fn close(&self) -> ChronResult<()>;
}

impl DocumentBackend for Database {
    fn save(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        doc: Document,
    ) -> ChronResult<ObjectId> {
        Database::save(self, ctx, branch, doc)
    }

    fn get(&self, branch: &BranchName, id: &DocId) -> ChronResult<Option<Document>> {
        Database::get(self, branch, id)
    }

    fn delete(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        id: &DocId,
    ) -> ChronResult<ObjectId> {
        Database::delete(self, ctx, branch, id)
    }

    fn list_by_prefix(&self, branch: &BranchName, prefix: &str) -> ChronResult<Vec<Document>> {
        Database::list_by_prefix(self, branch, prefix)
    }

    fn list_by_table(
        &self,
        branch: &BranchName,
        table: &TableName,
    ) -> ChronResult<Vec<Document>> {
        Database::list_by_table(self, branch, table)
    }

    fn history(&self, branch: &BranchName, id: &DocId) -> ChronResult<Vec<HistoryEntry>> {
        Database::history(self, branch, id)
    }

    fn close(&self) -> ChronResult<()> {
        Database::close(self)
    }
}

type VersionChain = Vec<(ObjectId, Option<Document>, i64)>;

/// In-memory backend keeping full version chains per `(branch, id)`
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<HashMap<String, HashMap<String, VersionChain>>>,
    counter: RwLock<u64>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    fn next_commit_id(&self) -> ObjectId {
        let mut counter = self.counter.write();
        *counter += 1;
        ObjectId::hash(format!("memory-commit-{}", *counter).as_bytes())
    }
}

impl DocumentBackend for MemoryBackend {
    fn save(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        doc: Document,
    ) -> ChronResult<ObjectId> {
        if !ctx.is_pending() {
            return Err(ChronError::internal("transaction is not pending"));
        }
        let commit_id = self.next_commit_id();
        let mut state = self.state.write();
        let chain = state
            .entry(branch.to_string())
            .or_default()
            .entry(doc.id.to_string())
            .or_default();
        // Identical payload: no new version, mirroring the durable engine
        if let Some((last_commit, Some(last_doc), _)) = chain.last() {
            if *last_doc == doc {
                return Ok(*last_commit);
            }
        }
        chain.push((commit_id, Some(doc), chrono::Utc::now().timestamp_millis()));
        Ok(commit_id)
    }

    fn get(&self, branch: &BranchName, id: &DocId) -> ChronResult<Option<Document>> {
        let state = self.state.read();
        Ok(state
            .get(branch.as_str())
            .and_then(|docs| docs.get(id.as_str()))
            .and_then(|chain| chain.last())
            .and_then(|(_, doc, _)| doc.clone()))
    }

    fn delete(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        id: &DocId,
    ) -> ChronResult<ObjectId> {
        if !ctx.is_pending() {
            return Err(ChronError::internal("transaction is not pending"));
        }
        if self.get(branch, id)?.is_none() {
            return Err(ChronError::not_found(format!("document {}", id)));
        }
        let commit_id = self.next_commit_id();
        let mut state = self.state.write();
        if let Some(chain) = state
            .get_mut(branch.as_str())
            .and_then(|docs| docs.get_mut(id.as_str()))
        {
            chain.push((commit_id, None, chrono::Utc::now().timestamp_millis()));
        }
        Ok(commit_id)
    }

    fn list_by_prefix(&self, branch: &BranchName, prefix: &str) -> ChronResult<Vec<Document>> {
        let state = self.state.read();
        let mut out: Vec<Document> = state
            .get(branch.as_str())
            .map(|docs| {
                docs.iter()
                    .filter(|(id, _)| id.starts_with(prefix))
                    .filter_map(|(_, chain)| chain.last())
                    .filter_map(|(_, doc, _)| doc.clone())
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn list_by_table(
        &self,
        branch: &BranchName,
        table: &TableName,
    ) -> ChronResult<Vec<Document>> {
        let state = self.state.read();
        let mut out: Vec<Document> = state
            .get(branch.as_str())
            .map(|docs| {
                docs.values()
                    .filter_map(|chain| chain.last())
                    .filter_map(|(_, doc, _)| doc.clone())
                    .filter(|doc| doc.table == *table)
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn history(&self, branch: &BranchName, id: &DocId) -> ChronResult<Vec<HistoryEntry>> {
        let state = self.state.read();
        let chain = match state
            .get(branch.as_str())
            .and_then(|docs| docs.get(id.as_str()))
        {
            Some(chain) => chain,
            None => return Ok(Vec::new()),
        };
        Ok(chain
            .iter()
            .rev()
            .map(|(commit_id, doc, ts)| HistoryEntry {
                commit_id: *commit_id,
                timestamp_ms: *ts,
                author: "memory".to_string(),
                committer: "memory".to_string(),
                message: match doc {
                    Some(_) => format!("put {}", id),
                    None => format!("delete {}", id),
                },
                document: doc.clone(),
            })
            .collect())
    }

    fn close(&self) -> ChronResult<()> {
        Ok(())
    }
}
