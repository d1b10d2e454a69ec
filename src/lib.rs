//! ChronDB: a chronological, schemaless document database
//!
//! Every write produces an immutable commit in a content-addressed graph,
//! which makes time-travel reads, branch-isolated environments, and a full
//! audit trail of every mutation first-class operations rather than add-ons.
//!
//! This crate is the embedding surface: [`Chrondb`] opens an instance
//! (deduplicated process-wide by directory pair) and exposes document,
//! branch, history, schema, and search operations. Protocol adapters
//! (REST, RESP, PostgreSQL wire) sit on top of this same API.
//!
//! ```no_run
//! use chrondb::{Chrondb, Origin};
//! use serde_json::json;
//!
//! # fn main() -> chrondb::ChronResult<()> {
//! let db = Chrondb::open("./data", "./index")?;
//! db.put_as(Origin::Rest, "api", "user:1", json!({"name": "John", "age": 30}))?;
//! let doc = db.get("user:1")?;
//! assert_eq!(doc.fields["age"], json!(30));
//! let history = db.history("user:1")?;
//! assert_eq!(history.len(), 1);
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub use chrondb_concurrency::{
    ExpectedVersion, TxContext, TxOptions, TxRecord, TxStatus,
};
pub use chrondb_core::{
    Analyzer, BranchName, Change, ChronConfig, ChronError, ChronResult, Clause, Cursor, Deadline,
    DocId, Document, GeoBox, ObjectId, Origin, Query, RemoteErrorKind, SortOrder, SortSpec,
    TableName,
};
pub use chrondb_engine::{
    registry, BranchInfo, ColumnDef, Database, DocDiff, DocumentBackend, HistoryEntry,
    HistoryPage, MemoryBackend, MergeOutcome, PushOutcome, RefOrCommit, SchemaRecord, TableInfo,
};
pub use chrondb_executor::{
    AggFunc, AggregateSpec, JoinKind, JoinSpec, Row, SearchOutput, SelectOutput, SelectRequest,
};

/// Handle over one open ChronDB instance
///
/// Opens are deduplicated process-wide by `(data_dir, index_dir)`; dropping
/// the handle without [`Chrondb::close`] leaves the instance registered for
/// other handles.
pub struct Chrondb {
    db: Arc<Database>,
    data_dir: PathBuf,
    index_dir: PathBuf,
}

impl Chrondb {
    /// Open (or join) the instance at the given directories.
    pub fn open(data_dir: impl AsRef<Path>, index_dir: impl AsRef<Path>) -> ChronResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let index_dir = index_dir.as_ref().to_path_buf();
        let db = registry::open(&data_dir, &index_dir)?;
        Ok(Chrondb {
            db,
            data_dir,
            index_dir,
        })
    }

    /// Install a global `tracing` subscriber per the instance's logging
    /// config. A no-op when a subscriber is already set.
    pub fn init_logging(&self) {
        let logging = &self.db.config().logging;
        let level = match logging.level.as_str() {
            "debug" => tracing::Level::DEBUG,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        };
        let installed = match (logging.output.as_str(), &logging.file) {
            ("file", Some(path)) => match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(file) => tracing_subscriber::fmt()
                    .with_max_level(level)
                    .with_writer(std::sync::Mutex::new(file))
                    .try_init()
                    .is_ok(),
                Err(e) => {
                    warn!(error = %e, "log file unavailable, keeping default subscriber");
                    false
                }
            },
            _ => tracing_subscriber::fmt()
                .with_max_level(level)
                .try_init()
                .is_ok(),
        };
        if !installed {
            tracing::debug!("subscriber already installed");
        }
    }

    /// The underlying engine, for advanced callers.
    pub fn database(&self) -> &Database {
        &self.db
    }

    fn branch(&self, branch: Option<&str>) -> ChronResult<BranchName> {
        match branch {
            Some(name) => BranchName::new(name),
            None => self.db.current_branch(),
        }
    }

    fn run_tx<T>(
        &self,
        options: TxOptions,
        op: impl FnOnce(&mut TxContext) -> ChronResult<T>,
    ) -> ChronResult<T> {
        let mut ctx = TxContext::begin(options);
        match op(&mut ctx) {
            Ok(value) => {
                ctx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // The context is one-shot; a failed resolve is unreachable
                // here since nothing else touched it.
                let _ = ctx.fail(e.to_string());
                Err(e)
            }
        }
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Write a document on the current branch (internal origin).
    pub fn put(&self, id: &str, value: serde_json::Value) -> ChronResult<ObjectId> {
        self.put_as(Origin::Internal, "internal", id, value)
    }

    /// Write a document with an explicit origin and user.
    pub fn put_as(
        &self,
        origin: Origin,
        user: &str,
        id: &str,
        value: serde_json::Value,
    ) -> ChronResult<ObjectId> {
        self.put_on(None, origin, user, id, value)
    }

    /// Write a document on a named branch.
    pub fn put_on(
        &self,
        branch: Option<&str>,
        origin: Origin,
        user: &str,
        id: &str,
        value: serde_json::Value,
    ) -> ChronResult<ObjectId> {
        let branch = self.branch(branch)?;
        let doc = Document::from_value(DocId::new(id)?, value)?;
        self.run_tx(TxOptions::for_user(origin, user), |ctx| {
            self.db.save(ctx, &branch, doc)
        })
    }

    /// Conditional write: fails with `VersionConflict` unless the document's
    /// current version matches `expected`.
    pub fn put_if(
        &self,
        id: &str,
        value: serde_json::Value,
        expected: ExpectedVersion,
    ) -> ChronResult<ObjectId> {
        let branch = self.branch(None)?;
        let doc = Document::from_value(DocId::new(id)?, value)?;
        self.run_tx(TxOptions::internal(), |ctx| {
            self.db.save_with_version(ctx, &branch, doc, expected)
        })
    }

    /// Shallow-merge fields into the current version of a document.
    pub fn patch(&self, id: &str, value: serde_json::Value) -> ChronResult<ObjectId> {
        let branch = self.branch(None)?;
        let id = DocId::new(id)?;
        let incoming = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(ChronError::bad_document(format!(
                    "merge payload must be an object, got {}",
                    chrondb_core::document::json_type_name(&other)
                )))
            }
        };
        self.run_tx(TxOptions::internal(), |ctx| {
            self.db.save_merged(ctx, &branch, &id, incoming)
        })
    }

    /// Read a document from the current branch; `NotFound` when absent.
    pub fn get(&self, id: &str) -> ChronResult<Document> {
        self.get_on(None, id)
    }

    /// Read a document from a named branch; `NotFound` when absent.
    pub fn get_on(&self, branch: Option<&str>, id: &str) -> ChronResult<Document> {
        let branch = self.branch(branch)?;
        self.db
            .get(&branch, &DocId::new(id)?)?
            .ok_or_else(|| ChronError::not_found(format!("document {}", id)))
    }

    /// Read a document, `None` when absent.
    pub fn try_get(&self, id: &str) -> ChronResult<Option<Document>> {
        let branch = self.branch(None)?;
        self.db.get(&branch, &DocId::new(id)?)
    }

    /// Delete a document from the current branch.
    pub fn delete(&self, id: &str) -> ChronResult<ObjectId> {
        self.delete_on(None, id)
    }

    /// Delete a document from a named branch.
    pub fn delete_on(&self, branch: Option<&str>, id: &str) -> ChronResult<ObjectId> {
        let branch = self.branch(branch)?;
        let id = DocId::new(id)?;
        self.run_tx(TxOptions::internal(), |ctx| {
            self.db.delete(ctx, &branch, &id)
        })
    }

    // ========================================================================
    // History and time travel
    // ========================================================================

    /// Newest-first history of a document on the current branch.
    pub fn history(&self, id: &str) -> ChronResult<Vec<HistoryEntry>> {
        let branch = self.branch(None)?;
        self.db.history(&branch, &DocId::new(id)?)
    }

    /// One page of history with cursor/since/limit windows.
    pub fn history_page(
        &self,
        id: &str,
        after: Option<ObjectId>,
        since: Option<i64>,
        limit: usize,
    ) -> ChronResult<HistoryPage> {
        let branch = self.branch(None)?;
        self.db
            .history_page(&branch, &DocId::new(id)?, after, since, limit)
    }

    /// Read a document at a branch tip or explicit commit.
    pub fn get_at(&self, at: &str, id: &str) -> ChronResult<Document> {
        let at = RefOrCommit::parse(at)?;
        self.db
            .get_at(&at, &DocId::new(id)?)?
            .ok_or_else(|| ChronError::not_found(format!("document {} at {:?}", id, at)))
    }

    /// Write a prior version as a new commit on the current branch.
    pub fn restore(&self, id: &str, commit: ObjectId) -> ChronResult<ObjectId> {
        let branch = self.branch(None)?;
        let id = DocId::new(id)?;
        self.run_tx(TxOptions::internal(), |ctx| {
            self.db.restore(ctx, &branch, &id, commit)
        })
    }

    /// One-level diff of a document between two commits.
    pub fn diff(&self, id: &str, older: ObjectId, newer: ObjectId) -> ChronResult<DocDiff> {
        self.db.diff(&DocId::new(id)?, older, newer)
    }

    // ========================================================================
    // Branches
    // ========================================================================

    /// All branches.
    pub fn branches(&self) -> ChronResult<Vec<BranchInfo>> {
        self.db.list_branches()
    }

    /// Current branch name.
    pub fn current_branch(&self) -> ChronResult<BranchName> {
        self.db.current_branch()
    }

    /// Create a branch from the current tip.
    pub fn create_branch(&self, name: &str) -> ChronResult<ObjectId> {
        self.db.create_branch(&BranchName::new(name)?, None)
    }

    /// Rebind the session to a branch.
    pub fn checkout(&self, name: &str) -> ChronResult<()> {
        self.db.checkout(&BranchName::new(name)?)
    }

    /// Delete a branch.
    pub fn delete_branch(&self, name: &str) -> ChronResult<()> {
        self.db.delete_branch(&BranchName::new(name)?)
    }

    /// Fast-forward merge `src` into `dst`.
    pub fn merge(&self, src: &str, dst: &str) -> ChronResult<MergeOutcome> {
        self.db.merge(&BranchName::new(src)?, &BranchName::new(dst)?)
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// Run a document search (index-assisted where the query allows).
    pub fn search(&self, query: &Query) -> ChronResult<SearchOutput> {
        chrondb_executor::search(&self.db, query)
    }

    /// Run a full select (joins, grouping, aggregates, projection).
    pub fn select(&self, request: &SelectRequest) -> ChronResult<SelectOutput> {
        chrondb_executor::execute_select(&self.db, request)
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Create a table schema record.
    pub fn create_table(
        &self,
        table: &str,
        columns: Vec<ColumnDef>,
        if_not_exists: bool,
    ) -> ChronResult<()> {
        let branch = self.branch(None)?;
        let table = TableName::new(table)?;
        self.run_tx(TxOptions::internal(), |ctx| {
            self.db
                .create_table(ctx, &branch, &table, columns, if_not_exists)
        })?;
        Ok(())
    }

    /// Drop a table: schema record and data.
    pub fn drop_table(&self, table: &str, if_exists: bool) -> ChronResult<()> {
        let branch = self.branch(None)?;
        let table = TableName::new(table)?;
        self.run_tx(TxOptions::internal(), |ctx| {
            self.db.drop_table(ctx, &branch, &table, if_exists)
        })?;
        Ok(())
    }

    /// Tables on the current branch.
    pub fn list_tables(&self) -> ChronResult<Vec<TableInfo>> {
        let branch = self.branch(None)?;
        self.db.list_tables(&branch)
    }

    /// Describe a table (stored schema or inferred).
    pub fn describe(&self, table: &str) -> ChronResult<SchemaRecord> {
        let branch = self.branch(None)?;
        self.db.describe(&branch, &TableName::new(table)?)
    }

    // ========================================================================
    // Instance lifecycle
    // ========================================================================

    /// Enter a batch scope; remote pushes inside it run once at scope exit.
    pub fn begin_batch(&self) -> chrondb_engine::BatchGuard<'_> {
        self.db.begin_batch()
    }

    /// Flush durable state.
    pub fn flush(&self) -> ChronResult<()> {
        self.db.flush()
    }

    /// Release this handle; the instance tears down when the last handle
    /// closes.
    pub fn close(self) -> ChronResult<bool> {
        registry::close(&self.data_dir, &self.index_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open() -> (TempDir, Chrondb) {
        let dir = TempDir::new().unwrap();
        let db = Chrondb::open(dir.path().join("data"), dir.path().join("index")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_put_get_includes_reserved_fields() {
        let (_dir, db) = open();
        db.put("user:1", json!({"name": "John", "age": 30})).unwrap();
        let doc = db.get("user:1").unwrap();
        let value = doc.to_value();
        assert_eq!(value["id"], json!("user:1"));
        assert_eq!(value["_table"], json!("user"));
        assert_eq!(value["name"], json!("John"));
        assert_eq!(value["age"], json!(30));
    }

    #[test]
    fn test_get_missing_not_found() {
        let (_dir, db) = open();
        assert!(db.get("ghost:1").unwrap_err().is_not_found());
        assert!(db.try_get("ghost:1").unwrap().is_none());
    }

    #[test]
    fn test_patch_merges_fields() {
        let (_dir, db) = open();
        db.put("user:1", json!({"name": "John", "age": 30})).unwrap();
        db.patch("user:1", json!({"age": 31})).unwrap();
        let doc = db.get("user:1").unwrap();
        assert_eq!(doc.fields["name"], json!("John"));
        assert_eq!(doc.fields["age"], json!(31));
    }

    #[test]
    fn test_put_if_version_guard() {
        let (_dir, db) = open();
        let c1 = db.put("user:1", json!({"v": 1})).unwrap();
        db.put("user:1", json!({"v": 2})).unwrap();
        let err = db
            .put_if("user:1", json!({"v": 3}), ExpectedVersion::At(c1))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_branch_flow() {
        let (_dir, db) = open();
        db.create_branch("dev").unwrap();
        db.put_on(Some("dev"), Origin::Internal, "t", "user:2", json!({"x": 1}))
            .unwrap();
        assert!(db.get("user:2").unwrap_err().is_not_found());
        assert!(db.get_on(Some("dev"), "user:2").is_ok());

        db.merge("dev", "main").unwrap();
        assert!(db.get("user:2").is_ok());
    }

    #[test]
    fn test_search_round_trip() {
        let (_dir, db) = open();
        db.put("doc:1", json!({"content": "The quick brown fox"})).unwrap();
        let out = db
            .search(&Query::new().clause(Clause::fts("content", "quick")))
            .unwrap();
        assert_eq!(out.docs.len(), 1);
        assert_eq!(out.docs[0].id.as_str(), "doc:1");

        db.delete("doc:1").unwrap();
        let out = db
            .search(&Query::new().clause(Clause::fts("content", "quick")))
            .unwrap();
        assert!(out.docs.is_empty());
    }

    #[test]
    fn test_history_and_restore() {
        let (_dir, db) = open();
        db.put("abc", json!({"value": 123})).unwrap();
        db.put("abc", json!({"value": 1234})).unwrap();
        let history = db.history("abc").unwrap();
        assert_eq!(history.len(), 2);
        let first_commit = history[1].commit_id;

        db.restore("abc", first_commit).unwrap();
        let doc = db.get("abc").unwrap();
        assert_eq!(doc.fields["value"], json!(123));
        assert_eq!(db.history("abc").unwrap().len(), 3);
    }

    #[test]
    fn test_schema_surface() {
        let (_dir, db) = open();
        db.create_table(
            "users",
            vec![
                ColumnDef::primary_key("id", "TEXT"),
                ColumnDef::new("name", "TEXT"),
            ],
            false,
        )
        .unwrap();
        let tables = db.list_tables().unwrap();
        assert!(tables.iter().any(|t| t.name.as_str() == "users" && t.has_schema));
        let record = db.describe("users").unwrap();
        assert_eq!(record.columns.len(), 2);
        db.drop_table("users", false).unwrap();
    }

    #[test]
    fn test_close_releases_instance() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        let index = dir.path().join("index");
        let a = Chrondb::open(&data, &index).unwrap();
        let b = Chrondb::open(&data, &index).unwrap();
        assert!(!a.close().unwrap());
        assert!(b.close().unwrap());
    }
}
