//! Multi-branch index engine
//!
//! Owns one [`BranchIndex`] per branch, the shared result cache, and the
//! on-disk persistence of stored fields under `<index_path>/<branch>/`.
//! Postings are rebuilt from stored fields at load time; losing the index
//! directory entirely is recoverable by reindexing from the object store.
//!
//! Index results are candidate ids only. Callers resolve every id against
//! the object store at the branch tip (or a caller-supplied commit) before
//! returning documents.

use crate::branch::BranchIndex;
use crate::cache::ResultCache;
use crate::inverted::flatten_fields;
use crate::search::{execute, SearchResults};
use chrondb_core::{ChronError, ChronResult, Document, Query};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// File holding a branch's stored fields, one JSON object per line.
const DOCS_FILE: &str = "docs.jsonl";

/// Engine settings
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Reader refresh cadence
    pub refresh_interval: Duration,
    /// Result cache capacity (0 disables)
    pub cache_capacity: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            refresh_interval: Duration::from_secs(1),
            cache_capacity: 256,
        }
    }
}

/// Per-instance index engine
pub struct IndexEngine {
    index_dir: PathBuf,
    branches: DashMap<String, Arc<BranchIndex>>,
    cache: ResultCache,
    settings: IndexSettings,
}

impl IndexEngine {
    /// Open the engine over `index_dir`, loading any persisted branches.
    pub fn open(index_dir: &Path, settings: IndexSettings) -> ChronResult<Self> {
        std::fs::create_dir_all(index_dir)?;
        let engine = IndexEngine {
            index_dir: index_dir.to_path_buf(),
            branches: DashMap::new(),
            cache: ResultCache::new(settings.cache_capacity),
            settings,
        };
        engine.load_persisted()?;
        Ok(engine)
    }

    fn load_persisted(&self) -> ChronResult<()> {
        for entry in std::fs::read_dir(&self.index_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let branch = entry.file_name().to_string_lossy().to_string();
            let docs_path = entry.path().join(DOCS_FILE);
            if !docs_path.exists() {
                continue;
            }
            let index = self.branch(&branch);
            let file = std::fs::File::open(&docs_path)?;
            let mut loaded = 0usize;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let row: PersistedDoc = match serde_json::from_str(&line) {
                    Ok(row) => row,
                    Err(e) => {
                        warn!(branch, error = %e, "skipping bad index row");
                        continue;
                    }
                };
                index.index_document(&row.id, row.fields);
                loaded += 1;
            }
            index.refresh();
            info!(branch, loaded, "index branch loaded");
        }
        Ok(())
    }

    /// Get (or lazily create) a branch index.
    pub fn branch(&self, branch: &str) -> Arc<BranchIndex> {
        self.branches
            .entry(branch.to_string())
            .or_insert_with(|| Arc::new(BranchIndex::new(self.settings.refresh_interval)))
            .clone()
    }

    /// Index (or replace) a document. Invalidates the branch's cached pages.
    pub fn index_document(&self, branch: &str, doc: &Document) {
        let mut fields = flatten_fields(&doc.fields);
        fields.insert("id".to_string(), Value::String(doc.id.to_string()));
        fields.insert("_table".to_string(), Value::String(doc.table.to_string()));
        self.branch(branch).index_document(doc.id.as_str(), fields);
        self.cache.invalidate_branch(branch);
    }

    /// Remove a document. Invalidates the branch's cached pages.
    pub fn delete_document(&self, branch: &str, doc_id: &str) {
        self.branch(branch).delete_document(doc_id);
        self.cache.invalidate_branch(branch);
    }

    /// Publish pending writes to readers immediately (refresh-on-commit).
    pub fn refresh(&self, branch: &str) {
        self.branch(branch).refresh();
    }

    /// Execute a query against a branch's current reader.
    pub fn search_query(&self, branch: &str, query: &Query) -> ChronResult<SearchResults> {
        let fingerprint = serde_json::to_string(query)
            .map_err(|e| ChronError::index_unavailable(format!("query fingerprint: {}", e)))?;
        if let Some(cached) = self.cache.get(branch, &fingerprint) {
            return Ok(cached);
        }
        let reader = self.branch(branch).reader();
        let results = execute(&reader, query)?;
        self.cache.put(branch, &fingerprint, results.clone());
        Ok(results)
    }

    /// Drop a branch's index entirely (branch deletion, reindex).
    pub fn drop_branch(&self, branch: &str) -> ChronResult<()> {
        self.branches.remove(branch);
        self.cache.invalidate_branch(branch);
        let dir = self.index_dir.join(branch);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Branches currently held in memory.
    pub fn branch_names(&self) -> Vec<String> {
        self.branches.iter().map(|e| e.key().clone()).collect()
    }

    /// Persist every branch's stored fields to the index directory.
    ///
    /// Written atomically per branch (temp file + rename). Called on flush
    /// and close; losing this data only costs a reindex.
    pub fn persist(&self) -> ChronResult<()> {
        for entry in self.branches.iter() {
            let branch = entry.key();
            let index = entry.value();
            let dir = self.index_dir.join(branch);
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(DOCS_FILE);
            let tmp = dir.join(format!("{}.tmp", DOCS_FILE));
            let mut file = std::fs::File::create(&tmp)?;
            let reader = index.reader_no_refresh();
            for doc_id in reader.doc_ids() {
                if let Some(doc) = reader.doc(doc_id) {
                    let row = PersistedDoc {
                        id: doc_id.clone(),
                        fields: doc.fields.clone(),
                    };
                    let line = serde_json::to_string(&row)
                        .map_err(|e| ChronError::index_unavailable(e.to_string()))?;
                    file.write_all(line.as_bytes())?;
                    file.write_all(b"\n")?;
                }
            }
            file.sync_all()?;
            std::fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Result cache statistics `(hits, misses)`.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.stats()
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedDoc {
    id: String,
    fields: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrondb_core::{Clause, DocId};
    use serde_json::json;
    use tempfile::TempDir;

    fn settings() -> IndexSettings {
        IndexSettings {
            refresh_interval: Duration::ZERO,
            cache_capacity: 16,
        }
    }

    fn doc(id: &str, payload: Value) -> Document {
        Document::from_value(DocId::new(id).unwrap(), payload).unwrap()
    }

    #[test]
    fn test_index_and_search() {
        let dir = TempDir::new().unwrap();
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        engine.index_document("main", &doc("doc:1", json!({"content": "The quick brown fox"})));
        engine.refresh("main");

        let q = Query::new().clause(Clause::fts("content", "quick"));
        let r = engine.search_query("main", &q).unwrap();
        assert_eq!(r.ids(), vec!["doc:1"]);
    }

    #[test]
    fn test_delete_visible_after_refresh_on_commit() {
        let dir = TempDir::new().unwrap();
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        engine.index_document("main", &doc("doc:1", json!({"content": "quick"})));
        engine.refresh("main");
        engine.delete_document("main", "doc:1");
        engine.refresh("main");

        let q = Query::new().clause(Clause::fts("content", "quick"));
        let r = engine.search_query("main", &q).unwrap();
        assert!(r.ids().is_empty());
    }

    #[test]
    fn test_branch_isolation() {
        let dir = TempDir::new().unwrap();
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        engine.index_document("dev", &doc("user:2", json!({"name": "Eve"})));
        engine.refresh("dev");

        let q = Query::new().clause(Clause::term("name", "Eve"));
        assert_eq!(engine.search_query("dev", &q).unwrap().total, 1);
        assert_eq!(engine.search_query("main", &q).unwrap().total, 0);
    }

    #[test]
    fn test_cache_invalidated_on_write() {
        let dir = TempDir::new().unwrap();
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        engine.index_document("main", &doc("a", json!({"x": "v"})));
        engine.refresh("main");

        let q = Query::new().clause(Clause::term("x", "v"));
        assert_eq!(engine.search_query("main", &q).unwrap().total, 1);
        // Cached now
        assert_eq!(engine.search_query("main", &q).unwrap().total, 1);
        let (hits, _) = engine.cache_stats();
        assert!(hits >= 1);

        engine.index_document("main", &doc("b", json!({"x": "v"})));
        engine.refresh("main");
        assert_eq!(engine.search_query("main", &q).unwrap().total, 2);
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        {
            let engine = IndexEngine::open(dir.path(), settings()).unwrap();
            engine.index_document("main", &doc("user:1", json!({"name": "John", "age": 30})));
            engine.refresh("main");
            engine.persist().unwrap();
        }
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        let q = Query::new().clause(Clause::term("name", "John"));
        assert_eq!(engine.search_query("main", &q).unwrap().ids(), vec!["user:1"]);
    }

    #[test]
    fn test_drop_branch_removes_disk_state() {
        let dir = TempDir::new().unwrap();
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        engine.index_document("dev", &doc("a", json!({"x": 1})));
        engine.refresh("dev");
        engine.persist().unwrap();
        assert!(dir.path().join("dev").exists());

        engine.drop_branch("dev").unwrap();
        assert!(!dir.path().join("dev").exists());
        let q = Query::new().clause(Clause::exists("x"));
        assert_eq!(engine.search_query("dev", &q).unwrap().total, 0);
    }

    #[test]
    fn test_reserved_fields_searchable() {
        let dir = TempDir::new().unwrap();
        let engine = IndexEngine::open(dir.path(), settings()).unwrap();
        engine.index_document("main", &doc("user:1", json!({"name": "John"})));
        engine.refresh("main");

        let q = Query::new().clause(Clause::term("_table", "user"));
        assert_eq!(engine.search_query("main", &q).unwrap().ids(), vec!["user:1"]);
    }
}
