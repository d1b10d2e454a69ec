//! Database handle: open, recovery, and document operations
//!
//! `Database::open` wires the whole instance together:
//!
//! 1. Load (or create) `chrondb.toml`.
//! 2. Take the process-exclusive repository lock.
//! 3. Open object store, ref store, WAL, checkpoint.
//! 4. Sweep stale ref locks older than 60 s.
//! 5. Seed a fresh repository (empty-tree commit on the default branch).
//! 6. Replay complete WAL transactions whose commit object is missing, then
//!    advance the checkpoint.
//! 7. Verify every branch tip resolves to a readable tree.
//! 8. Attach the index engine, reindexing branches whose persisted state is
//!    missing or stale.
//! 9. Optionally pull from the configured remote.
//!
//! Document-level operations (save/get/delete/listing) live here; the commit
//! pipeline itself is in `commit.rs`.

use crate::remote::RemoteManager;
use chrondb_concurrency::{ExpectedVersion, RepoLockFile, TxContext, WriterLock};
use chrondb_core::{
    BranchName, Change, ChronConfig, ChronError, ChronResult, Deadline, DocId, Document, ObjectId,
    TableName,
};
use chrondb_durability::{Checkpoint, Wal};
use chrondb_index::{IndexEngine, IndexSettings};
use chrondb_storage::{branch_ref, paths, Commit, ObjectStore, RefStore, Tree, STALE_LOCK_AGE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// One open ChronDB instance
pub struct Database {
    data_dir: PathBuf,
    index_dir: PathBuf,
    config: ChronConfig,
    objects: ObjectStore,
    refs: RefStore,
    wal: Wal,
    checkpoint: Checkpoint,
    index: IndexEngine,
    writer_lock: WriterLock,
    remote: RemoteManager,
    _repo_lock: RepoLockFile,
}

impl Database {
    /// Open (and create if needed) an instance over the two directories.
    pub fn open(data_dir: &Path, index_dir: &Path) -> ChronResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        std::fs::create_dir_all(index_dir)?;

        let config = ChronConfig::load_or_create(data_dir)?;
        let repo_lock = RepoLockFile::acquire(data_dir)?;

        let objects = ObjectStore::open(data_dir)?;
        let refs = RefStore::open(data_dir)?;
        refs.cleanup_stale_locks(STALE_LOCK_AGE)?;

        let wal = Wal::open(data_dir, config.durability.fsync)?;
        let checkpoint = Checkpoint::load(data_dir)?;

        let index = IndexEngine::open(
            index_dir,
            IndexSettings {
                refresh_interval: Duration::from_millis(config.index.refresh_interval_ms),
                cache_capacity: config.index.result_cache_capacity,
            },
        )?;
        let remote = RemoteManager::new(&config.remote)?;

        let db = Database {
            data_dir: data_dir.to_path_buf(),
            index_dir: index_dir.to_path_buf(),
            config,
            objects,
            refs,
            wal,
            checkpoint,
            index,
            writer_lock: WriterLock::new(),
            remote,
            _repo_lock: repo_lock,
        };

        db.seed_if_empty()?;
        db.recover()?;
        db.verify_branch_tips()?;
        db.attach_indexes()?;

        if db.config.remote.pull_on_start {
            if let Err(e) = db.pull() {
                warn!(error = %e, "pull on start failed, continuing with local state");
            }
        }

        info!(
            data_dir = %data_dir.display(),
            index_dir = %index_dir.display(),
            "database open"
        );
        Ok(db)
    }

    fn seed_if_empty(&self) -> ChronResult<()> {
        let default = self.default_branch()?;
        let ref_name = branch_ref(&default);
        if self.refs.read(&ref_name)?.is_some() {
            // A lost HEAD (partial crash during creation) falls back to the
            // default branch.
            if self.refs.read_head().is_err() {
                self.refs.write_head(&default)?;
            }
            return Ok(());
        }
        let empty_tree = self.objects.put_tree(Tree::empty())?;
        // Deterministic seed: every fresh repository shares the same root
        // commit id, so two repositories wired to one remote start related.
        let commit_id = self.objects.put_commit(Commit {
            tree: empty_tree,
            parents: vec![],
            author: "internal".to_string(),
            committer: "ChronDB <chrondb@localhost>".to_string(),
            timestamp_ms: 0,
            message: "Initial commit".to_string(),
        })?;
        self.refs.force_set(&ref_name, commit_id)?;
        self.refs.write_head(&default)?;
        info!(branch = %default, commit = %commit_id, "repository seeded");
        Ok(())
    }

    fn recover(&self) -> ChronResult<()> {
        let plan = chrondb_durability::scan(&self.wal, self.checkpoint.last_applied_seq())?;
        if plan.is_empty() {
            return Ok(());
        }
        let mut replayed = 0usize;
        for tx in &plan.complete {
            if self.objects.contains(&tx.commit_id) {
                continue;
            }
            let branch = BranchName::new(tx.branch.clone())?;
            let changes = crate::commit::changes_from_wal(&tx.changes)?;
            if changes.is_empty() {
                continue;
            }
            let mut ctx = TxContext::begin(chrondb_concurrency::TxOptions::internal());
            match self.apply(&mut ctx, &branch, changes, Deadline::none()) {
                Ok(_) => replayed += 1,
                Err(e) => {
                    warn!(tx = %tx.tx_id, error = %e, "recovery replay failed");
                }
            }
        }
        self.checkpoint.advance(plan.max_seq)?;
        info!(
            replayed,
            incomplete = plan.incomplete,
            aborted = plan.aborted,
            "recovery finished"
        );
        Ok(())
    }

    fn verify_branch_tips(&self) -> ChronResult<()> {
        for branch in self.refs.list_branches()? {
            let ref_name = branch_ref(&branch);
            let tip = self
                .refs
                .read(&ref_name)?
                .ok_or_else(|| ChronError::corrupt(format!("branch {} lost its ref", branch)))?;
            let commit = self.objects.get_commit(&tip).map_err(|e| {
                ChronError::corrupt(format!("branch {} tip {} unreadable: {}", branch, tip, e))
            })?;
            self.objects.get_tree(&commit.tree).map_err(|e| {
                ChronError::corrupt(format!("branch {} root tree unreadable: {}", branch, e))
            })?;
        }
        Ok(())
    }

    fn attach_indexes(&self) -> ChronResult<()> {
        for branch in self.refs.list_branches()? {
            let tip = self.tip(&branch)?;
            let marker = self.index_tip_marker(&branch);
            let fresh = match std::fs::read_to_string(&marker) {
                Ok(text) => text.trim() == tip.to_hex(),
                Err(_) => false,
            };
            if !fresh {
                let indexed = self.reindex(&branch)?;
                info!(branch = %branch, indexed, "branch reindexed from object store");
            }
        }
        Ok(())
    }

    fn index_tip_marker(&self, branch: &BranchName) -> PathBuf {
        self.index_dir.join(branch.as_str()).join("TIP")
    }

    pub(crate) fn write_index_tip_marker(&self, branch: &BranchName) -> ChronResult<()> {
        let tip = self.tip(branch)?;
        let marker = self.index_tip_marker(branch);
        if let Some(dir) = marker.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&marker, tip.to_hex())?;
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Index directory.
    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    /// Loaded configuration.
    pub fn config(&self) -> &ChronConfig {
        &self.config
    }

    /// Object store.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Ref store.
    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Write-ahead log.
    pub(crate) fn wal(&self) -> &Wal {
        &self.wal
    }

    /// Checkpoint.
    pub(crate) fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Index engine.
    pub fn index(&self) -> &IndexEngine {
        &self.index
    }

    /// Writer lock serializing commit-engine mutations.
    pub(crate) fn writer_lock(&self) -> &WriterLock {
        &self.writer_lock
    }

    /// Remote manager.
    pub fn remote(&self) -> &RemoteManager {
        &self.remote
    }

    /// Configured default branch.
    pub fn default_branch(&self) -> ChronResult<BranchName> {
        BranchName::new(self.config.default_branch.clone())
    }

    /// Branch the session is currently on (`HEAD`).
    pub fn current_branch(&self) -> ChronResult<BranchName> {
        self.refs.read_head()
    }

    /// Tip commit of a branch.
    pub fn tip(&self, branch: &BranchName) -> ChronResult<ObjectId> {
        self.refs
            .read(&branch_ref(branch))?
            .ok_or_else(|| ChronError::not_found(format!("branch {}", branch)))
    }

    // ========================================================================
    // Document operations
    // ========================================================================

    /// Write a document (create or replace).
    pub fn save(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        doc: Document,
    ) -> ChronResult<ObjectId> {
        self.apply(ctx, branch, vec![Change::Put(doc)], Deadline::none())
    }

    /// Write a document only if its current version matches `expected`.
    pub fn save_with_version(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        doc: Document,
        expected: ExpectedVersion,
    ) -> ChronResult<ObjectId> {
        let occ = Some((doc.id.clone(), expected));
        self.apply_full(
            ctx,
            branch,
            vec![Change::Put(doc)],
            None,
            occ,
            Deadline::none(),
        )
    }

    /// Shallow-merge `incoming` into the current version and write the result.
    ///
    /// Saving against a missing document creates it.
    pub fn save_merged(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        id: &DocId,
        incoming: serde_json::Map<String, serde_json::Value>,
    ) -> ChronResult<ObjectId> {
        let doc = match self.get(branch, id)? {
            Some(current) => current.merged_with(&incoming),
            None => Document::new(id.clone(), incoming)?,
        };
        self.save(ctx, branch, doc)
    }

    /// Read a document at the branch tip.
    pub fn get(&self, branch: &BranchName, id: &DocId) -> ChronResult<Option<Document>> {
        self.get_in_table(branch, &id.table(), id)
    }

    /// Read a document from an explicit table at the branch tip.
    pub fn get_in_table(
        &self,
        branch: &BranchName,
        table: &TableName,
        id: &DocId,
    ) -> ChronResult<Option<Document>> {
        let tip = self.tip(branch)?;
        self.get_at_commit(&tip, table, id)
    }

    /// Read a document out of an arbitrary commit's tree.
    pub fn get_at_commit(
        &self,
        commit: &ObjectId,
        table: &TableName,
        id: &DocId,
    ) -> ChronResult<Option<Document>> {
        let [dir, file] = paths::doc_path(table, id);
        match self.objects.resolve(commit, &[&dir, &file])? {
            None => Ok(None),
            Some(blob_id) => {
                let bytes = self.objects.get_blob(&blob_id)?;
                Ok(Some(Document::decode(&bytes)?))
            }
        }
    }

    /// Tombstone a document. `NotFound` when it does not exist.
    pub fn delete(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        id: &DocId,
    ) -> ChronResult<ObjectId> {
        if self.get(branch, id)?.is_none() {
            return Err(ChronError::not_found(format!("document {}", id)));
        }
        self.apply(ctx, branch, vec![Change::Delete(id.clone())], Deadline::none())
    }

    /// Delete every document of a table in one commit.
    pub fn delete_table(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        table: &TableName,
    ) -> ChronResult<Option<ObjectId>> {
        let ids = self.list_ids(branch, table)?;
        if ids.is_empty() {
            return Ok(None);
        }
        let changes = ids
            .into_iter()
            .map(|id| Change::DeleteIn(table.clone(), id))
            .collect();
        Ok(Some(self.apply(ctx, branch, changes, Deadline::none())?))
    }

    /// All document ids of a table at the branch tip, sorted.
    pub fn list_ids(&self, branch: &BranchName, table: &TableName) -> ChronResult<Vec<DocId>> {
        let tip = self.tip(branch)?;
        let commit = self.objects.get_commit(&tip)?;
        let root = self.objects.get_tree(&commit.tree)?;
        let entry = match root.get(table.as_str()) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        let table_tree = self.objects.get_tree(&entry.id)?;
        let mut ids: Vec<DocId> = table_tree
            .entries()
            .iter()
            .filter_map(|e| paths::parse_doc_file_name(&e.name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// All documents of a table at the branch tip, in id order.
    pub fn list_by_table(
        &self,
        branch: &BranchName,
        table: &TableName,
    ) -> ChronResult<Vec<Document>> {
        let mut out = Vec::new();
        for id in self.list_ids(branch, table)? {
            if let Some(doc) = self.get_in_table(branch, table, &id)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Documents whose id starts with `prefix`, across tables, in id order.
    pub fn list_by_prefix(
        &self,
        branch: &BranchName,
        prefix: &str,
    ) -> ChronResult<Vec<Document>> {
        let mut out = Vec::new();
        for table in self.table_names(branch)? {
            for id in self.list_ids(branch, &table)? {
                if id.as_str().starts_with(prefix) {
                    if let Some(doc) = self.get_in_table(branch, &table, &id)? {
                        out.push(doc);
                    }
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Number of documents in a table.
    pub fn count(&self, branch: &BranchName, table: &TableName) -> ChronResult<usize> {
        Ok(self.list_ids(branch, table)?.len())
    }

    /// Table directories present at the branch tip (schema table excluded).
    pub fn table_names(&self, branch: &BranchName) -> ChronResult<Vec<TableName>> {
        let tip = self.tip(branch)?;
        let commit = self.objects.get_commit(&tip)?;
        let root = self.objects.get_tree(&commit.tree)?;
        let mut out = Vec::new();
        for entry in root.entries() {
            let table = TableName::new(entry.name.clone())?;
            if !table.is_schema() {
                out.push(table);
            }
        }
        Ok(out)
    }

    /// Commit id of the last write touching a document, if any.
    ///
    /// This is the document's OCC version.
    pub fn version_of(&self, branch: &BranchName, id: &DocId) -> ChronResult<Option<ObjectId>> {
        match self.history_iter(branch, id)?.next() {
            Some(entry) => Ok(Some(entry?.commit_id)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Rebuild a branch's index from the object store.
    pub fn reindex(&self, branch: &BranchName) -> ChronResult<usize> {
        self.index.drop_branch(branch.as_str())?;
        let mut indexed = 0usize;
        for table in self.table_names(branch)? {
            for doc in self.list_by_table(branch, &table)? {
                self.index.index_document(branch.as_str(), &doc);
                indexed += 1;
            }
        }
        self.index.refresh(branch.as_str());
        self.index.persist()?;
        self.write_index_tip_marker(branch)?;
        Ok(indexed)
    }

    /// Flush durable state: WAL sync and index persistence.
    pub fn flush(&self) -> ChronResult<()> {
        self.wal.sync()?;
        self.index.persist()?;
        for branch in self.refs.list_branches()? {
            self.write_index_tip_marker(&branch)?;
        }
        Ok(())
    }

    /// Flush and release the instance's resources.
    pub fn close(&self) -> ChronResult<()> {
        self.flush()?;
        info!(data_dir = %self.data_dir.display(), "database closed");
        Ok(())
    }
}
