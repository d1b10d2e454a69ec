//! Commit engine
//!
//! `apply` turns a change set into the next commit of a branch:
//!
//! 1. Take the writer lock.
//! 2. Read the branch tip and its root tree.
//! 3. Compute the updated root with path-local edits, reusing unchanged
//!    subtree ids.
//! 4. Build the commit object; its id is known before anything is written.
//! 5. Append the change set plus a commit marker to the WAL and fsync.
//! 6. Write blob/tree/commit objects.
//! 7. CAS the branch ref; a mismatch aborts the WAL transaction and retries
//!    from step 2 under a bounded budget.
//! 8. Append the notes entry (best effort).
//! 9. Feed the index and request a reader refresh (best effort).
//! 10. Push to the remote, unless disabled or deferred by a batch scope.
//!
//! A change set that produces the same root tree as the tip is a no-op: no
//! WAL record, no commit, history untouched.

use crate::database::Database;
use chrondb_concurrency::{check_expected_version, ExpectedVersion, RetryBudget, TxContext, TxStatus};
use chrondb_core::{
    BranchName, Change, ChronError, ChronResult, Deadline, DocId, Document, ObjectId,
};
use chrondb_durability::{CommitMarker, WalEntry, WalOp, WalRecord};
use chrondb_storage::{branch_ref, paths, CasOutcome, Commit, EntryMode, Object, ObjectStore, Tree, TreeEntry};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl Database {
    /// Apply a change set to a branch, returning the new commit id.
    pub fn apply(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        changes: Vec<Change>,
        deadline: Deadline,
    ) -> ChronResult<ObjectId> {
        self.apply_full(ctx, branch, changes, None, None, deadline)
    }

    /// Apply with an explicit commit message and optional OCC check.
    pub fn apply_full(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        changes: Vec<Change>,
        message: Option<String>,
        occ: Option<(DocId, ExpectedVersion)>,
        deadline: Deadline,
    ) -> ChronResult<ObjectId> {
        if changes.is_empty() {
            return Err(ChronError::invalid_input("empty change set"));
        }
        if !ctx.is_pending() {
            return Err(ChronError::internal(format!(
                "transaction {} is not pending",
                ctx.tx_id()
            )));
        }

        let _guard = self.writer_lock().lock();
        let ref_name = branch_ref(branch);
        let mut budget = RetryBudget::new();

        loop {
            if !budget.try_attempt() {
                return Err(budget.exhausted(branch.as_str()));
            }
            deadline.check("commit apply")?;

            let tip = self
                .refs()
                .read(&ref_name)?
                .ok_or_else(|| ChronError::not_found(format!("branch {}", branch)))?;

            if let Some((id, expected)) = &occ {
                let actual = self.version_of(branch, id)?;
                check_expected_version(id, *expected, actual)?;
            }

            let base = self.objects().get_commit(&tip)?;
            let (new_root, pending) = build_updated_tree(self.objects(), base.tree, &changes)?;
            if new_root == base.tree {
                debug!(branch = %branch, "change set is a no-op");
                return Ok(tip);
            }

            let commit = Commit {
                tree: new_root,
                parents: vec![tip],
                author: ctx.user().to_string(),
                committer: self.config().committer.signature(),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
                message: message
                    .clone()
                    .unwrap_or_else(|| commit_message(&changes)),
            };
            let commit_obj = Object::Commit(commit.clone());
            let commit_id = commit_obj.id();

            // Durable intent first: records hit disk before any object write
            // or ref move.
            deadline.check("WAL append")?;
            let entries = wal_entries(&changes, &commit, commit_id)?;
            let last_seq = self
                .wal()
                .append_commit(ctx.tx_id(), branch.as_str(), &entries)?;

            if let Err(e) = deadline.check("object write") {
                self.abort_wal(ctx, branch);
                return Err(e);
            }
            for obj in &pending {
                if let Err(e) = self.objects().put(obj) {
                    self.abort_wal(ctx, branch);
                    return Err(e);
                }
            }
            if let Err(e) = self.objects().put(&commit_obj) {
                self.abort_wal(ctx, branch);
                return Err(e);
            }

            if let Err(e) = deadline.check("ref advance") {
                self.abort_wal(ctx, branch);
                return Err(e);
            }
            let cas = match self.refs().compare_and_set(&ref_name, Some(tip), commit_id) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.abort_wal(ctx, branch);
                    return Err(e);
                }
            };
            match cas {
                CasOutcome::Ok => {
                    if let Err(e) = self.checkpoint().advance(last_seq) {
                        warn!(error = %e, "checkpoint advance failed");
                    }

                    let mut record = ctx.record();
                    record.status = TxStatus::Committed;
                    if let Err(e) = self.put_note(commit_id, &record) {
                        warn!(commit = %commit_id, error = %e, "notes append failed");
                    }

                    self.index_changes(branch, &changes);

                    let outcome = self.remote().after_commit(self);
                    info!(
                        branch = %branch,
                        commit = %commit_id,
                        changes = changes.len(),
                        push = ?outcome,
                        "commit applied"
                    );
                    return Ok(commit_id);
                }
                CasOutcome::Mismatch { actual } => {
                    // A racing writer advanced the branch after we read the
                    // tip. Fence this attempt's WAL records and retry.
                    debug!(
                        branch = %branch,
                        expected = %tip,
                        actual = ?actual,
                        "ref CAS mismatch, retrying"
                    );
                    self.abort_wal(ctx, branch);
                }
            }
        }
    }

    fn abort_wal(&self, ctx: &TxContext, branch: &BranchName) {
        let entry = WalEntry {
            op: WalOp::Abort,
            doc_id: String::new(),
            payload: Vec::new(),
        };
        if let Err(e) = self
            .wal()
            .append_commit(ctx.tx_id(), branch.as_str(), &[entry])
        {
            warn!(tx = %ctx.tx_id(), error = %e, "abort marker append failed");
        }
    }

    /// Feed the index after a successful commit. Failures never abort the
    /// caller's write; the index is eventual.
    fn index_changes(&self, branch: &BranchName, changes: &[Change]) {
        for change in changes {
            // Schema records are internal bookkeeping, not search content.
            if change.table().is_schema() {
                continue;
            }
            match change {
                Change::Put(doc) => self.index().index_document(branch.as_str(), doc),
                Change::Delete(id) | Change::DeleteIn(_, id) => {
                    self.index().delete_document(branch.as_str(), id.as_str())
                }
            }
        }
        self.index().refresh(branch.as_str());
        if let Err(e) = self.write_index_tip_marker(branch) {
            warn!(branch = %branch, error = %e, "index tip marker write failed");
        }
    }
}

/// Compute the updated root tree for a change set.
///
/// Only the touched tables' subtrees are rebuilt; every other root entry
/// keeps its object id. Returns the new root id plus the objects that must be
/// written (blobs, changed subtrees, new root).
pub fn build_updated_tree(
    objects: &ObjectStore,
    base_root_id: ObjectId,
    changes: &[Change],
) -> ChronResult<(ObjectId, Vec<Object>)> {
    let mut root = objects.get_tree(&base_root_id)?;
    let mut pending: Vec<Object> = Vec::new();

    let mut by_table: BTreeMap<String, Vec<&Change>> = BTreeMap::new();
    for change in changes {
        by_table
            .entry(change.table().to_string())
            .or_default()
            .push(change);
    }

    for (table, table_changes) in by_table {
        let mut subtree = match root.get(&table) {
            Some(entry) => objects.get_tree(&entry.id)?,
            None => Tree::empty(),
        };
        for change in table_changes {
            match change {
                Change::Put(doc) => {
                    let blob = Object::Blob(doc.encode()?);
                    let blob_id = blob.id();
                    pending.push(blob);
                    subtree = subtree.with_entry(TreeEntry {
                        name: paths::doc_file_name(&doc.id),
                        mode: EntryMode::File,
                        id: blob_id,
                    })?;
                }
                Change::Delete(id) | Change::DeleteIn(_, id) => {
                    subtree = subtree.without_entry(&paths::doc_file_name(id));
                }
            }
        }
        if subtree.is_empty() {
            root = root.without_entry(&table);
        } else {
            let subtree_obj = Object::Tree(subtree);
            let subtree_id = subtree_obj.id();
            pending.push(subtree_obj);
            root = root.with_entry(TreeEntry {
                name: table,
                mode: EntryMode::Dir,
                id: subtree_id,
            })?;
        }
    }

    let root_obj = Object::Tree(root);
    let root_id = root_obj.id();
    pending.push(root_obj);
    Ok((root_id, pending))
}

/// Default commit message: op kind and document ids.
pub fn commit_message(changes: &[Change]) -> String {
    match changes {
        [single] => format!("{} {}", single.op_name(), single.doc_id()),
        many => {
            let ids: Vec<String> = many
                .iter()
                .map(|c| format!("{} {}", c.op_name(), c.doc_id()))
                .collect();
            format!("{} changes: {}", many.len(), ids.join(", "))
        }
    }
}

fn wal_entries(
    changes: &[Change],
    commit: &Commit,
    commit_id: ObjectId,
) -> ChronResult<Vec<WalEntry>> {
    let mut entries = Vec::with_capacity(changes.len() + 1);
    for change in changes {
        entries.push(match change {
            Change::Put(doc) => WalEntry {
                op: WalOp::Put,
                doc_id: doc.id.to_string(),
                payload: doc.encode()?,
            },
            Change::Delete(id) => WalEntry {
                op: WalOp::Delete,
                doc_id: id.to_string(),
                payload: Vec::new(),
            },
            // The explicit table travels in the payload; an empty payload
            // means "infer from the id prefix".
            Change::DeleteIn(table, id) => WalEntry {
                op: WalOp::Delete,
                doc_id: id.to_string(),
                payload: table.as_str().as_bytes().to_vec(),
            },
        });
    }
    let marker = CommitMarker {
        message: commit.message.clone(),
        author: commit.author.clone(),
        timestamp_ms: commit.timestamp_ms,
    };
    entries.push(WalEntry {
        op: WalOp::Commit,
        doc_id: commit_id.to_hex(),
        payload: serde_json::to_vec(&marker)
            .map_err(|e| ChronError::internal(format!("marker serialize: {}", e)))?,
    });
    Ok(entries)
}

/// Rebuild a change set from recovered WAL records.
pub fn changes_from_wal(records: &[WalRecord]) -> ChronResult<Vec<Change>> {
    let mut changes = Vec::with_capacity(records.len());
    for record in records {
        match record.op {
            WalOp::Put => changes.push(Change::Put(Document::decode(&record.payload)?)),
            WalOp::Delete => {
                let id = DocId::new(record.doc_id.clone())?;
                if record.payload.is_empty() {
                    changes.push(Change::Delete(id));
                } else {
                    let table = String::from_utf8(record.payload.clone()).map_err(|_| {
                        ChronError::corrupt("delete record table is not UTF-8")
                    })?;
                    changes.push(Change::DeleteIn(
                        chrondb_core::TableName::new(table)?,
                        id,
                    ));
                }
            }
            WalOp::Commit | WalOp::Abort => {
                return Err(ChronError::internal(
                    "marker record inside a recovered change set",
                ))
            }
        }
    }
    Ok(changes)
}
