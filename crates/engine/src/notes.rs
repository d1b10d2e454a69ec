//! Notes sidecar
//!
//! Transaction metadata lives in its own commit chain on `refs/notes/chrondb`.
//! Each notes commit's tree maps main-chain commit ids (hex entry names) to
//! blobs of transaction-record JSON. Appending a note adds one entry to the
//! prior notes tree; reading walks the current notes tip only.
//!
//! Notes are best effort: a missing note never fails a read, and a failed
//! notes append never rolls back the commit it annotates.

use crate::database::Database;
use chrondb_concurrency::TxRecord;
use chrondb_core::{ChronError, ChronResult, ObjectId};
use chrondb_storage::{CasOutcome, Commit, EntryMode, Object, Tree, TreeEntry, NOTES_REF};
use tracing::debug;

impl Database {
    /// Append a note mapping `commit_id` to its transaction record.
    pub fn put_note(&self, commit_id: ObjectId, record: &TxRecord) -> ChronResult<()> {
        let json = serde_json::to_vec(record)
            .map_err(|e| ChronError::internal(format!("tx record serialize: {}", e)))?;
        let blob = Object::Blob(json);
        let blob_id = blob.id();

        // Bounded retry against a concurrent notes writer in another process.
        for _ in 0..4 {
            let tip = self.refs().read(NOTES_REF)?;
            let base_tree = match &tip {
                Some(id) => self.objects().get_tree(&self.objects().get_commit(id)?.tree)?,
                None => Tree::empty(),
            };
            let tree = base_tree.with_entry(TreeEntry {
                name: commit_id.to_hex(),
                mode: EntryMode::File,
                id: blob_id,
            })?;
            let tree_obj = Object::Tree(tree);
            let tree_id = tree_obj.id();

            let notes_commit = Commit {
                tree: tree_id,
                parents: tip.into_iter().collect(),
                author: record.user.clone(),
                committer: self.config().committer.signature(),
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
                message: format!("note for {}", commit_id),
            };
            let commit_obj = Object::Commit(notes_commit);
            let new_tip = commit_obj.id();

            self.objects().put(&blob)?;
            self.objects().put(&tree_obj)?;
            self.objects().put(&commit_obj)?;

            // The tree was built against `tip`; CAS from exactly there.
            match self.refs().compare_and_set(NOTES_REF, tip, new_tip)? {
                CasOutcome::Ok => {
                    debug!(commit = %commit_id, note = %new_tip, "note appended");
                    return Ok(());
                }
                CasOutcome::Mismatch { .. } => continue,
            }
        }
        Err(ChronError::write_contention("notes/chrondb", 4))
    }

    /// Read the note for a commit; `None` when absent.
    pub fn get_note(&self, commit_id: &ObjectId) -> ChronResult<Option<TxRecord>> {
        let tip = match self.refs().read(NOTES_REF)? {
            Some(tip) => tip,
            None => return Ok(None),
        };
        let tree = self
            .objects()
            .get_tree(&self.objects().get_commit(&tip)?.tree)?;
        let entry = match tree.get(&commit_id.to_hex()) {
            Some(e) => e,
            None => return Ok(None),
        };
        let bytes = self.objects().get_blob(&entry.id)?;
        let record = serde_json::from_slice(&bytes)
            .map_err(|e| ChronError::corrupt(format!("bad note payload: {}", e)))?;
        Ok(Some(record))
    }
}
