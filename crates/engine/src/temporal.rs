//! Temporal accessors: point-in-time reads, restore, diff
//!
//! `get_at` is the one canonical snapshot read; every surface that offers
//! time travel routes through it. `restore` never rewrites history: it loads
//! a prior version and writes it as a brand-new commit, so the chain gains
//! exactly one entry. `diff` compares two versions at one level of key depth.

use crate::database::Database;
use chrondb_concurrency::TxContext;
use chrondb_core::{
    BranchName, Change, ChronError, ChronResult, Deadline, DocId, Document, ObjectId,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// A branch name or an explicit commit id
#[derive(Debug, Clone, PartialEq)]
pub enum RefOrCommit {
    /// Resolve at the branch tip
    Branch(BranchName),
    /// Resolve at this commit
    Commit(ObjectId),
}

impl RefOrCommit {
    /// Parse a string: 32 hex characters are a commit id, anything else a
    /// branch name.
    pub fn parse(s: &str) -> ChronResult<Self> {
        match ObjectId::from_hex(s) {
            Ok(id) => Ok(RefOrCommit::Commit(id)),
            Err(_) => Ok(RefOrCommit::Branch(BranchName::new(s)?)),
        }
    }
}

/// One-level diff between two versions of a document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocDiff {
    /// Keys present only in the newer version
    pub added: BTreeMap<String, Value>,
    /// Keys present only in the older version
    pub removed: BTreeMap<String, Value>,
    /// Keys present in both with different values: key → (old, new)
    pub changed: BTreeMap<String, (Value, Value)>,
}

impl DocDiff {
    /// Check whether the two versions are identical.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl Database {
    /// Read a document at a branch tip or at an explicit commit.
    pub fn get_at(&self, at: &RefOrCommit, id: &DocId) -> ChronResult<Option<Document>> {
        let commit = match at {
            RefOrCommit::Branch(branch) => self.tip(branch)?,
            RefOrCommit::Commit(commit) => *commit,
        };
        self.get_at_commit(&commit, &id.table(), id)
    }

    /// Write a prior version of a document as a new commit on `branch`.
    pub fn restore(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        id: &DocId,
        commit_id: ObjectId,
    ) -> ChronResult<ObjectId> {
        let doc = self
            .get_at(&RefOrCommit::Commit(commit_id), id)?
            .ok_or_else(|| {
                ChronError::not_found(format!("document {} at commit {}", id, commit_id))
            })?;
        let message = format!("Restore {} to commit {}", id, commit_id);
        self.apply_full(
            ctx,
            branch,
            vec![Change::Put(doc)],
            Some(message),
            None,
            Deadline::none(),
        )
    }

    /// One-level diff of a document between two commits.
    ///
    /// A version where the document is absent diffs as the empty map, so a
    /// deletion shows every key as removed.
    pub fn diff(&self, id: &DocId, older: ObjectId, newer: ObjectId) -> ChronResult<DocDiff> {
        let old_fields = self
            .get_at(&RefOrCommit::Commit(older), id)?
            .map(|d| d.fields)
            .unwrap_or_default();
        let new_fields = self
            .get_at(&RefOrCommit::Commit(newer), id)?
            .map(|d| d.fields)
            .unwrap_or_default();

        let mut diff = DocDiff::default();
        for (key, new_value) in &new_fields {
            match old_fields.get(key) {
                None => {
                    diff.added.insert(key.clone(), new_value.clone());
                }
                Some(old_value) if old_value != new_value => {
                    diff.changed
                        .insert(key.clone(), (old_value.clone(), new_value.clone()));
                }
                Some(_) => {}
            }
        }
        for (key, old_value) in &old_fields {
            if !new_fields.contains_key(key) {
                diff.removed.insert(key.clone(), old_value.clone());
            }
        }
        Ok(diff)
    }
}
