//! Branch manager
//!
//! A branch is an isolated chronological line of commits; SQL surfaces treat
//! it as a schema. Creation points a new ref at an existing tip, checkout
//! rebinds `HEAD`, and merge is fast-forward only: it succeeds exactly when
//! one tip is an ancestor of the other, otherwise nothing moves and the
//! caller gets `MergeConflict`.

use crate::database::Database;
use chrondb_core::{BranchName, ChronError, ChronResult, ObjectId};
use chrondb_storage::{branch_ref, CasOutcome, ObjectStore};
use std::collections::HashSet;
use tracing::info;

/// Summary of one branch
#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    /// Branch name
    pub name: BranchName,
    /// Tip commit
    pub tip: ObjectId,
    /// Whether this branch is the session's current branch
    pub current: bool,
}

/// Outcome of a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Destination tip moved forward to the source tip
    FastForward {
        /// New destination tip
        tip: ObjectId,
    },
    /// Source is already contained in the destination; nothing moved
    AlreadyMerged,
}

/// Check whether `ancestor` is reachable from `descendant` through parents.
pub fn is_ancestor(
    objects: &ObjectStore,
    ancestor: &ObjectId,
    descendant: &ObjectId,
) -> ChronResult<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut stack = vec![*descendant];
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let commit = objects.get_commit(&current)?;
        for parent in commit.parents {
            if parent == *ancestor {
                return Ok(true);
            }
            stack.push(parent);
        }
    }
    Ok(false)
}

impl Database {
    /// All branches with their tips, sorted by name.
    pub fn list_branches(&self) -> ChronResult<Vec<BranchInfo>> {
        let current = self.current_branch()?;
        let mut out = Vec::new();
        for name in self.refs().list_branches()? {
            let tip = self.tip(&name)?;
            let is_current = name == current;
            out.push(BranchInfo {
                name,
                tip,
                current: is_current,
            });
        }
        Ok(out)
    }

    /// Create a branch pointing at `from` (default: the current branch tip).
    pub fn create_branch(
        &self,
        name: &BranchName,
        from: Option<ObjectId>,
    ) -> ChronResult<ObjectId> {
        let start = match from {
            Some(commit) => {
                // The start point must be a real commit.
                self.objects().get_commit(&commit)?;
                commit
            }
            None => self.tip(&self.current_branch()?)?,
        };
        let ref_name = branch_ref(name);
        match self.refs().compare_and_set(&ref_name, None, start)? {
            CasOutcome::Ok => {
                // The new branch sees everything at its start point; its
                // index is populated from the store right away.
                let indexed = self.reindex(name)?;
                info!(branch = %name, tip = %start, indexed, "branch created");
                Ok(start)
            }
            CasOutcome::Mismatch { .. } => Err(ChronError::invalid_input(format!(
                "branch {} already exists",
                name
            ))),
        }
    }

    /// Rebind the session's current branch (`HEAD`).
    pub fn checkout(&self, name: &BranchName) -> ChronResult<()> {
        // Checking out a branch that does not exist is an error.
        self.tip(name)?;
        self.refs().write_head(name)?;
        info!(branch = %name, "checked out");
        Ok(())
    }

    /// Delete a branch. The default branch and the current branch are
    /// protected.
    pub fn delete_branch(&self, name: &BranchName) -> ChronResult<()> {
        if *name == self.default_branch()? {
            return Err(ChronError::invalid_input(format!(
                "cannot delete the default branch {}",
                name
            )));
        }
        if *name == self.current_branch()? {
            return Err(ChronError::invalid_input(format!(
                "cannot delete the checked-out branch {}",
                name
            )));
        }
        self.refs().delete(&branch_ref(name))?;
        self.index().drop_branch(name.as_str())?;
        info!(branch = %name, "branch deleted");
        Ok(())
    }

    /// Fast-forward merge of `src` into `dst`.
    pub fn merge(&self, src: &BranchName, dst: &BranchName) -> ChronResult<MergeOutcome> {
        let _guard = self.writer_lock().lock();
        let src_tip = self.tip(src)?;
        let dst_tip = self.tip(dst)?;

        if is_ancestor(self.objects(), &src_tip, &dst_tip)? {
            return Ok(MergeOutcome::AlreadyMerged);
        }
        if !is_ancestor(self.objects(), &dst_tip, &src_tip)? {
            return Err(ChronError::MergeConflict {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        match self
            .refs()
            .compare_and_set(&branch_ref(dst), Some(dst_tip), src_tip)?
        {
            CasOutcome::Ok => {}
            CasOutcome::Mismatch { .. } => {
                return Err(ChronError::write_contention(dst.as_str(), 1))
            }
        }

        // The destination index catches up by rebuild; a fast-forward can
        // carry any number of commits.
        let indexed = self.reindex(dst)?;
        info!(src = %src, dst = %dst, tip = %src_tip, indexed, "fast-forward merge");
        Ok(MergeOutcome::FastForward { tip: src_tip })
    }
}
