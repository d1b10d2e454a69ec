//! History walker
//!
//! Walks a branch's commit graph newest-first along first parents, emitting
//! an entry whenever the blob at the document's path differs from its value
//! at the previous (parent) step. Commits that touched other documents are
//! skipped; deletions appear with `document = None`.
//!
//! The walk is lazy: [`HistoryIter`] reads one commit per `next()` call, so
//! `take(n)` and cursor windows do not pay for the whole chain.

use crate::database::Database;
use chrondb_core::{BranchName, ChronResult, DocId, Document, ObjectId};
use chrondb_storage::{paths, ObjectStore};

/// One history entry of a document
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Commit that changed the document
    pub commit_id: ObjectId,
    /// Commit timestamp (milliseconds since epoch)
    pub timestamp_ms: i64,
    /// Commit author (the transaction's user)
    pub author: String,
    /// Committer signature
    pub committer: String,
    /// Commit message
    pub message: String,
    /// Document content at this commit; `None` for a deletion
    pub document: Option<Document>,
}

/// Lazy newest-first history iterator
pub struct HistoryIter<'a> {
    objects: &'a ObjectStore,
    path: [String; 2],
    next_commit: Option<ObjectId>,
    failed: bool,
}

impl<'a> HistoryIter<'a> {
    pub(crate) fn new(objects: &'a ObjectStore, tip: ObjectId, path: [String; 2]) -> Self {
        HistoryIter {
            objects,
            path,
            next_commit: Some(tip),
            failed: false,
        }
    }

    fn blob_at(&self, commit: &ObjectId) -> ChronResult<Option<ObjectId>> {
        self.objects
            .resolve(commit, &[&self.path[0], &self.path[1]])
    }
}

impl<'a> Iterator for HistoryIter<'a> {
    type Item = ChronResult<HistoryEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let commit_id = self.next_commit?;
            let step = (|| -> ChronResult<(Option<HistoryEntry>, Option<ObjectId>)> {
                let commit = self.objects.get_commit(&commit_id)?;
                let here = self.blob_at(&commit_id)?;
                let parent = commit.first_parent();
                let at_parent = match &parent {
                    Some(p) => self.blob_at(p)?,
                    None => None,
                };
                if here == at_parent {
                    return Ok((None, parent));
                }
                let document = match here {
                    Some(blob_id) => {
                        let bytes = self.objects.get_blob(&blob_id)?;
                        Some(Document::decode(&bytes)?)
                    }
                    None => None,
                };
                Ok((
                    Some(HistoryEntry {
                        commit_id,
                        timestamp_ms: commit.timestamp_ms,
                        author: commit.author,
                        committer: commit.committer,
                        message: commit.message,
                        document,
                    }),
                    parent,
                ))
            })();
            match step {
                Ok((entry, parent)) => {
                    self.next_commit = parent;
                    if let Some(entry) = entry {
                        return Some(Ok(entry));
                    }
                    // No change at this commit: keep walking.
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// One page of history plus the cursor to continue from
#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Entries of this page, newest first
    pub entries: Vec<HistoryEntry>,
    /// Commit to resume after, when more entries remain
    pub next_cursor: Option<ObjectId>,
}

impl Database {
    /// Lazy history of a document on a branch, newest first.
    pub fn history_iter(
        &self,
        branch: &BranchName,
        id: &DocId,
    ) -> ChronResult<HistoryIter<'_>> {
        let tip = self.tip(branch)?;
        let path = paths::doc_path(&id.table(), id);
        Ok(HistoryIter::new(self.objects(), tip, path))
    }

    /// Complete history of a document, newest first.
    pub fn history(&self, branch: &BranchName, id: &DocId) -> ChronResult<Vec<HistoryEntry>> {
        self.history_iter(branch, id)?.collect()
    }

    /// One page of history.
    ///
    /// `after` resumes past a previously returned commit id; `since` drops
    /// entries older than the given timestamp; `limit` caps the page.
    pub fn history_page(
        &self,
        branch: &BranchName,
        id: &DocId,
        after: Option<ObjectId>,
        since: Option<i64>,
        limit: usize,
    ) -> ChronResult<HistoryPage> {
        let mut entries = Vec::new();
        let mut next_cursor = None;
        let mut resumed = after.is_none();

        for entry in self.history_iter(branch, id)? {
            let entry = entry?;
            if !resumed {
                if Some(entry.commit_id) == after {
                    resumed = true;
                }
                continue;
            }
            if let Some(since) = since {
                if entry.timestamp_ms < since {
                    break;
                }
            }
            if entries.len() == limit {
                next_cursor = entries.last().map(|e: &HistoryEntry| e.commit_id);
                break;
            }
            entries.push(entry);
        }
        Ok(HistoryPage {
            entries,
            next_cursor,
        })
    }
}
