//! Optimistic concurrency control
//!
//! Per-document versions are commit ids: the version of a document is the id
//! of the commit that last wrote it. `save(doc, expected_version)` passes the
//! commit id the caller read the document at; a mismatch against the current
//! value returns `VersionConflict` and the caller retries with fresh state.
//!
//! Branch-ref CAS retries are bounded by a [`RetryBudget`]; exhausting it
//! surfaces `WriteContention`.

use chrondb_core::{ChronError, ChronResult, DocId, ObjectId};

/// Bound on commit-engine CAS retries before reporting contention.
pub const MAX_CAS_RETRIES: u32 = 8;

/// Expected document version carried by a conditional save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check; the write is unconditional
    Any,
    /// The document must not currently exist
    Absent,
    /// The document must have last been written at this commit
    At(ObjectId),
}

/// Validate an expected version against the observed one.
///
/// `actual` is the commit id the document was last written at, or `None` when
/// the document does not exist on the branch.
pub fn check_expected_version(
    doc_id: &DocId,
    expected: ExpectedVersion,
    actual: Option<ObjectId>,
) -> ChronResult<()> {
    match (expected, actual) {
        (ExpectedVersion::Any, _) => Ok(()),
        (ExpectedVersion::Absent, None) => Ok(()),
        (ExpectedVersion::Absent, Some(actual)) => Err(ChronError::version_conflict(
            doc_id.as_str(),
            "absent",
            actual.to_hex(),
        )),
        (ExpectedVersion::At(expected), Some(actual)) if expected == actual => Ok(()),
        (ExpectedVersion::At(expected), Some(actual)) => Err(ChronError::version_conflict(
            doc_id.as_str(),
            expected.to_hex(),
            actual.to_hex(),
        )),
        (ExpectedVersion::At(expected), None) => Err(ChronError::version_conflict(
            doc_id.as_str(),
            expected.to_hex(),
            "absent",
        )),
    }
}

/// Bounded retry counter for ref CAS loops
#[derive(Debug)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
}

impl RetryBudget {
    /// Budget with the default bound.
    pub fn new() -> Self {
        Self::with_max(MAX_CAS_RETRIES)
    }

    /// Budget with a custom bound.
    pub fn with_max(max: u32) -> Self {
        RetryBudget { attempts: 0, max }
    }

    /// Register an attempt; `false` when the budget is spent.
    pub fn try_attempt(&mut self) -> bool {
        if self.attempts >= self.max {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `WriteContention` error for a spent budget.
    pub fn exhausted(&self, branch: &str) -> ChronError {
        ChronError::write_contention(branch, self.attempts)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget::new()
    }
}
