//! Error types for ChronDB
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Categories
//!
//! - **Not Found**: object, ref, or document absent
//! - **Conflict**: OCC version mismatch, CAS retry exhaustion, non-fast-forward merge
//! - **Document**: JSON encode/decode failures
//! - **Storage**: corruption and low-level I/O failures
//! - **Index**: index read/write failures (degradable, never fatal to a commit)
//! - **Remote**: transport, auth, and diverged-history failures
//! - **Schema**: DDL precondition failures
//! - **Timeout**: deadline elapsed
//!
//! Read errors surface directly. Write errors up to and including the ref CAS
//! roll back the in-memory change and leave the branch ref untouched. Index
//! errors are logged and surfaced through observability only. Remote errors
//! never affect local state.

use std::io;
use thiserror::Error;

/// Result type alias for ChronDB operations
pub type ChronResult<T> = std::result::Result<T, ChronError>;

/// Kind of remote transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// Network or filesystem transport failure
    Transport,
    /// Authentication or authorization failure
    Auth,
    /// Remote history has diverged from the local ref
    Diverged,
    /// The remote URL scheme has no transport linked in this build
    Unsupported,
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoteErrorKind::Transport => "transport",
            RemoteErrorKind::Auth => "auth",
            RemoteErrorKind::Diverged => "diverged",
            RemoteErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", s)
    }
}

/// Unified error type for all ChronDB operations
///
/// Variant names are the contract of spec'd behavior; every public API
/// returns `ChronResult<T>`.
#[derive(Debug, Error)]
pub enum ChronError {
    /// Object, ref, or document absent
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing entity (object id, ref name, document id)
        what: String,
    },

    /// JSON decode/encode failure for a document
    #[error("bad document: {message}")]
    BadDocument {
        /// What went wrong
        message: String,
    },

    /// Optimistic-concurrency expected-version mismatch
    #[error("version conflict on {id}: expected {expected}, got {actual}")]
    VersionConflict {
        /// Document id the conflict was detected on
        id: String,
        /// Commit id the caller last read the document at
        expected: String,
        /// Commit id the document was actually last written at
        actual: String,
    },

    /// Branch ref CAS retry budget exhausted
    #[error("write contention on branch {branch} after {attempts} attempts")]
    WriteContention {
        /// Branch that kept moving under the writer
        branch: String,
        /// Number of CAS attempts made
        attempts: u32,
    },

    /// Object hash mismatch or unreadable bytes
    #[error("store corrupt: {message}")]
    StoreCorrupt {
        /// Description of the corruption
        message: String,
    },

    /// Index write/read failed; callers may degrade to a full scan
    #[error("index unavailable: {message}")]
    IndexUnavailable {
        /// What failed
        message: String,
    },

    /// Remote transport failure
    #[error("remote error ({kind}): {message}")]
    Remote {
        /// Failure classification
        kind: RemoteErrorKind,
        /// Transport-specific detail
        message: String,
    },

    /// CREATE TABLE precondition: schema already present
    #[error("schema already exists for table {table}")]
    SchemaExists {
        /// Table name
        table: String,
    },

    /// DROP TABLE precondition: schema not present
    #[error("no schema for table {table}")]
    SchemaAbsent {
        /// Table name
        table: String,
    },

    /// Merge is not a fast-forward in either direction
    #[error("merge conflict: {src} and {dst} have diverged")]
    MergeConflict {
        /// Source branch
        src: String,
        /// Destination branch
        dst: String,
    },

    /// Deadline elapsed before the operation completed
    #[error("timeout during {operation}")]
    Timeout {
        /// Operation that was cancelled
        operation: String,
    },

    /// Invalid input (bad branch name, malformed cursor, bad config value)
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what's wrong with the input
        message: String,
    },

    /// Low-level storage failure
    #[error("storage error: {message}")]
    Storage {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal state; indicates a bug
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl ChronError {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a NotFound error
    pub fn not_found(what: impl Into<String>) -> Self {
        ChronError::NotFound { what: what.into() }
    }

    /// Create a BadDocument error
    pub fn bad_document(message: impl Into<String>) -> Self {
        ChronError::BadDocument {
            message: message.into(),
        }
    }

    /// Create a VersionConflict error
    pub fn version_conflict(
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        ChronError::VersionConflict {
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a WriteContention error
    pub fn write_contention(branch: impl Into<String>, attempts: u32) -> Self {
        ChronError::WriteContention {
            branch: branch.into(),
            attempts,
        }
    }

    /// Create a StoreCorrupt error
    pub fn corrupt(message: impl Into<String>) -> Self {
        ChronError::StoreCorrupt {
            message: message.into(),
        }
    }

    /// Create an IndexUnavailable error
    pub fn index_unavailable(message: impl Into<String>) -> Self {
        ChronError::IndexUnavailable {
            message: message.into(),
        }
    }

    /// Create a Remote error
    pub fn remote(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        ChronError::Remote {
            kind,
            message: message.into(),
        }
    }

    /// Create a Timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        ChronError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ChronError::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        ChronError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Storage error with an underlying source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ChronError::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ChronError::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Check if this is a "not found" type error
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChronError::NotFound { .. })
    }

    /// Check if this is a conflict error (OCC, CAS, or merge)
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ChronError::VersionConflict { .. }
                | ChronError::WriteContention { .. }
                | ChronError::MergeConflict { .. }
        )
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors may succeed after re-reading current state:
    /// `VersionConflict` and `WriteContention`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChronError::VersionConflict { .. } | ChronError::WriteContention { .. }
        )
    }

    /// Check if this is a serious/unrecoverable error
    ///
    /// `StoreCorrupt` and `Internal` indicate data damage or bugs and should
    /// be alerted on, never silently retried.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            ChronError::StoreCorrupt { .. } | ChronError::Internal { .. }
        )
    }

    /// Check if this error may be degraded around by falling back to a scan
    pub fn is_degradable(&self) -> bool {
        matches!(self, ChronError::IndexUnavailable { .. })
    }

    /// Check if this is a remote transport error
    pub fn is_remote(&self) -> bool {
        matches!(self, ChronError::Remote { .. })
    }
}

impl From<io::Error> for ChronError {
    fn from(e: io::Error) -> Self {
        ChronError::Storage {
            message: format!("IO error: {}", e),
            source: Some(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for ChronError {
    fn from(e: serde_json::Error) -> Self {
        ChronError::BadDocument {
            message: e.to_string(),
        }
    }
}
