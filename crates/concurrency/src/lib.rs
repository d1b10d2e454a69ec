//! Concurrency control for ChronDB
//!
//! - `context`: explicit per-transaction context and its notes record
//! - `repo_lock`: process-exclusive repository lock + in-process writer mutex
//! - `occ`: optimistic per-document version checks and bounded CAS retries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod occ;
pub mod repo_lock;

pub use context::{TxContext, TxOptions, TxRecord, TxStatus};
pub use occ::{check_expected_version, ExpectedVersion, RetryBudget, MAX_CAS_RETRIES};
pub use repo_lock::{RepoLockFile, WriterLock, REPO_LOCK_FILE};
