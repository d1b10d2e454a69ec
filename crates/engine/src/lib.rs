//! ChronDB engine
//!
//! Ties the storage, durability, concurrency, and index layers into one
//! database instance:
//! - `database`: open/recover/close and document operations
//! - `commit`: the commit pipeline (WAL → objects → ref CAS → notes → index)
//! - `history`: lazy per-document history walking
//! - `branch`: branch lifecycle and fast-forward merge
//! - `notes`: the transaction-metadata sidecar chain
//! - `temporal`: point-in-time reads, restore, diff
//! - `schema`: advisory per-table schema records with inference
//! - `remote`: push/fetch/pull and batch scopes
//! - `registry`: process-wide instance deduplication
//! - `backend`: the narrow `DocumentBackend` trait + in-memory test double

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod branch;
pub mod commit;
pub mod database;
pub mod history;
pub mod notes;
pub mod registry;
pub mod remote;
pub mod schema;
pub mod temporal;

pub use backend::{DocumentBackend, MemoryBackend};
pub use branch::{is_ancestor, BranchInfo, MergeOutcome};
pub use commit::{build_updated_tree, commit_message};
pub use database::Database;
pub use history::{HistoryEntry, HistoryIter, HistoryPage};
pub use remote::{BatchGuard, PushOutcome, RemoteManager};
pub use schema::{ColumnDef, SchemaRecord, TableInfo, INFER_SAMPLE_SIZE};
pub use temporal::{DocDiff, RefOrCommit};
