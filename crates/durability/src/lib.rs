//! Durability layer for ChronDB
//!
//! - `wal`: framed, checksummed write-ahead log segments
//! - `checkpoint`: atomic, monotone last-applied-seq marker
//! - `recovery`: startup scan grouping WAL records into replayable
//!   transactions
//!
//! The contract with the engine: a commit's records are durable before its
//! branch ref moves, and recovery replay is idempotent under repetition.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod recovery;
pub mod wal;

pub use checkpoint::{Checkpoint, CHECKPOINT_FILE};
pub use recovery::{scan, CommitMarker, RecoveredTx, RecoveryPlan};
pub use wal::{Wal, WalEntry, WalOp, WalRecord, SEGMENT_MAX_BYTES};
