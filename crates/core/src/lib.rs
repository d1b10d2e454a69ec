//! Core types for ChronDB
//!
//! This crate defines the foundational types used throughout the system:
//! - ObjectId: 32-hex content address of blobs, trees, and commits
//! - BranchName / DocId / TableName: naming and addressing
//! - Document: the schemaless document model and its canonical JSON codec
//! - Clause / Query / Cursor: the protocol-neutral query algebra
//! - ChronError: the unified error taxonomy
//! - ChronConfig: `chrondb.toml` configuration
//! - Deadline: cooperative cancellation for I/O-bearing operations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod deadline;
pub mod document;
pub mod error;
pub mod query;
pub mod types;

pub use config::{
    ChronConfig, CommitterConfig, DurabilityConfig, IndexConfig, LoggingConfig, RemoteConfig,
    CONFIG_FILE_NAME,
};
pub use deadline::Deadline;
pub use document::{encode_canonical, Change, Document, FIELD_ID, FIELD_TABLE};
pub use error::{ChronError, ChronResult, RemoteErrorKind};
pub use query::{Analyzer, Clause, Cursor, GeoBox, Query, SortOrder, SortSpec, SCORE_FIELD};
pub use types::{
    BranchName, DocId, ObjectId, Origin, TableName, DEFAULT_BRANCH, DEFAULT_TABLE,
    OBJECT_ID_HEX_LEN, OBJECT_ID_LEN, SCHEMA_TABLE,
};
