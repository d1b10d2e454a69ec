//! On-disk storage for ChronDB
//!
//! This crate owns the bare repository layout:
//! - `object`: blob/tree/commit value objects and their canonical codec
//! - `store`: the content-addressed object store (`objects/<2-hex>/<rest>`)
//! - `refs`: named refs with atomic CAS, `HEAD`, stale-lock cleanup
//! - `paths`: (table, id) ↔ tree-path codec

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod object;
pub mod paths;
pub mod refs;
pub mod store;

pub use object::{Commit, EntryMode, Object, Tree, TreeEntry};
pub use refs::{branch_ref, CasOutcome, RefStore, NOTES_REF, STALE_LOCK_AGE};
pub use store::ObjectStore;
