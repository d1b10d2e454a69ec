//! Near-real-time index engine for ChronDB
//!
//! - `tokenizer`: standard/keyword analyzers
//! - `inverted`: per-field postings and the point-in-time index state
//! - `branch`: the NRT branch index (live state + published readers)
//! - `search`: clause evaluation, TF-IDF scoring, sorting, pagination
//! - `cache`: LRU result cache, branch-invalidated on write
//! - `engine`: the per-instance multi-branch engine with disk persistence
//!
//! The engine's contract: ids it returns are candidates; canonical document
//! content always comes from the object store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod branch;
pub mod cache;
pub mod engine;
pub mod inverted;
pub mod search;
pub mod tokenizer;

pub use branch::BranchIndex;
pub use cache::ResultCache;
pub use engine::{IndexEngine, IndexSettings};
pub use inverted::{flatten_fields, DocEntry, FieldPostings, IndexState, FTS_SUFFIX};
pub use search::{compare_values, execute, glob_match, SearchHit, SearchResults};
pub use tokenizer::{analyze, query_tokens, standard_tokens, MIN_TOKEN_LEN};
