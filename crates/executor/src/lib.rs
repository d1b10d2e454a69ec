//! Query planner and executor for ChronDB
//!
//! Transforms the protocol-neutral query AST into an execution plan over the
//! engine:
//! - `plan`: point-read / index-probe / table-scan selection and base fetch
//! - `filter`: in-memory clause evaluation (the post-filter contract)
//! - `select`: join → group/aggregate → sort → page → project pipeline
//! - `aggregate`: GROUP BY grouping and aggregate functions
//! - `join`: inner/left single-equality joins with qualified output columns

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod filter;
pub mod join;
pub mod plan;
pub mod select;

pub use aggregate::{coerce_numeric, group_and_aggregate, AggFunc, AggregateSpec, Row};
pub use filter::{lookup, matches, matches_all};
pub use join::{execute_join, JoinKind, JoinSpec};
pub use plan::{fetch_matching, plan, query_branch, Plan};
pub use select::{execute_select, search, SearchOutput, SelectOutput, SelectRequest};
