//! Plan selection and base-set fetching
//!
//! An AST becomes one of three shapes:
//!
//! 1. A single `id = …` equality short-circuits to an object-store point
//!    read.
//! 2. Any FTS clause routes candidate lookup through the index engine, with
//!    the remaining clauses post-filtered against resolved documents.
//! 3. Everything else is a table scan (or all-tables scan) with clauses
//!    applied in memory.
//!
//! In every shape the documents returned come from the object store at the
//! branch tip, so a stale index can never leak deleted or outdated content.

use crate::filter::matches_all;
use chrondb_core::{BranchName, ChronResult, DocId, Document, Query, TableName};
use chrondb_engine::Database;
use tracing::debug;

/// Execution shape chosen for a query
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Object-store point read of one id
    PointRead {
        /// The id to read
        id: String,
    },
    /// Index candidate lookup + post-filter
    IndexProbe,
    /// Object-store scan of one table or all tables
    TableScan {
        /// Scan target; `None` scans every table
        table: Option<TableName>,
    },
}

/// Choose a plan for a query.
pub fn plan(query: &Query, table_hint: Option<&TableName>) -> Plan {
    if let Some(id) = query.as_point_lookup() {
        return Plan::PointRead { id: id.to_string() };
    }
    if query.contains_fts() {
        return Plan::IndexProbe;
    }
    Plan::TableScan {
        table: table_hint.cloned(),
    }
}

/// Resolve the branch a query targets.
pub fn query_branch(db: &Database, query: &Query) -> ChronResult<BranchName> {
    match &query.branch {
        Some(branch) => Ok(branch.clone()),
        None => db.current_branch(),
    }
}

/// Fetch the full matching document set for a query (before sorting and
/// pagination).
pub fn fetch_matching(
    db: &Database,
    query: &Query,
    table_hint: Option<&TableName>,
) -> ChronResult<Vec<Document>> {
    let branch = query_branch(db, query)?;
    let chosen = plan(query, table_hint);
    debug!(plan = ?chosen, branch = %branch, "query planned");

    let docs = match chosen {
        Plan::PointRead { id } => {
            let id = DocId::new(id)?;
            match db.get(&branch, &id)? {
                Some(doc) => vec![doc],
                None => vec![],
            }
        }
        Plan::IndexProbe => {
            // Candidates only: ask the index for ids with pagination
            // stripped, then resolve and re-check everything at the tip.
            let mut candidates = query.clone();
            candidates.limit = None;
            candidates.offset = 0;
            candidates.after = None;
            let results = db.index().search_query(branch.as_str(), &candidates)?;
            let mut docs = Vec::with_capacity(results.hits.len());
            for hit in results.hits {
                let id = DocId::new(hit.doc_id)?;
                if let Some(doc) = db.get(&branch, &id)? {
                    if matches_all(&doc, &query.clauses) {
                        docs.push(doc);
                    }
                }
            }
            docs
        }
        Plan::TableScan { table } => {
            let tables = match table {
                Some(table) => vec![table],
                None => db.table_names(&branch)?,
            };
            let mut docs = Vec::new();
            for table in tables {
                for doc in db.list_by_table(&branch, &table)? {
                    if matches_all(&doc, &query.clauses) {
                        docs.push(doc);
                    }
                }
            }
            docs
        }
    };
    Ok(docs)
}
