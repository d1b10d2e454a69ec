//! Select pipeline
//!
//! Execution order over a fetched base set: join, then group/aggregate,
//! then a stable multi-key sort, then limit/offset/cursor, then projection.
//! Plain searches (no join, no grouping) flow through the same pipeline with
//! those stages as no-ops.

use crate::aggregate::{group_and_aggregate, AggregateSpec, Row};
use crate::filter::lookup;
use crate::join::{execute_join, JoinSpec};
use crate::plan::{fetch_matching, query_branch};
use chrondb_core::{ChronResult, Cursor, Document, Query, SortOrder, SortSpec, TableName};
use chrondb_engine::Database;
use chrondb_index::compare_values;
use serde_json::Value;

/// A select request: a query plus the SQL-shaped stages around it
#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    /// Predicates, sort, pagination, branch
    pub query: Query,
    /// FROM table; `None` scans every table
    pub table: Option<TableName>,
    /// Output columns; empty keeps everything
    pub projection: Vec<String>,
    /// GROUP BY fields
    pub group_by: Vec<String>,
    /// Aggregate columns
    pub aggregates: Vec<AggregateSpec>,
    /// At most one equality join
    pub join: Option<JoinSpec>,
}

impl SelectRequest {
    /// Select everything from one table.
    pub fn from_table(table: TableName) -> Self {
        SelectRequest {
            table: Some(table),
            ..SelectRequest::default()
        }
    }
}

/// Select result
#[derive(Debug, Clone, Default)]
pub struct SelectOutput {
    /// Result rows in final order
    pub rows: Vec<Row>,
    /// Total rows before pagination
    pub total: usize,
    /// Cursor resuming after the last row, when more remain
    pub next_cursor: Option<Cursor>,
}

/// Search result for the document-shaped surfaces (REST search, RESP SEARCH)
#[derive(Debug, Clone, Default)]
pub struct SearchOutput {
    /// Matching documents in final order
    pub docs: Vec<Document>,
    /// Total matches before pagination
    pub total: usize,
    /// Cursor resuming after the last document, when more remain
    pub next_cursor: Option<Cursor>,
}

fn doc_to_row(doc: &Document) -> Row {
    let mut row: Row = doc
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    row.insert("id".to_string(), Value::String(doc.id.to_string()));
    row.insert("_table".to_string(), Value::String(doc.table.to_string()));
    row
}

fn sort_rows(rows: &mut [Row], sort: &[SortSpec]) {
    let effective: Vec<SortSpec> = if sort.is_empty() {
        vec![SortSpec::asc("id")]
    } else {
        sort.to_vec()
    };
    rows.sort_by(|a, b| {
        for spec in &effective {
            let av = a.get(&spec.field).unwrap_or(&Value::Null);
            let bv = b.get(&spec.field).unwrap_or(&Value::Null);
            let ord = compare_values(av, bv);
            let ord = match spec.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        // Deterministic tiebreak on id where present
        let a_id = a.get("id").unwrap_or(&Value::Null);
        let b_id = b.get("id").unwrap_or(&Value::Null);
        compare_values(a_id, b_id)
    });
}

fn paginate(rows: Vec<Row>, query: &Query, sort: &[SortSpec]) -> (Vec<Row>, Option<Cursor>) {
    let total_rows = rows.len();
    let start = match &query.after {
        Some(cursor) => rows
            .iter()
            .position(|r| r.get("id").and_then(Value::as_str) == Some(cursor.doc_id.as_str()))
            .map(|i| i + 1)
            .unwrap_or(0),
        None => query.offset.min(total_rows),
    };
    let end = match query.limit {
        Some(limit) => (start + limit).min(total_rows),
        None => total_rows,
    };
    let page: Vec<Row> = rows[start..end].to_vec();
    let next_cursor = if end < total_rows {
        page.last().and_then(|last| {
            last.get("id").and_then(Value::as_str).map(|id| Cursor {
                doc_id: id.to_string(),
                score: 0.0,
                sort_values: sort
                    .iter()
                    .map(|s| last.get(&s.field).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
        })
    } else {
        None
    };
    (page, next_cursor)
}

/// Execute a full select.
pub fn execute_select(db: &Database, request: &SelectRequest) -> ChronResult<SelectOutput> {
    let docs = fetch_matching(db, &request.query, request.table.as_ref())?;
    let mut rows: Vec<Row> = docs.iter().map(doc_to_row).collect();

    if let Some(join) = &request.join {
        let branch = query_branch(db, &request.query)?;
        let right_table = TableName::new(join.table.clone())?;
        let right_docs = db.list_by_table(&branch, &right_table)?;
        let right_rows: Vec<Row> = right_docs.iter().map(doc_to_row).collect();
        let left_name = request
            .table
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "left".to_string());
        rows = execute_join(&left_name, &rows, &join.table, &right_rows, join);
    }

    if !request.group_by.is_empty() || !request.aggregates.is_empty() {
        rows = group_and_aggregate(&rows, &request.group_by, &request.aggregates);
    }

    sort_rows(&mut rows, &request.query.sort);
    let total = rows.len();
    let (mut page, next_cursor) = paginate(rows, &request.query, &request.query.sort);

    if !request.projection.is_empty() {
        for row in &mut page {
            row.retain(|k, _| request.projection.contains(k));
        }
    }

    Ok(SelectOutput {
        rows: page,
        total,
        next_cursor,
    })
}

/// Execute a document search (the REST/RESP shape).
///
/// Documents are fetched through the plan, sorted by the query's sort keys
/// (score-ordered FTS results keep the index's relevance order when no sort
/// is given), and paginated with offset or cursor.
pub fn search(db: &Database, query: &Query) -> ChronResult<SearchOutput> {
    let docs = fetch_matching(db, query, None)?;

    // Sort documents by sort keys; relevance order arrives pre-sorted from
    // the index for FTS queries, and document order re-sorts are stable.
    let mut docs = docs;
    if !query.sort.is_empty() || !query.contains_fts() {
        let specs: Vec<SortSpec> = if query.sort.is_empty() {
            vec![SortSpec::asc("id")]
        } else {
            query.sort.clone()
        };
        docs.sort_by(|a, b| {
            for spec in &specs {
                let av = lookup(a, &spec.field).unwrap_or(Value::Null);
                let bv = lookup(b, &spec.field).unwrap_or(Value::Null);
                let ord = compare_values(&av, &bv);
                let ord = match spec.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            a.id.cmp(&b.id)
        });
    }

    let total = docs.len();
    let start = match &query.after {
        Some(cursor) => docs
            .iter()
            .position(|d| d.id.as_str() == cursor.doc_id)
            .map(|i| i + 1)
            .unwrap_or(0),
        None => query.offset.min(total),
    };
    let end = match query.limit {
        Some(limit) => (start + limit).min(total),
        None => total,
    };
    let page: Vec<Document> = docs[start..end].to_vec();
    let next_cursor = if end < total {
        page.last().map(|last| Cursor {
            doc_id: last.id.to_string(),
            score: 0.0,
            sort_values: query
                .sort
                .iter()
                .map(|s| lookup(last, &s.field).unwrap_or(Value::Null))
                .collect(),
        })
    } else {
        None
    };

    Ok(SearchOutput {
        docs: page,
        total,
        next_cursor,
    })
}
