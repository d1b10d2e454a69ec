//! Protocol-neutral query representation
//!
//! Every surface (REST search, RESP `SEARCH`/`FT.SEARCH`, SQL `WHERE`)
//! lowers into this closed clause algebra before execution, so the planner
//! and the index engine only ever see one query shape.
//!
//! - `Clause`: the closed set of leaf predicates and boolean combinators
//! - `Query`: clauses plus limit/offset/sort/cursor/branch
//! - `Cursor`: opaque deep-pagination token, base64 of canonical JSON

use crate::document::encode_canonical;
use crate::error::{ChronError, ChronResult};
use crate::types::BranchName;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Clauses
// ============================================================================

/// Analyzer applied to FTS clause values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    /// Lowercase, split on non-alphanumeric, drop single-character tokens
    #[default]
    Standard,
    /// Treat the whole value as a single token
    Keyword,
}

/// Bounding box for geo clauses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    /// Southern edge
    pub min_lat: f64,
    /// Western edge
    pub min_lon: f64,
    /// Northern edge
    pub max_lat: f64,
    /// Eastern edge
    pub max_lon: f64,
}

impl GeoBox {
    /// Check whether a point falls inside the box (edges inclusive).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

/// A query clause
///
/// The algebra is closed: leaf predicates over one field each, plus `And`,
/// `Or`, `Not`. Adding a variant is a breaking change for every executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// Exact match on a field's string form
    Term {
        /// Field name
        field: String,
        /// Value to match
        value: String,
    },
    /// Glob-style match supporting `*` and `?`
    Wildcard {
        /// Field name
        field: String,
        /// Pattern, e.g. `jo*n`
        pattern: String,
    },
    /// Inclusive integer range; open ends are `None`
    RangeLong {
        /// Field name
        field: String,
        /// Lower bound
        lo: Option<i64>,
        /// Upper bound
        hi: Option<i64>,
    },
    /// Inclusive float range; open ends are `None`
    RangeDouble {
        /// Field name
        field: String,
        /// Lower bound
        lo: Option<f64>,
        /// Upper bound
        hi: Option<f64>,
    },
    /// String prefix match
    Prefix {
        /// Field name
        field: String,
        /// Prefix value
        value: String,
    },
    /// Full-text match over the field's analyzed twin
    Fts {
        /// Field name
        field: String,
        /// Query text (analyzed with `analyzer`)
        value: String,
        /// Analyzer to apply
        #[serde(default)]
        analyzer: Analyzer,
    },
    /// Field presence
    Exists {
        /// Field name
        field: String,
    },
    /// Point-in-box geo match over a `[lat, lon]` field
    Geo {
        /// Field name
        field: String,
        /// Bounding box
        bbox: GeoBox,
    },
    /// All sub-clauses must match
    And(Vec<Clause>),
    /// At least one sub-clause must match
    Or(Vec<Clause>),
    /// Sub-clause must not match
    Not(Box<Clause>),
}

impl Clause {
    /// Exact-match builder.
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Clause::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Wildcard builder.
    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Clause::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Integer-range builder.
    pub fn range_long(field: impl Into<String>, lo: Option<i64>, hi: Option<i64>) -> Self {
        Clause::RangeLong {
            field: field.into(),
            lo,
            hi,
        }
    }

    /// Float-range builder.
    pub fn range_double(field: impl Into<String>, lo: Option<f64>, hi: Option<f64>) -> Self {
        Clause::RangeDouble {
            field: field.into(),
            lo,
            hi,
        }
    }

    /// Prefix builder.
    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Self {
        Clause::Prefix {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Full-text builder with the standard analyzer.
    pub fn fts(field: impl Into<String>, value: impl Into<String>) -> Self {
        Clause::Fts {
            field: field.into(),
            value: value.into(),
            analyzer: Analyzer::Standard,
        }
    }

    /// Presence builder.
    pub fn exists(field: impl Into<String>) -> Self {
        Clause::Exists {
            field: field.into(),
        }
    }

    /// Check whether this clause or any sub-clause is full-text.
    pub fn contains_fts(&self) -> bool {
        match self {
            Clause::Fts { .. } => true,
            Clause::And(cs) | Clause::Or(cs) => cs.iter().any(Clause::contains_fts),
            Clause::Not(c) => c.contains_fts(),
            _ => false,
        }
    }

    /// If this clause is exactly `id = <value>`, return the value.
    pub fn as_id_equality(&self) -> Option<&str> {
        match self {
            Clause::Term { field, value } if field == "id" => Some(value),
            _ => None,
        }
    }
}

// ============================================================================
// Sort
// ============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort by; `_score` sorts by FTS relevance
    pub field: String,
    /// Direction
    pub order: SortOrder,
}

impl SortSpec {
    /// Ascending sort on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    /// Descending sort on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        SortSpec {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Pseudo-field that sorts by FTS relevance score.
pub const SCORE_FIELD: &str = "_score";

// ============================================================================
// Query
// ============================================================================

/// A complete query
///
/// `clauses` combine with implicit AND. `after` supersedes `offset` when both
/// are present (deep pages use cursors, shallow windows use offsets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Predicates, implicitly AND-combined
    pub clauses: Vec<Clause>,
    /// Maximum hits to return
    pub limit: Option<usize>,
    /// Hits to skip (shallow pagination)
    pub offset: usize,
    /// Sort keys, applied in order
    pub sort: Vec<SortSpec>,
    /// Resume point for deep pagination
    pub after: Option<Cursor>,
    /// Branch to query; `None` means the session's current branch
    pub branch: Option<BranchName>,
}

impl Query {
    /// Empty query matching everything on the current branch.
    pub fn new() -> Self {
        Query {
            clauses: Vec::new(),
            limit: None,
            offset: 0,
            sort: Vec::new(),
            after: None,
            branch: None,
        }
    }

    /// Add a clause.
    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Set the limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Add a sort key.
    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// Resume after a cursor.
    pub fn after(mut self, cursor: Cursor) -> Self {
        self.after = Some(cursor);
        self
    }

    /// Target a branch.
    pub fn on_branch(mut self, branch: BranchName) -> Self {
        self.branch = Some(branch);
        self
    }

    /// Check whether any clause is full-text.
    pub fn contains_fts(&self) -> bool {
        self.clauses.iter().any(Clause::contains_fts)
    }

    /// If the whole query is a single `id = <value>` equality, return it.
    pub fn as_point_lookup(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [only] => only.as_id_equality(),
            _ => None,
        }
    }
}

impl Default for Query {
    fn default() -> Self {
        Query::new()
    }
}

// ============================================================================
// Cursor
// ============================================================================

/// Opaque pagination cursor
///
/// Serialized as base64 of canonical JSON so cursors compare stably and
/// round-trip byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last document id of the previous page
    pub doc_id: String,
    /// Score of that hit (0.0 for non-FTS queries)
    pub score: f32,
    /// Sort key values of that hit, in sort-spec order
    pub sort_values: Vec<Value>,
}

impl Cursor {
    /// Encode as a base64 token.
    pub fn encode(&self) -> ChronResult<String> {
        let value = serde_json::to_value(self).map_err(ChronError::from)?;
        let bytes = encode_canonical(&value)?;
        Ok(BASE64.encode(bytes))
    }

    /// Decode a base64 token.
    pub fn decode(token: &str) -> ChronResult<Self> {
        let bytes = BASE64
            .decode(token)
            .map_err(|e| ChronError::invalid_input(format!("bad cursor encoding: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ChronError::invalid_input(format!("bad cursor payload: {}", e)))
    }
}
