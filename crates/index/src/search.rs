//! Query execution against an index snapshot
//!
//! Evaluates the core clause algebra over one [`IndexState`] reader,
//! producing scored candidate ids. Results are candidates only: the caller
//! resolves every id against the object store before returning documents to
//! clients, so a stale snapshot can never leak deleted or mismatched
//! content.
//!
//! FTS clauses score with TF-IDF (smoothed IDF); all other clauses
//! contribute zero score. Sorting is a stable multi-key sort over stored
//! field values with `_score` available as a pseudo-field; pagination uses
//! offsets for shallow windows and a `search_after` cursor for deep pages.

use crate::inverted::{F64Key, IndexState};
use crate::tokenizer::query_tokens;
use chrondb_core::{Analyzer, ChronResult, Clause, Cursor, Query, SortOrder, SortSpec, SCORE_FIELD};
use serde_json::Value;
use std::collections::HashMap;
use std::ops::Bound;

/// One scored candidate
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id
    pub doc_id: String,
    /// Relevance score (0.0 outside FTS queries)
    pub score: f32,
    /// Values of the effective sort keys, in order
    pub sort_values: Vec<Value>,
}

/// Result page
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Hits of this page, in sort order
    pub hits: Vec<SearchHit>,
    /// Total matches before pagination
    pub total: usize,
    /// Cursor resuming after the last hit, when more remain
    pub next_cursor: Option<Cursor>,
}

impl SearchResults {
    /// Ids of this page's hits.
    pub fn ids(&self) -> Vec<String> {
        self.hits.iter().map(|h| h.doc_id.clone()).collect()
    }
}

/// Execute a query against one snapshot.
pub fn execute(state: &IndexState, query: &Query) -> ChronResult<SearchResults> {
    // Candidate set: implicit AND over the top-level clauses. An empty
    // clause list matches every document.
    let mut matched: HashMap<String, f32> = match query.clauses.split_first() {
        None => state
            .doc_ids()
            .map(|id| (id.clone(), 0.0))
            .collect(),
        Some((first, rest)) => {
            let mut acc = eval_clause(state, first);
            for clause in rest {
                let next = eval_clause(state, clause);
                acc.retain(|id, _| next.contains_key(id));
                for (id, score) in acc.iter_mut() {
                    *score += next.get(id).copied().unwrap_or(0.0);
                }
            }
            acc
        }
    };

    let effective_sort = effective_sort(query);
    let mut hits: Vec<SearchHit> = matched
        .drain()
        .map(|(doc_id, score)| {
            let sort_values = sort_values_for(state, &doc_id, score, &effective_sort);
            SearchHit {
                doc_id,
                score,
                sort_values,
            }
        })
        .collect();
    sort_hits(&mut hits, &effective_sort);

    let total = hits.len();

    // Deep pagination: resume after the cursor's document.
    let start = match &query.after {
        Some(cursor) => hits
            .iter()
            .position(|h| h.doc_id == cursor.doc_id)
            .map(|i| i + 1)
            .unwrap_or(0),
        None => query.offset.min(hits.len()),
    };
    let end = match query.limit {
        Some(limit) => (start + limit).min(hits.len()),
        None => hits.len(),
    };
    let page: Vec<SearchHit> = hits[start..end].to_vec();

    let next_cursor = if end < hits.len() {
        page.last().map(|last| Cursor {
            doc_id: last.doc_id.clone(),
            score: last.score,
            sort_values: last.sort_values.clone(),
        })
    } else {
        None
    };

    Ok(SearchResults {
        hits: page,
        total,
        next_cursor,
    })
}

// ============================================================================
// Clause evaluation
// ============================================================================

fn eval_clause(state: &IndexState, clause: &Clause) -> HashMap<String, f32> {
    match clause {
        Clause::Term { field, value } => match state.field(field) {
            Some(p) => p
                .terms
                .get(value)
                .map(|docs| docs.iter().map(|d| (d.clone(), 0.0)).collect())
                .unwrap_or_default(),
            None => HashMap::new(),
        },
        Clause::Prefix { field, value } => match state.field(field) {
            Some(p) => {
                let mut out = HashMap::new();
                for (term, docs) in p.terms.range(value.clone()..) {
                    if !term.starts_with(value.as_str()) {
                        break;
                    }
                    for d in docs {
                        out.insert(d.clone(), 0.0);
                    }
                }
                out
            }
            None => HashMap::new(),
        },
        Clause::Wildcard { field, pattern } => match state.field(field) {
            Some(p) => {
                let mut out = HashMap::new();
                for (term, docs) in &p.terms {
                    if glob_match(pattern, term) {
                        for d in docs {
                            out.insert(d.clone(), 0.0);
                        }
                    }
                }
                out
            }
            None => HashMap::new(),
        },
        Clause::RangeLong { field, lo, hi } => match state.field(field) {
            Some(p) => {
                let lo = lo.map(Bound::Included).unwrap_or(Bound::Unbounded);
                let hi = hi.map(Bound::Included).unwrap_or(Bound::Unbounded);
                let mut out = HashMap::new();
                for (_, docs) in p.longs.range((lo, hi)) {
                    for d in docs {
                        out.insert(d.clone(), 0.0);
                    }
                }
                out
            }
            None => HashMap::new(),
        },
        Clause::RangeDouble { field, lo, hi } => match state.field(field) {
            Some(p) => {
                let lo = lo.map(|v| Bound::Included(F64Key(v))).unwrap_or(Bound::Unbounded);
                let hi = hi.map(|v| Bound::Included(F64Key(v))).unwrap_or(Bound::Unbounded);
                let mut out = HashMap::new();
                for (_, docs) in p.doubles.range((lo, hi)) {
                    for d in docs {
                        out.insert(d.clone(), 0.0);
                    }
                }
                out
            }
            None => HashMap::new(),
        },
        Clause::Exists { field } => match state.field(field) {
            Some(p) => p.exists.iter().map(|d| (d.clone(), 0.0)).collect(),
            None => HashMap::new(),
        },
        Clause::Fts {
            field,
            value,
            analyzer,
        } => eval_fts(state, field, value, *analyzer),
        Clause::Geo { field, bbox } => {
            let mut out = HashMap::new();
            for id in state.doc_ids() {
                if let Some(entry) = state.doc(id) {
                    if let Some(Value::Array(point)) = entry.fields.get(field) {
                        if let [lat, lon] = point.as_slice() {
                            if let (Some(lat), Some(lon)) = (lat.as_f64(), lon.as_f64()) {
                                if bbox.contains(lat, lon) {
                                    out.insert(id.clone(), 0.0);
                                }
                            }
                        }
                    }
                }
            }
            out
        }
        Clause::And(clauses) => {
            let mut iter = clauses.iter();
            let mut acc = match iter.next() {
                Some(first) => eval_clause(state, first),
                None => return HashMap::new(),
            };
            for clause in iter {
                let next = eval_clause(state, clause);
                acc.retain(|id, _| next.contains_key(id));
                for (id, score) in acc.iter_mut() {
                    *score += next.get(id).copied().unwrap_or(0.0);
                }
            }
            acc
        }
        Clause::Or(clauses) => {
            let mut acc: HashMap<String, f32> = HashMap::new();
            for clause in clauses {
                for (id, score) in eval_clause(state, clause) {
                    let slot = acc.entry(id).or_insert(0.0);
                    *slot = slot.max(score);
                }
            }
            acc
        }
        Clause::Not(inner) => {
            let excluded = eval_clause(state, inner);
            state
                .doc_ids()
                .filter(|id| !excluded.contains_key(*id))
                .map(|id| (id.clone(), 0.0))
                .collect()
        }
    }
}

fn eval_fts(
    state: &IndexState,
    field: &str,
    value: &str,
    analyzer: Analyzer,
) -> HashMap<String, f32> {
    let postings = match state.field(field) {
        Some(p) => p,
        None => return HashMap::new(),
    };
    let tokens = query_tokens(value, analyzer);
    let n = state.doc_count() as f32;
    let mut out: HashMap<String, f32> = HashMap::new();
    for token in tokens {
        let tf_map = match postings.fts.get(&token) {
            Some(m) => m,
            None => continue,
        };
        let df = tf_map.len() as f32;
        // Smoothed IDF; stays positive even for terms in every document.
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        for (doc, tf) in tf_map {
            *out.entry(doc.clone()).or_insert(0.0) += *tf as f32 * idf;
        }
    }
    out
}

/// Glob match supporting `*` (any run) and `?` (any one character).
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0usize, 0usize);
    let (mut star_p, mut star_v) = (None::<usize>, 0usize);
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star_p = Some(pi);
            star_v = vi;
            pi += 1;
        } else if let Some(sp) = star_p {
            pi = sp + 1;
            star_v += 1;
            vi = star_v;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ============================================================================
// Sorting
// ============================================================================

fn effective_sort(query: &Query) -> Vec<SortSpec> {
    if !query.sort.is_empty() {
        return query.sort.clone();
    }
    if query.contains_fts() {
        // Relevance order is the default for full-text queries.
        vec![SortSpec {
            field: SCORE_FIELD.to_string(),
            order: SortOrder::Desc,
        }]
    } else {
        vec![SortSpec::asc("id")]
    }
}

fn sort_values_for(
    state: &IndexState,
    doc_id: &str,
    score: f32,
    sort: &[SortSpec],
) -> Vec<Value> {
    sort.iter()
        .map(|spec| {
            if spec.field == SCORE_FIELD {
                return serde_json::Number::from_f64(score as f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
            }
            if spec.field == "id" {
                return Value::String(doc_id.to_string());
            }
            state
                .doc(doc_id)
                .and_then(|entry| entry.fields.get(&spec.field))
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn sort_hits(hits: &mut [SearchHit], sort: &[SortSpec]) {
    hits.sort_by(|a, b| {
        for (i, spec) in sort.iter().enumerate() {
            let av = a.sort_values.get(i).unwrap_or(&Value::Null);
            let bv = b.sort_values.get(i).unwrap_or(&Value::Null);
            let ord = compare_values(av, bv);
            let ord = match spec.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        // Deterministic tiebreak
        a.doc_id.cmp(&b.doc_id)
    });
}

/// Total order over JSON values for sorting: numbers, then strings, then
/// booleans, then everything else, with null/missing always last.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
            Value::Null => 4,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then(Ordering::Equal),
    }
}
