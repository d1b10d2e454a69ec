//! In-memory inverted index state
//!
//! [`IndexState`] is one point-in-time image of a branch index: per-field
//! postings (exact terms, analyzed FTS twins, numeric encodings, presence
//! sets) plus a stored-field map per document for sorting and geo checks.
//! Mutation happens on a live copy owned by the branch index; readers only
//! ever see frozen clones, which is what makes a reader a consistent
//! snapshot.
//!
//! Documents are flattened into dotted field paths before indexing
//! (`address.city`, array elements under their parent path), so every leaf
//! value is individually term-, range-, and exists-queryable.

use crate::tokenizer::standard_tokens;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Suffix of the analyzed twin field carrying FTS postings.
pub const FTS_SUFFIX: &str = "_fts";

/// Total-ordered f64 key for the numeric range map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct F64Key(pub f64);

impl Eq for F64Key {}

impl PartialOrd for F64Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for F64Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Per-field posting structures
#[derive(Debug, Clone, Default)]
pub struct FieldPostings {
    /// Exact string form of each value → doc ids
    pub terms: BTreeMap<String, HashSet<String>>,
    /// Analyzed token → doc id → term frequency (the `_fts` twin)
    pub fts: HashMap<String, HashMap<String, u32>>,
    /// Integer values → doc ids
    pub longs: BTreeMap<i64, HashSet<String>>,
    /// Float values (integers mirrored here) → doc ids
    pub doubles: BTreeMap<F64Key, HashSet<String>>,
    /// Docs carrying the field at all
    pub exists: HashSet<String>,
    /// Doc id → token count of this field's text (FTS length normalization)
    pub doc_tokens: HashMap<String, u32>,
}

impl FieldPostings {
    fn is_empty(&self) -> bool {
        self.exists.is_empty()
    }
}

/// One indexed document's stored fields
#[derive(Debug, Clone, Default)]
pub struct DocEntry {
    /// Flattened field path → value
    pub fields: BTreeMap<String, Value>,
}

/// Point-in-time image of a branch index
#[derive(Debug, Clone, Default)]
pub struct IndexState {
    /// Doc id → stored fields
    docs: HashMap<String, DocEntry>,
    /// Field path → postings
    postings: HashMap<String, FieldPostings>,
    /// Bumped on every mutation; readers expose it as their snapshot version
    generation: u64,
}

impl IndexState {
    /// Empty state.
    pub fn new() -> Self {
        IndexState::default()
    }

    /// Snapshot generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// All indexed doc ids.
    pub fn doc_ids(&self) -> impl Iterator<Item = &String> {
        self.docs.keys()
    }

    /// Check whether a doc is present.
    pub fn contains(&self, doc_id: &str) -> bool {
        self.docs.contains_key(doc_id)
    }

    /// Stored fields of a document.
    pub fn doc(&self, doc_id: &str) -> Option<&DocEntry> {
        self.docs.get(doc_id)
    }

    /// Postings of a field.
    pub fn field(&self, field: &str) -> Option<&FieldPostings> {
        self.postings.get(field)
    }

    /// Index (or atomically replace) one document's flattened fields.
    pub fn index_document(&mut self, doc_id: &str, fields: BTreeMap<String, Value>) {
        if self.docs.contains_key(doc_id) {
            self.remove_document(doc_id);
        }
        for (path, value) in &fields {
            self.add_field(doc_id, path, value);
        }
        self.docs.insert(doc_id.to_string(), DocEntry { fields });
        self.generation += 1;
    }

    /// Remove a document from every posting structure.
    pub fn remove_document(&mut self, doc_id: &str) {
        let entry = match self.docs.remove(doc_id) {
            Some(e) => e,
            None => return,
        };
        for path in entry.fields.keys() {
            if let Some(postings) = self.postings.get_mut(path) {
                postings.terms.retain(|_, docs| {
                    docs.remove(doc_id);
                    !docs.is_empty()
                });
                postings.fts.retain(|_, tf| {
                    tf.remove(doc_id);
                    !tf.is_empty()
                });
                postings.longs.retain(|_, docs| {
                    docs.remove(doc_id);
                    !docs.is_empty()
                });
                postings.doubles.retain(|_, docs| {
                    docs.remove(doc_id);
                    !docs.is_empty()
                });
                postings.exists.remove(doc_id);
                postings.doc_tokens.remove(doc_id);
            }
        }
        self.postings.retain(|_, p| !p.is_empty());
        self.generation += 1;
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.docs.clear();
        self.postings.clear();
        self.generation += 1;
    }

    fn add_field(&mut self, doc_id: &str, path: &str, value: &Value) {
        if let Value::Array(items) = value {
            // Each element is indexed at the array's own path.
            {
                let postings = self.postings.entry(path.to_string()).or_default();
                postings.exists.insert(doc_id.to_string());
            }
            for item in items.clone() {
                self.add_field(doc_id, path, &item);
            }
            return;
        }

        let postings = self.postings.entry(path.to_string()).or_default();
        postings.exists.insert(doc_id.to_string());

        match value {
            Value::String(s) => {
                postings
                    .terms
                    .entry(s.clone())
                    .or_default()
                    .insert(doc_id.to_string());
                let tokens = standard_tokens(s);
                let count = tokens.len() as u32;
                for token in tokens {
                    *postings
                        .fts
                        .entry(token)
                        .or_default()
                        .entry(doc_id.to_string())
                        .or_insert(0) += 1;
                }
                let slot = postings.doc_tokens.entry(doc_id.to_string()).or_insert(0);
                *slot += count;
            }
            Value::Number(n) => {
                postings
                    .terms
                    .entry(n.to_string())
                    .or_default()
                    .insert(doc_id.to_string());
                if let Some(i) = n.as_i64() {
                    postings.longs.entry(i).or_default().insert(doc_id.to_string());
                }
                if let Some(f) = n.as_f64() {
                    postings
                        .doubles
                        .entry(F64Key(f))
                        .or_default()
                        .insert(doc_id.to_string());
                }
            }
            Value::Bool(b) => {
                postings
                    .terms
                    .entry(b.to_string())
                    .or_default()
                    .insert(doc_id.to_string());
            }
            Value::Null => {
                postings
                    .terms
                    .entry("null".to_string())
                    .or_default()
                    .insert(doc_id.to_string());
            }
            // Arrays are handled above; objects are flattened before
            // reaching here and only contribute presence.
            Value::Array(_) | Value::Object(_) => {}
        }
    }
}

/// Flatten a document's payload into dotted leaf paths.
///
/// Nested objects extend the path (`address.city`); array elements are
/// indexed under the array's own path, so `tags: ["a", "b"]` yields two
/// values at `tags`. The top-level array/object value itself is also kept so
/// geo fields (`[lat, lon]`) stay inspectable.
pub fn flatten_fields(fields: &serde_json::Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in fields {
        flatten_into(key.clone(), value, &mut out);
    }
    out
}

fn flatten_into(path: String, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            out.insert(path.clone(), value.clone());
            for (key, nested) in map {
                flatten_into(format!("{}.{}", path, key), nested, out);
            }
        }
        Value::Array(_) => {
            out.insert(path, value.clone());
        }
        leaf => {
            out.insert(path, leaf.clone());
        }
    }
}
