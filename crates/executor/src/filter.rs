//! In-memory clause evaluation against documents
//!
//! The post-filter side of the planner contract: index hits are candidates,
//! and every candidate (or scanned document) is checked here against the full
//! clause set before it reaches a client. Field lookup understands dotted
//! paths (`address.city`) and arrays match when any element matches.

use chrondb_core::{Clause, Document};
use chrondb_index::{analyze, glob_match, query_tokens};
use serde_json::Value;

/// Look up a possibly dotted field path in a document.
///
/// `id` and `_table` resolve to the reserved values.
pub fn lookup<'a>(doc: &'a Document, field: &str) -> Option<Value> {
    match field {
        "id" => return Some(Value::String(doc.id.to_string())),
        "_table" => return Some(Value::String(doc.table.to_string())),
        _ => {}
    }
    let mut current: &'a Value = doc.fields.get(field.split('.').next()?)?;
    for part in field.split('.').skip(1) {
        match current {
            Value::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Check a document against one clause.
pub fn matches(doc: &Document, clause: &Clause) -> bool {
    match clause {
        Clause::Term { field, value } => {
            value_matches(&lookup(doc, field), |v| string_form(v) == *value)
        }
        Clause::Prefix { field, value } => {
            value_matches(&lookup(doc, field), |v| string_form(v).starts_with(value))
        }
        Clause::Wildcard { field, pattern } => {
            value_matches(&lookup(doc, field), |v| glob_match(pattern, &string_form(v)))
        }
        Clause::RangeLong { field, lo, hi } => value_matches(&lookup(doc, field), |v| {
            match v.as_i64() {
                Some(n) => lo.map_or(true, |lo| n >= lo) && hi.map_or(true, |hi| n <= hi),
                None => false,
            }
        }),
        Clause::RangeDouble { field, lo, hi } => value_matches(&lookup(doc, field), |v| {
            match v.as_f64() {
                Some(n) => lo.map_or(true, |lo| n >= lo) && hi.map_or(true, |hi| n <= hi),
                None => false,
            }
        }),
        Clause::Exists { field } => lookup(doc, field).is_some(),
        Clause::Fts {
            field,
            value,
            analyzer,
        } => value_matches(&lookup(doc, field), |v| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => string_form(other),
            };
            // Same analysis on both sides as the index's twin fields use
            let doc_tokens = analyze(&text, *analyzer);
            query_tokens(value, *analyzer)
                .iter()
                .any(|t| doc_tokens.contains(t))
        }),
        Clause::Geo { field, bbox } => value_matches(&lookup(doc, field), |v| {
            if let Value::Array(point) = v {
                if let [lat, lon] = point.as_slice() {
                    if let (Some(lat), Some(lon)) = (lat.as_f64(), lon.as_f64()) {
                        return bbox.contains(lat, lon);
                    }
                }
            }
            false
        }),
        Clause::And(clauses) => clauses.iter().all(|c| matches(doc, c)),
        Clause::Or(clauses) => clauses.iter().any(|c| matches(doc, c)),
        Clause::Not(inner) => !matches(doc, inner),
    }
}

/// Check a document against every clause of a set (implicit AND).
pub fn matches_all(doc: &Document, clauses: &[Clause]) -> bool {
    clauses.iter().all(|c| matches(doc, c))
}

// Arrays match when any element does; scalars are checked directly.
fn value_matches(value: &Option<Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrondb_core::{Analyzer, DocId, GeoBox};
    use serde_json::json;

    fn doc(id: &str, payload: serde_json::Value) -> Document {
        Document::from_value(DocId::new(id).unwrap(), payload).unwrap()
    }

    #[test]
    fn test_term_on_string_and_number() {
        let d = doc("user:1", json!({"name": "John", "age": 30}));
        assert!(matches(&d, &Clause::term("name", "John")));
        assert!(matches(&d, &Clause::term("age", "30")));
        assert!(!matches(&d, &Clause::term("name", "Jane")));
        assert!(!matches(&d, &Clause::term("ghost", "x")));
    }

    #[test]
    fn test_reserved_fields() {
        let d = doc("user:1", json!({}));
        assert!(matches(&d, &Clause::term("id", "user:1")));
        assert!(matches(&d, &Clause::term("_table", "user")));
    }

    #[test]
    fn test_dotted_path_lookup() {
        let d = doc("a", json!({"address": {"city": "Lisbon"}}));
        assert!(matches(&d, &Clause::term("address.city", "Lisbon")));
        assert!(!matches(&d, &Clause::term("address.street", "x")));
    }

    #[test]
    fn test_array_any_element() {
        let d = doc("a", json!({"tags": ["red", "blue"]}));
        assert!(matches(&d, &Clause::term("tags", "red")));
        assert!(matches(&d, &Clause::term("tags", "blue")));
        assert!(!matches(&d, &Clause::term("tags", "green")));
    }

    #[test]
    fn test_ranges() {
        let d = doc("a", json!({"age": 30, "score": 0.5}));
        assert!(matches(&d, &Clause::range_long("age", Some(18), Some(65))));
        assert!(!matches(&d, &Clause::range_long("age", Some(31), None)));
        assert!(matches(&d, &Clause::range_double("score", None, Some(0.5))));
        assert!(!matches(&d, &Clause::range_double("score", Some(0.6), None)));
        // Integer fields satisfy double ranges
        assert!(matches(&d, &Clause::range_double("age", Some(29.5), Some(30.5))));
        // Float fields do not satisfy integer ranges
        assert!(!matches(&d, &Clause::range_long("score", Some(0), Some(1))));
    }

    #[test]
    fn test_wildcard_and_prefix() {
        let d = doc("a", json!({"name": "Jonathan"}));
        assert!(matches(&d, &Clause::prefix("name", "Jon")));
        assert!(matches(&d, &Clause::wildcard("name", "Jo*han?")));
        assert!(!matches(&d, &Clause::wildcard("name", "Jo?")));
    }

    #[test]
    fn test_fts_standard_and_keyword() {
        let d = doc("a", json!({"content": "The quick brown fox"}));
        assert!(matches(&d, &Clause::fts("content", "quick")));
        assert!(matches(&d, &Clause::fts("content", "QUICK fox")));
        assert!(!matches(&d, &Clause::fts("content", "turtle")));

        let keyword = Clause::Fts {
            field: "content".to_string(),
            value: "the quick brown fox".to_string(),
            analyzer: Analyzer::Keyword,
        };
        assert!(matches(&d, &keyword));
    }

    #[test]
    fn test_geo() {
        let d = doc("a", json!({"loc": [38.7, -9.1]}));
        let clause = Clause::Geo {
            field: "loc".to_string(),
            bbox: GeoBox {
                min_lat: 38.0,
                min_lon: -10.0,
                max_lat: 39.0,
                max_lon: -9.0,
            },
        };
        assert!(matches(&d, &clause));
    }

    #[test]
    fn test_boolean_combinators() {
        let d = doc("a", json!({"x": 1, "y": 2}));
        assert!(matches(
            &d,
            &Clause::And(vec![Clause::term("x", "1"), Clause::term("y", "2")])
        ));
        assert!(matches(
            &d,
            &Clause::Or(vec![Clause::term("x", "9"), Clause::term("y", "2")])
        ));
        assert!(matches(&d, &Clause::Not(Box::new(Clause::term("x", "9")))));
        assert!(matches_all(
            &d,
            &[Clause::exists("x"), Clause::exists("y")]
        ));
        assert!(!matches_all(
            &d,
            &[Clause::exists("x"), Clause::exists("z")]
        ));
    }
}
