//! Joins
//!
//! Inner and left joins only, on a single field-equality pair, realized as a
//! hash-assisted nested loop with the smaller side collected into the probe
//! map. Output columns are prefix-qualified (`user.name`, `order.total`) so
//! same-named fields from both sides never collide.

use crate::aggregate::Row;
use serde_json::Value;
use std::collections::HashMap;

/// Join flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Rows of both sides where the keys match
    Inner,
    /// Every left row, with right columns absent on a miss
    Left,
}

/// One join of a select
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    /// Right-side table name
    pub table: String,
    /// Join field on the left side
    pub left_field: String,
    /// Join field on the right side
    pub right_field: String,
    /// Inner or left
    pub kind: JoinKind,
}

fn join_key(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn qualify(table: &str, row: &Row) -> Row {
    row.iter()
        .map(|(k, v)| (format!("{}.{}", table, k), v.clone()))
        .collect()
}

/// Join two row sets on one equality.
pub fn execute_join(
    left_table: &str,
    left: &[Row],
    right_table: &str,
    right: &[Row],
    spec: &JoinSpec,
) -> Vec<Row> {
    // Hash the smaller side; left joins must still iterate the left side
    // outermost, so the hash side is fixed to the right for them.
    let hash_right = spec.kind == JoinKind::Left || right.len() <= left.len();

    let mut out = Vec::new();
    if hash_right {
        let mut probe: HashMap<String, Vec<&Row>> = HashMap::new();
        for row in right {
            if let Some(key) = join_key(row.get(&spec.right_field)) {
                probe.entry(key).or_default().push(row);
            }
        }
        for left_row in left {
            let matches = join_key(left_row.get(&spec.left_field))
                .and_then(|key| probe.get(&key))
                .map(|rows| rows.as_slice())
                .unwrap_or(&[]);
            if matches.is_empty() {
                if spec.kind == JoinKind::Left {
                    out.push(qualify(left_table, left_row));
                }
                continue;
            }
            for right_row in matches {
                let mut joined = qualify(left_table, left_row);
                joined.extend(qualify(right_table, right_row));
                out.push(joined);
            }
        }
    } else {
        let mut probe: HashMap<String, Vec<&Row>> = HashMap::new();
        for row in left {
            if let Some(key) = join_key(row.get(&spec.left_field)) {
                probe.entry(key).or_default().push(row);
            }
        }
        for right_row in right {
            if let Some(rows) = join_key(right_row.get(&spec.right_field))
                .and_then(|key| probe.get(&key))
            {
                for left_row in rows {
                    let mut joined = qualify(left_table, left_row);
                    joined.extend(qualify(right_table, right_row));
                    out.push(joined);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn users() -> Vec<Row> {
        vec![
            row(&[("id", json!("1")), ("name", json!("Alice"))]),
            row(&[("id", json!("2")), ("name", json!("Bob"))]),
        ]
    }

    fn orders() -> Vec<Row> {
        vec![
            row(&[("id", json!("o1")), ("user_id", json!("1")), ("total", json!(10))]),
            row(&[("id", json!("o2")), ("user_id", json!("1")), ("total", json!(20))]),
            row(&[("id", json!("o3")), ("user_id", json!("9")), ("total", json!(30))]),
        ]
    }

    fn spec(kind: JoinKind) -> JoinSpec {
        JoinSpec {
            table: "orders".to_string(),
            left_field: "id".to_string(),
            right_field: "user_id".to_string(),
            kind,
        }
    }

    #[test]
    fn test_inner_join_matches_only() {
        let out = execute_join("users", &users(), "orders", &orders(), &spec(JoinKind::Inner));
        assert_eq!(out.len(), 2);
        for joined in &out {
            assert_eq!(joined["users.name"], json!("Alice"));
            assert_eq!(joined["orders.user_id"], json!("1"));
        }
    }

    #[test]
    fn test_left_join_keeps_misses() {
        let out = execute_join("users", &users(), "orders", &orders(), &spec(JoinKind::Left));
        assert_eq!(out.len(), 3);
        let bob: Vec<&Row> = out
            .iter()
            .filter(|r| r["users.name"] == json!("Bob"))
            .collect();
        assert_eq!(bob.len(), 1);
        assert!(!bob[0].contains_key("orders.total"));
    }

    #[test]
    fn test_qualified_names_never_collide() {
        let out = execute_join("users", &users(), "orders", &orders(), &spec(JoinKind::Inner));
        // Both sides had an `id` column; both survive under their prefixes
        assert!(out[0].contains_key("users.id"));
        assert!(out[0].contains_key("orders.id"));
    }

    #[test]
    fn test_numeric_keys_join_with_string_form() {
        let left = vec![row(&[("k", json!(7))])];
        let right = vec![row(&[("k", json!("7")), ("v", json!("hit"))])];
        let spec = JoinSpec {
            table: "r".to_string(),
            left_field: "k".to_string(),
            right_field: "k".to_string(),
            kind: JoinKind::Inner,
        };
        let out = execute_join("l", &left, "r", &right, &spec);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["r.v"], json!("hit"));
    }

    #[test]
    fn test_smaller_left_side_hashed_for_inner() {
        // One left row against three right rows still yields the same result
        let left = vec![row(&[("id", json!("1"))])];
        let out = execute_join("users", &left, "orders", &orders(), &spec(JoinKind::Inner));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_missing_join_field_is_a_miss() {
        let left = vec![row(&[("name", json!("no key"))])];
        let inner = execute_join("l", &left, "orders", &orders(), &spec(JoinKind::Inner));
        assert!(inner.is_empty());
        let left_join = execute_join("l", &left, "orders", &orders(), &spec(JoinKind::Left));
        assert_eq!(left_join.len(), 1);
    }
}
