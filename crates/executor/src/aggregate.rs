//! Grouping and aggregation
//!
//! GROUP BY keys are tuples of field values; aggregates run per group with
//! numeric coercion: JSON numbers directly, strings by extracting their
//! trailing digit run (`"order-123"` → 123). Rows whose aggregate input
//! cannot be coerced are skipped by sum/avg and counted by count.

use chrondb_index::compare_values;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// A result row: column name → value
pub type Row = BTreeMap<String, Value>;

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    /// Row count
    Count,
    /// Numeric sum
    Sum,
    /// Numeric average
    Avg,
    /// Minimum by value order
    Min,
    /// Maximum by value order
    Max,
}

/// One aggregate column of a select
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    /// Function to apply
    pub func: AggFunc,
    /// Input field; `None` only for `Count`
    pub field: Option<String>,
    /// Output column name
    pub alias: String,
}

impl AggregateSpec {
    /// `COUNT(*)`.
    pub fn count() -> Self {
        AggregateSpec {
            func: AggFunc::Count,
            field: None,
            alias: "count".to_string(),
        }
    }

    /// An aggregate over a field with the conventional alias.
    pub fn over(func: AggFunc, field: impl Into<String>) -> Self {
        let field = field.into();
        let name = match func {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        };
        AggregateSpec {
            func,
            alias: format!("{}({})", name, field),
            field: Some(field),
        }
    }

    /// Override the output column name.
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

/// Coerce a value to a number: JSON numbers directly, strings by their
/// trailing digit run.
pub fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

fn apply(func: AggFunc, field: Option<&String>, rows: &[&Row]) -> Value {
    match func {
        AggFunc::Count => match field {
            None => json!(rows.len()),
            Some(field) => json!(rows.iter().filter(|r| r.contains_key(field)).count()),
        },
        AggFunc::Sum | AggFunc::Avg => {
            let field = match field {
                Some(f) => f,
                None => return Value::Null,
            };
            let nums: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.get(field))
                .filter_map(coerce_numeric)
                .collect();
            if nums.is_empty() {
                return Value::Null;
            }
            let sum: f64 = nums.iter().sum();
            let result = if func == AggFunc::Sum {
                sum
            } else {
                sum / nums.len() as f64
            };
            // Integral results render as integers, matching SQL expectations
            if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
                json!(result as i64)
            } else {
                json!(result)
            }
        }
        AggFunc::Min | AggFunc::Max => {
            let field = match field {
                Some(f) => f,
                None => return Value::Null,
            };
            let mut values: Vec<&Value> = rows.iter().filter_map(|r| r.get(field)).collect();
            values.sort_by(|a, b| compare_values(a, b));
            let picked = if func == AggFunc::Min {
                values.first()
            } else {
                values.last()
            };
            picked.cloned().cloned().unwrap_or(Value::Null)
        }
    }
}

/// Group rows by a key tuple and compute aggregates per group.
///
/// Without `group_by`, the whole input is one group and the output is a
/// single row. Group-key columns appear in the output alongside aggregate
/// aliases.
pub fn group_and_aggregate(
    rows: &[Row],
    group_by: &[String],
    aggregates: &[AggregateSpec],
) -> Vec<Row> {
    if group_by.is_empty() {
        let refs: Vec<&Row> = rows.iter().collect();
        let mut out = Row::new();
        for spec in aggregates {
            out.insert(spec.alias.clone(), apply(spec.func, spec.field.as_ref(), &refs));
        }
        return vec![out];
    }

    // Group key = canonical JSON of the key tuple, so composite and
    // heterogeneous keys group correctly.
    let mut groups: BTreeMap<String, (Vec<Value>, Vec<&Row>)> = BTreeMap::new();
    for row in rows {
        let key_values: Vec<Value> = group_by
            .iter()
            .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
            .collect();
        let key = serde_json::to_string(&key_values).unwrap_or_default();
        groups.entry(key).or_insert_with(|| (key_values, Vec::new())).1.push(row);
    }

    groups
        .into_values()
        .map(|(key_values, members)| {
            let mut out = Row::new();
            for (field, value) in group_by.iter().zip(key_values) {
                out.insert(field.clone(), value);
            }
            for spec in aggregates {
                out.insert(
                    spec.alias.clone(),
                    apply(spec.func, spec.field.as_ref(), &members),
                );
            }
            out
        })
        .collect()
}
