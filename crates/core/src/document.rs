//! Document model and canonical JSON codec
//!
//! A document is a mapping from string keys to JSON values, always carrying
//! `id` and `_table`. Documents are never mutated in place; every update
//! produces a new version stored as a new commit. The canonical encoding is
//! compact JSON with lexicographically sorted keys, so
//! `encode(decode(bytes)) == bytes` holds for all canonical inputs.

use crate::error::{ChronError, ChronResult};
use crate::types::{DocId, TableName};
use serde_json::{Map, Value};

/// Reserved field holding the document id.
pub const FIELD_ID: &str = "id";

/// Reserved field holding the table name.
pub const FIELD_TABLE: &str = "_table";

// ============================================================================
// Document
// ============================================================================

/// A schemaless document
///
/// `fields` holds the user payload; `id` and `_table` are injected on encode
/// and stripped on construction so they cannot drift from the typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Unique id within a branch
    pub id: DocId,
    /// Table this document belongs to
    pub table: TableName,
    /// User payload
    pub fields: Map<String, Value>,
}

impl Document {
    /// Build a document from an id and a payload map.
    ///
    /// The table is inferred from the id prefix unless the payload carries an
    /// explicit `_table` string. Reserved fields present in the payload are
    /// stripped into the typed slots.
    pub fn new(id: DocId, mut fields: Map<String, Value>) -> ChronResult<Self> {
        fields.remove(FIELD_ID);
        let table = match fields.remove(FIELD_TABLE) {
            Some(Value::String(t)) => TableName::new(t)?,
            Some(other) => {
                return Err(ChronError::bad_document(format!(
                    "_table must be a string, got {}",
                    json_type_name(&other)
                )))
            }
            None => id.table(),
        };
        Ok(Document { id, table, fields })
    }

    /// Build a document from an id and any JSON value.
    ///
    /// Only objects are valid document payloads.
    pub fn from_value(id: DocId, value: Value) -> ChronResult<Self> {
        match value {
            Value::Object(map) => Document::new(id, map),
            other => Err(ChronError::bad_document(format!(
                "document payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match field {
            FIELD_ID => None,
            FIELD_TABLE => None,
            _ => self.fields.get(field),
        }
    }

    /// Full JSON form including `id` and `_table`.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(FIELD_ID.to_string(), Value::String(self.id.to_string()));
        map.insert(
            FIELD_TABLE.to_string(),
            Value::String(self.table.to_string()),
        );
        Value::Object(map)
    }

    /// Canonical bytes: compact JSON with sorted keys at every level.
    pub fn encode(&self) -> ChronResult<Vec<u8>> {
        encode_canonical(&self.to_value())
    }

    /// Decode canonical bytes into a document.
    ///
    /// Fails with `BadDocument` when the bytes are not valid JSON, not an
    /// object, or missing the `id` field.
    pub fn decode(bytes: &[u8]) -> ChronResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ChronError::bad_document(format!("invalid JSON: {}", e)))?;
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ChronError::bad_document(format!(
                    "document must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };
        let id = match map.remove(FIELD_ID) {
            Some(Value::String(s)) => DocId::new(s)?,
            Some(other) => {
                return Err(ChronError::bad_document(format!(
                    "id must be a string, got {}",
                    json_type_name(&other)
                )))
            }
            None => return Err(ChronError::bad_document("document is missing 'id'")),
        };
        Document::new(id, map)
    }

    /// Shallow-merge `incoming` on top of this document's fields.
    ///
    /// Top-level keys from `incoming` replace existing keys; keys absent from
    /// `incoming` are kept. Used by merge-save.
    pub fn merged_with(&self, incoming: &Map<String, Value>) -> Document {
        let mut fields = self.fields.clone();
        for (k, v) in incoming {
            if k == FIELD_ID || k == FIELD_TABLE {
                continue;
            }
            fields.insert(k.clone(), v.clone());
        }
        Document {
            id: self.id.clone(),
            table: self.table.clone(),
            fields,
        }
    }
}

// ============================================================================
// Canonical JSON
// ============================================================================

/// Serialize a JSON value into canonical bytes.
///
/// Canonical means compact separators and object keys sorted
/// lexicographically at every nesting level. Arrays keep their order.
pub fn encode_canonical(value: &Value) -> ChronResult<Vec<u8>> {
    let sorted = sort_value(value);
    serde_json::to_vec(&sorted).map_err(|e| ChronError::bad_document(e.to_string()))
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // serde_json's default Map is a BTreeMap, so inserting in any
            // order yields sorted serialization.
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), sort_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Human name of a JSON value's type, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Change sets
// ============================================================================

/// One mutation inside a commit's change set
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Write (create or replace) a document
    Put(Document),
    /// Tombstone a document; its table is inferred from the id prefix
    Delete(DocId),
    /// Tombstone a document stored in an explicit table (used when the
    /// table does not match the id prefix, e.g. schema records)
    DeleteIn(TableName, DocId),
}

impl Change {
    /// Id the change applies to.
    pub fn doc_id(&self) -> &DocId {
        match self {
            Change::Put(doc) => &doc.id,
            Change::Delete(id) => id,
            Change::DeleteIn(_, id) => id,
        }
    }

    /// Table the change applies to.
    pub fn table(&self) -> TableName {
        match self {
            Change::Put(doc) => doc.table.clone(),
            Change::Delete(id) => id.table(),
            Change::DeleteIn(table, _) => table.clone(),
        }
    }

    /// Short op name used in WAL records and commit messages.
    pub fn op_name(&self) -> &'static str {
        match self {
            Change::Put(_) => "put",
            Change::Delete(_) | Change::DeleteIn(..) => "delete",
        }
    }

    /// Check whether this is a delete.
    pub fn is_delete(&self) -> bool {
        !matches!(self, Change::Put(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, payload: Value) -> Document {
        Document::from_value(DocId::new(id).unwrap(), payload).unwrap()
    }

    #[test]
    fn test_table_inferred_from_id_prefix() {
        let d = doc("user:1", json!({"name": "John", "age": 30}));
        assert_eq!(d.table.as_str(), "user");
        assert_eq!(d.id.as_str(), "user:1");
    }

    #[test]
    fn test_explicit_table_wins_over_prefix() {
        let d = doc("user:1", json!({"_table": "people"}));
        assert_eq!(d.table.as_str(), "people");
    }

    #[test]
    fn test_to_value_injects_reserved_fields() {
        let d = doc("user:1", json!({"name": "John", "age": 30}));
        let v = d.to_value();
        assert_eq!(v["id"], json!("user:1"));
        assert_eq!(v["_table"], json!("user"));
        assert_eq!(v["name"], json!("John"));
        assert_eq!(v["age"], json!(30));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let d = doc("user:1", json!({"name": "John", "age": 30, "tags": ["a", "b"]}));
        let bytes = d.encode().unwrap();
        let back = Document::decode(&bytes).unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn test_canonical_encoding_is_stable() {
        // R1: encode(decode(bytes)) == bytes for canonical input
        let d = doc("user:1", json!({"b": 2, "a": 1}));
        let bytes = d.encode().unwrap();
        let reencoded = Document::decode(&bytes).unwrap().encode().unwrap();
        assert_eq!(bytes, reencoded);
        // Keys are sorted in the output
        let text = String::from_utf8(bytes).unwrap();
        let a_pos = text.find("\"a\"").unwrap();
        let b_pos = text.find("\"b\"").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = Document::decode(b"{nope").unwrap_err();
        assert!(matches!(err, ChronError::BadDocument { .. }));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = Document::decode(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, ChronError::BadDocument { .. }));
    }

    #[test]
    fn test_decode_requires_id() {
        let err = Document::decode(b"{\"name\":\"x\"}").unwrap_err();
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn test_from_value_rejects_scalar() {
        let err = Document::from_value(DocId::new("a").unwrap(), json!(42)).unwrap_err();
        assert!(matches!(err, ChronError::BadDocument { .. }));
    }

    #[test]
    fn test_merged_with_replaces_top_level_keys() {
        let d = doc("user:1", json!({"name": "John", "age": 30}));
        let mut incoming = Map::new();
        incoming.insert("age".to_string(), json!(31));
        incoming.insert("city".to_string(), json!("Lisbon"));
        let merged = d.merged_with(&incoming);
        assert_eq!(merged.fields["name"], json!("John"));
        assert_eq!(merged.fields["age"], json!(31));
        assert_eq!(merged.fields["city"], json!("Lisbon"));
    }

    #[test]
    fn test_merged_with_ignores_reserved_keys() {
        let d = doc("user:1", json!({"name": "John"}));
        let mut incoming = Map::new();
        incoming.insert("id".to_string(), json!("user:2"));
        incoming.insert("_table".to_string(), json!("evil"));
        let merged = d.merged_with(&incoming);
        assert_eq!(merged.id.as_str(), "user:1");
        assert_eq!(merged.table.as_str(), "user");
    }

    #[test]
    fn test_change_accessors() {
        let put = Change::Put(doc("user:1", json!({})));
        let del = Change::Delete(DocId::new("user:2").unwrap());
        assert_eq!(put.doc_id().as_str(), "user:1");
        assert_eq!(del.doc_id().as_str(), "user:2");
        assert_eq!(put.op_name(), "put");
        assert_eq!(del.op_name(), "delete");
        assert!(del.is_delete());
        assert!(!put.is_delete());
        assert_eq!(put.table().as_str(), "user");
        assert_eq!(del.table().as_str(), "user");
    }

    #[test]
    fn test_delete_in_overrides_table() {
        let del = Change::DeleteIn(
            TableName::new("_schema").unwrap(),
            DocId::new("users").unwrap(),
        );
        assert_eq!(del.table().as_str(), "_schema");
        assert_eq!(del.doc_id().as_str(), "users");
        assert!(del.is_delete());
    }

    #[test]
    fn test_nested_objects_sorted_canonically() {
        let d = doc("a", json!({"outer": {"z": 1, "a": 2}}));
        let text = String::from_utf8(d.encode().unwrap()).unwrap();
        let a_pos = text.find("\"a\":2").unwrap();
        let z_pos = text.find("\"z\":1").unwrap();
        assert!(a_pos < z_pos);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // encode(decode(bytes)) is a fixed point for canonical inputs
            #[test]
            fn canonical_encoding_is_a_fixed_point(
                id in "[a-z]{1,8}:[a-z0-9]{1,8}",
                fields in proptest::collection::btree_map(
                    "[a-z]{1,8}",
                    -1_000_000i64..1_000_000,
                    0..8,
                ),
            ) {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k, Value::from(v));
                }
                let doc = Document::new(DocId::new(id).unwrap(), map).unwrap();
                let bytes = doc.encode().unwrap();
                let reencoded = Document::decode(&bytes).unwrap().encode().unwrap();
                prop_assert_eq!(bytes, reencoded);
            }
        }
    }
}
