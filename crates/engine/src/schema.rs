//! Schema store
//!
//! Schemas are ordinary documents in the `_schema` table of a branch, stored
//! at `_schema/<table>.json` and versioned like any other document. They are
//! advisory: nothing checks a document against its table's schema at write
//! time. `describe` falls back to inference from up to ten sampled documents
//! when no record exists.

use crate::database::Database;
use chrondb_concurrency::TxContext;
use chrondb_core::{BranchName, ChronError, ChronResult, Document, DocId, ObjectId, TableName};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Documents sampled when inferring a schema.
pub const INFER_SAMPLE_SIZE: usize = 10;

/// One column of a table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// SQL-ish type name (`TEXT`, `BIGINT`, `DOUBLE PRECISION`, `BOOLEAN`,
    /// `JSONB`)
    #[serde(rename = "type")]
    pub col_type: String,
    /// Primary-key marker
    #[serde(default)]
    pub primary_key: bool,
    /// Whether NULL is allowed
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Uniqueness marker
    #[serde(default)]
    pub unique: bool,
    /// Default value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Plain nullable column of a type.
    pub fn new(name: impl Into<String>, col_type: impl Into<String>) -> Self {
        ColumnDef {
            name: name.into(),
            col_type: col_type.into(),
            primary_key: false,
            nullable: true,
            unique: false,
            default: None,
        }
    }

    /// Primary-key column (`NOT NULL`, unique).
    pub fn primary_key(name: impl Into<String>, col_type: impl Into<String>) -> Self {
        ColumnDef {
            name: name.into(),
            col_type: col_type.into(),
            primary_key: true,
            nullable: false,
            unique: true,
            default: None,
        }
    }
}

/// A table's schema record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    /// Table the schema describes
    pub table: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDef>,
    /// Creation timestamp (milliseconds since epoch)
    pub created_at: i64,
}

/// A table listed by `list_tables`
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    /// Table name
    pub name: TableName,
    /// Whether a schema record exists for it
    pub has_schema: bool,
}

impl SchemaRecord {
    fn to_document(&self) -> ChronResult<Document> {
        let mut fields = serde_json::Map::new();
        fields.insert("_table".to_string(), json!(chrondb_core::SCHEMA_TABLE));
        fields.insert(
            "columns".to_string(),
            serde_json::to_value(&self.columns).map_err(ChronError::from)?,
        );
        fields.insert("created_at".to_string(), json!(self.created_at));
        fields.insert("table".to_string(), json!(self.table));
        Document::new(DocId::new(self.table.clone())?, fields)
    }

    fn from_document(doc: &Document) -> ChronResult<SchemaRecord> {
        let columns = doc
            .fields
            .get("columns")
            .cloned()
            .ok_or_else(|| ChronError::bad_document("schema record missing columns"))?;
        Ok(SchemaRecord {
            table: doc.id.to_string(),
            columns: serde_json::from_value(columns).map_err(ChronError::from)?,
            created_at: doc
                .fields
                .get("created_at")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        })
    }
}

impl Database {
    fn schema_doc(&self, branch: &BranchName, table: &TableName) -> ChronResult<Option<Document>> {
        let id = DocId::new(table.to_string())?;
        self.get_in_table(branch, &TableName::schema(), &id)
    }

    /// Read a table's stored schema record, if any.
    pub fn get_schema(
        &self,
        branch: &BranchName,
        table: &TableName,
    ) -> ChronResult<Option<SchemaRecord>> {
        match self.schema_doc(branch, table)? {
            Some(doc) => Ok(Some(SchemaRecord::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Create a table's schema record.
    ///
    /// With `if_not_exists`, an existing record makes this a no-op; without
    /// it, `SchemaExists`.
    pub fn create_table(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        table: &TableName,
        columns: Vec<ColumnDef>,
        if_not_exists: bool,
    ) -> ChronResult<Option<ObjectId>> {
        if self.get_schema(branch, table)?.is_some() {
            if if_not_exists {
                return Ok(None);
            }
            return Err(ChronError::SchemaExists {
                table: table.to_string(),
            });
        }
        let record = SchemaRecord {
            table: table.to_string(),
            columns,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let doc = record.to_document()?;
        Ok(Some(self.save(ctx, branch, doc)?))
    }

    /// Drop a table: its schema record and all of its documents, in one
    /// commit.
    ///
    /// With `if_exists`, a missing record makes this a no-op; without it,
    /// `SchemaAbsent`.
    pub fn drop_table(
        &self,
        ctx: &mut TxContext,
        branch: &BranchName,
        table: &TableName,
        if_exists: bool,
    ) -> ChronResult<Option<ObjectId>> {
        let had_schema = self.get_schema(branch, table)?.is_some();
        let doc_ids = self.list_ids(branch, table)?;
        if !had_schema && doc_ids.is_empty() {
            if if_exists {
                return Ok(None);
            }
            return Err(ChronError::SchemaAbsent {
                table: table.to_string(),
            });
        }

        let mut changes: Vec<chrondb_core::Change> = Vec::new();
        if had_schema {
            // The schema record lives in the _schema table under the
            // table's name as its id.
            changes.push(chrondb_core::Change::DeleteIn(
                TableName::schema(),
                DocId::new(table.to_string())?,
            ));
        }
        for id in doc_ids {
            changes.push(chrondb_core::Change::DeleteIn(table.clone(), id));
        }
        Ok(Some(self.apply(
            ctx,
            branch,
            changes,
            chrondb_core::Deadline::none(),
        )?))
    }

    /// Tables visible on a branch: the union of schema records and observed
    /// document prefixes, sorted by name.
    pub fn list_tables(&self, branch: &BranchName) -> ChronResult<Vec<TableInfo>> {
        let mut tables: BTreeMap<String, bool> = BTreeMap::new();
        for table in self.table_names(branch)? {
            tables.insert(table.to_string(), false);
        }
        for doc in self.list_by_table(branch, &TableName::schema())? {
            tables.insert(doc.id.to_string(), true);
        }
        tables
            .into_iter()
            .map(|(name, has_schema)| {
                Ok(TableInfo {
                    name: TableName::new(name)?,
                    has_schema,
                })
            })
            .collect()
    }

    /// Describe a table: the stored schema record, or one inferred from up
    /// to [`INFER_SAMPLE_SIZE`] sampled documents.
    pub fn describe(&self, branch: &BranchName, table: &TableName) -> ChronResult<SchemaRecord> {
        if let Some(record) = self.get_schema(branch, table)? {
            return Ok(record);
        }
        let ids = self.list_ids(branch, table)?;
        if ids.is_empty() {
            return Err(ChronError::SchemaAbsent {
                table: table.to_string(),
            });
        }
        let mut columns: BTreeMap<String, String> = BTreeMap::new();
        for id in ids.iter().take(INFER_SAMPLE_SIZE) {
            if let Some(doc) = self.get_in_table(branch, table, id)? {
                for (key, value) in &doc.fields {
                    let inferred = infer_type(value);
                    columns
                        .entry(key.clone())
                        .and_modify(|t| {
                            if t != inferred {
                                *t = "JSONB".to_string();
                            }
                        })
                        .or_insert_with(|| inferred.to_string());
                }
            }
        }
        let mut defs = vec![ColumnDef::primary_key("id", "TEXT")];
        for (name, col_type) in columns {
            defs.push(ColumnDef::new(name, col_type));
        }
        Ok(SchemaRecord {
            table: table.to_string(),
            columns: defs,
            created_at: 0,
        })
    }
}

fn infer_type(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "TEXT",
        Value::Number(n) if n.is_i64() || n.is_u64() => "BIGINT",
        Value::Number(_) => "DOUBLE PRECISION",
        Value::Bool(_) => "BOOLEAN",
        Value::Null => "TEXT",
        Value::Array(_) | Value::Object(_) => "JSONB",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrondb_concurrency::TxOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("data"), &dir.path().join("index")).unwrap();
        (dir, db)
    }

    fn ctx() -> TxContext {
        TxContext::begin(TxOptions::internal())
    }

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn users_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::primary_key("id", "TEXT"),
            ColumnDef {
                nullable: false,
                ..ColumnDef::new("name", "TEXT")
            },
        ]
    }

    #[test]
    fn test_create_and_get_schema() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        db.create_table(&mut ctx(), &main, &table("users"), users_columns(), false)
            .unwrap()
            .unwrap();

        let record = db.get_schema(&main, &table("users")).unwrap().unwrap();
        assert_eq!(record.table, "users");
        assert_eq!(record.columns.len(), 2);
        assert!(record.columns[0].primary_key);
        assert!(!record.columns[1].nullable);
    }

    #[test]
    fn test_create_existing_schema() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        db.create_table(&mut ctx(), &main, &table("users"), users_columns(), false)
            .unwrap();

        let err = db
            .create_table(&mut ctx(), &main, &table("users"), users_columns(), false)
            .unwrap_err();
        assert!(matches!(err, ChronError::SchemaExists { .. }));

        // IF NOT EXISTS is a quiet no-op
        assert!(db
            .create_table(&mut ctx(), &main, &table("users"), users_columns(), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_drop_table_removes_schema_and_data() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        db.create_table(&mut ctx(), &main, &table("users"), users_columns(), false)
            .unwrap();
        db.save(
            &mut ctx(),
            &main,
            Document::from_value(
                DocId::new("users:1").unwrap(),
                json!({"name": "Alice"}),
            )
            .unwrap(),
        )
        .unwrap();

        db.drop_table(&mut ctx(), &main, &table("users"), false)
            .unwrap()
            .unwrap();
        assert!(db.get_schema(&main, &table("users")).unwrap().is_none());
        assert_eq!(db.count(&main, &table("users")).unwrap(), 0);

        let err = db
            .drop_table(&mut ctx(), &main, &table("users"), false)
            .unwrap_err();
        assert!(matches!(err, ChronError::SchemaAbsent { .. }));
        assert!(db
            .drop_table(&mut ctx(), &main, &table("users"), true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_list_tables_union() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        // Schema-only table
        db.create_table(&mut ctx(), &main, &table("users"), users_columns(), false)
            .unwrap();
        // Data-only table
        db.save(
            &mut ctx(),
            &main,
            Document::from_value(DocId::new("order:1").unwrap(), json!({"total": 5}))
                .unwrap(),
        )
        .unwrap();

        let tables = db.list_tables(&main).unwrap();
        let by_name: BTreeMap<String, bool> = tables
            .into_iter()
            .map(|t| (t.name.to_string(), t.has_schema))
            .collect();
        assert_eq!(by_name.get("users"), Some(&true));
        assert_eq!(by_name.get("order"), Some(&false));
        assert!(!by_name.contains_key("_schema"));
    }

    #[test]
    fn test_describe_prefers_stored_schema() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        db.create_table(&mut ctx(), &main, &table("users"), users_columns(), false)
            .unwrap();
        let record = db.describe(&main, &table("users")).unwrap();
        assert_eq!(record.columns.len(), 2);
    }

    #[test]
    fn test_describe_infers_from_samples() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        db.save(
            &mut ctx(),
            &main,
            Document::from_value(
                DocId::new("user:1").unwrap(),
                json!({"name": "John", "age": 30, "score": 0.5, "active": true, "tags": ["a"]}),
            )
            .unwrap(),
        )
        .unwrap();

        let record = db.describe(&main, &table("user")).unwrap();
        let types: BTreeMap<String, String> = record
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.col_type.clone()))
            .collect();
        assert_eq!(types["id"], "TEXT");
        assert_eq!(types["name"], "TEXT");
        assert_eq!(types["age"], "BIGINT");
        assert_eq!(types["score"], "DOUBLE PRECISION");
        assert_eq!(types["active"], "BOOLEAN");
        assert_eq!(types["tags"], "JSONB");
    }

    #[test]
    fn test_describe_unknown_table() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        let err = db.describe(&main, &table("ghost")).unwrap_err();
        assert!(matches!(err, ChronError::SchemaAbsent { .. }));
    }

    #[test]
    fn test_mixed_types_infer_jsonb() {
        let (_dir, db) = open_db();
        let main = db.default_branch().unwrap();
        db.save(
            &mut ctx(),
            &main,
            Document::from_value(DocId::new("m:1").unwrap(), json!({"v": 1})).unwrap(),
        )
        .unwrap();
        db.save(
            &mut ctx(),
            &main,
            Document::from_value(DocId::new("m:2").unwrap(), json!({"v": "text"})).unwrap(),
        )
        .unwrap();

        let record = db.describe(&main, &table("m")).unwrap();
        let v = record.columns.iter().find(|c| c.name == "v").unwrap();
        assert_eq!(v.col_type, "JSONB");
    }
}
