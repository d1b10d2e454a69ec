//! Foundational identifier types
//!
//! This module defines the identifiers used throughout the system:
//! - ObjectId: 128-bit content address rendered as 32 hex characters
//! - BranchName: validated branch identifier
//! - DocId / TableName: document addressing
//! - Origin: which protocol surface produced a write

use crate::error::{ChronError, ChronResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of an [`ObjectId`] in bytes.
pub const OBJECT_ID_LEN: usize = 16;

/// Length of an [`ObjectId`] in hex characters.
pub const OBJECT_ID_HEX_LEN: usize = OBJECT_ID_LEN * 2;

/// Default branch name used when none is configured.
pub const DEFAULT_BRANCH: &str = "main";

// ============================================================================
// ObjectId
// ============================================================================

/// Content address of a stored object
///
/// The id of an object is the SHA-256 digest of its canonical serialization,
/// truncated to 16 bytes and rendered as 32 lowercase hex characters.
/// Identical bytes always produce the same id, so object writes are
/// idempotent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        ObjectId(bytes)
    }

    /// Hash canonical object bytes into an id.
    pub fn hash(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; OBJECT_ID_LEN];
        out.copy_from_slice(&digest[..OBJECT_ID_LEN]);
        ObjectId(out)
    }

    /// Parse a 32-character hex string.
    pub fn from_hex(hex: &str) -> ChronResult<Self> {
        if hex.len() != OBJECT_ID_HEX_LEN || !hex.is_ascii() {
            return Err(ChronError::invalid_input(format!(
                "object id must be {} hex chars, got {:?}",
                OBJECT_ID_HEX_LEN, hex
            )));
        }
        let mut out = [0u8; OBJECT_ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| ChronError::invalid_input(format!("bad hex in object id: {}", hex)))?;
        }
        Ok(ObjectId(out))
    }

    /// Render as 32 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(OBJECT_ID_HEX_LEN);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Leading two hex characters, used as the on-disk fan-out directory.
    pub fn hex_prefix(&self) -> String {
        format!("{:02x}", self.0[0])
    }

    /// Remaining 30 hex characters after the fan-out prefix.
    pub fn hex_rest(&self) -> String {
        self.to_hex()[2..].to_string()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// BranchName
// ============================================================================

/// Validated branch name
///
/// Branch names are non-empty, at most 255 bytes, drawn from
/// `[A-Za-z0-9._/-]`, and may not start with `-` or `.` or contain `..`.
/// A branch is ChronDB's schema unit: SQL schema `public` maps to `main`,
/// any other schema name maps to the branch of the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

/// Maximum branch name length in bytes.
pub const MAX_BRANCH_NAME_LEN: usize = 255;

impl BranchName {
    /// Validate and construct a branch name.
    pub fn new(name: impl Into<String>) -> ChronResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ChronError::invalid_input("branch name must not be empty"));
        }
        if name.len() > MAX_BRANCH_NAME_LEN {
            return Err(ChronError::invalid_input(format!(
                "branch name exceeds {} bytes",
                MAX_BRANCH_NAME_LEN
            )));
        }
        if name.starts_with('-') || name.starts_with('.') {
            return Err(ChronError::invalid_input(format!(
                "branch name may not start with '-' or '.': {}",
                name
            )));
        }
        if name.contains("..") {
            return Err(ChronError::invalid_input(format!(
                "branch name may not contain '..': {}",
                name
            )));
        }
        let ok = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-'));
        if !ok {
            return Err(ChronError::invalid_input(format!(
                "branch name contains invalid characters: {}",
                name
            )));
        }
        Ok(BranchName(name))
    }

    /// The default branch, `main`.
    pub fn default_branch() -> Self {
        BranchName(DEFAULT_BRANCH.to_string())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BranchName {
    type Err = ChronError;

    fn from_str(s: &str) -> ChronResult<Self> {
        BranchName::new(s)
    }
}

// ============================================================================
// DocId / TableName
// ============================================================================

/// Document identifier, unique within a branch
///
/// Ids of the form `table:rest` carry their table in the prefix; ids with no
/// colon belong to the catch-all `doc` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

/// Table used for ids that carry no `table:` prefix.
pub const DEFAULT_TABLE: &str = "doc";

impl DocId {
    /// Construct a document id.
    pub fn new(id: impl Into<String>) -> ChronResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ChronError::invalid_input("document id must not be empty"));
        }
        Ok(DocId(id))
    }

    /// Table inferred from the id prefix, or [`DEFAULT_TABLE`].
    pub fn table(&self) -> TableName {
        match self.0.split_once(':') {
            Some((table, rest)) if !table.is_empty() && !rest.is_empty() => {
                TableName(table.to_string())
            }
            _ => TableName(DEFAULT_TABLE.to_string()),
        }
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Table name; tables are directories inside a commit tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

/// Table holding schema records (`_schema/<table>.json`).
pub const SCHEMA_TABLE: &str = "_schema";

impl TableName {
    /// Construct a table name.
    pub fn new(name: impl Into<String>) -> ChronResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ChronError::invalid_input("table name must not be empty"));
        }
        if name.contains('/') {
            return Err(ChronError::invalid_input(format!(
                "table name may not contain '/': {}",
                name
            )));
        }
        Ok(TableName(name))
    }

    /// The schema table.
    pub fn schema() -> Self {
        TableName(SCHEMA_TABLE.to_string())
    }

    /// Check whether this is the schema table.
    pub fn is_schema(&self) -> bool {
        self.0 == SCHEMA_TABLE
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Origin
// ============================================================================

/// Which protocol surface produced a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// REST/HTTP API
    Rest,
    /// RESP command server
    Redis,
    /// PostgreSQL wire protocol
    Sql,
    /// Internal operations (recovery replay, restore, schema maintenance)
    Internal,
}

impl Origin {
    /// String form used in notes metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Rest => "rest",
            Origin::Redis => "redis",
            Origin::Sql => "sql",
            Origin::Internal => "internal",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
