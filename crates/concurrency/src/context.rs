//! Transaction context
//!
//! A [`TxContext`] is an explicit value created when a caller enters a write
//! scope and threaded through every write API down to the commit engine. It
//! is never stored in a global or a thread-local; a function that needs the
//! context takes it as a parameter.
//!
//! Status transitions are one-shot: `Pending → Committed` or
//! `Pending → Failed`. A pending context whose process dies leaves WAL
//! records behind; recovery either replays them (the commit marker made it to
//! disk) or reports the transaction failed.

use chrondb_core::{ChronError, ChronResult, Origin};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Scope entered, not yet resolved
    Pending,
    /// Commit applied
    Committed,
    /// Scope exited with an error
    Failed,
}

impl TxStatus {
    /// String form used in notes metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Committed => "committed",
            TxStatus::Failed => "failed",
        }
    }
}

/// Options for opening a transaction scope
#[derive(Debug, Clone)]
pub struct TxOptions {
    /// Protocol surface the write arrived on
    pub origin: Origin,
    /// Acting user, recorded as commit author
    pub user: String,
    /// Free-form flags (e.g. `no-index`, `replicated`)
    pub flags: Vec<String>,
    /// Correlation metadata propagated into the notes sidecar
    pub metadata: BTreeMap<String, String>,
}

impl TxOptions {
    /// Options for an internal write (recovery, restore, schema maintenance).
    pub fn internal() -> Self {
        TxOptions {
            origin: Origin::Internal,
            user: "internal".to_string(),
            flags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Options for a given origin and user.
    pub fn for_user(origin: Origin, user: impl Into<String>) -> Self {
        TxOptions {
            origin,
            user: user.into(),
            flags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a flag.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Add a metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Per-transaction context, passed explicitly through all write paths
#[derive(Debug, Clone)]
pub struct TxContext {
    tx_id: Uuid,
    origin: Origin,
    user: String,
    flags: Vec<String>,
    metadata: BTreeMap<String, String>,
    started_at: DateTime<Utc>,
    status: TxStatus,
    failure: Option<String>,
}

impl TxContext {
    /// Enter a transaction scope.
    pub fn begin(options: TxOptions) -> Self {
        TxContext {
            tx_id: Uuid::new_v4(),
            origin: options.origin,
            user: options.user,
            flags: options.flags,
            metadata: options.metadata,
            started_at: Utc::now(),
            status: TxStatus::Pending,
            failure: None,
        }
    }

    /// Transaction id.
    pub fn tx_id(&self) -> Uuid {
        self.tx_id
    }

    /// Origin surface.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Acting user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Flags set at begin.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Check a flag.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Correlation metadata.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// When the scope was entered.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current status.
    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Check whether the context can still drive a commit.
    pub fn is_pending(&self) -> bool {
        self.status == TxStatus::Pending
    }

    /// Resolve the scope as committed. One-shot.
    pub fn commit(&mut self) -> ChronResult<()> {
        match self.status {
            TxStatus::Pending => {
                self.status = TxStatus::Committed;
                Ok(())
            }
            other => Err(ChronError::internal(format!(
                "transaction {} already {}",
                self.tx_id,
                other.as_str()
            ))),
        }
    }

    /// Resolve the scope as failed. One-shot.
    pub fn fail(&mut self, reason: impl Into<String>) -> ChronResult<()> {
        match self.status {
            TxStatus::Pending => {
                self.status = TxStatus::Failed;
                self.failure = Some(reason.into());
                Ok(())
            }
            other => Err(ChronError::internal(format!(
                "transaction {} already {}",
                self.tx_id,
                other.as_str()
            ))),
        }
    }

    /// Failure reason, when failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Snapshot of this context for the notes sidecar.
    pub fn record(&self) -> TxRecord {
        TxRecord {
            tx_id: self.tx_id,
            origin: self.origin,
            user: self.user.clone(),
            flags: self.flags.clone(),
            metadata: self.metadata.clone(),
            started_at: self.started_at,
            status: self.status,
        }
    }
}

/// Serializable transaction record, stored in the notes sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Transaction id
    pub tx_id: Uuid,
    /// Protocol surface
    pub origin: Origin,
    /// Acting user
    pub user: String,
    /// Flags set at begin
    #[serde(default)]
    pub flags: Vec<String>,
    /// Correlation metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// When the scope was entered
    pub started_at: DateTime<Utc>,
    /// Status at record time
    pub status: TxStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_pending() {
        let ctx = TxContext::begin(TxOptions::for_user(Origin::Rest, "alice"));
        assert!(ctx.is_pending());
        assert_eq!(ctx.origin(), Origin::Rest);
        assert_eq!(ctx.user(), "alice");
        assert!(ctx.failure().is_none());
    }

    #[test]
    fn test_commit_is_one_shot() {
        let mut ctx = TxContext::begin(TxOptions::internal());
        ctx.commit().unwrap();
        assert_eq!(ctx.status(), TxStatus::Committed);
        assert!(ctx.commit().is_err());
        assert!(ctx.fail("late").is_err());
    }

    #[test]
    fn test_fail_records_reason() {
        let mut ctx = TxContext::begin(TxOptions::internal());
        ctx.fail("WAL write failed").unwrap();
        assert_eq!(ctx.status(), TxStatus::Failed);
        assert_eq!(ctx.failure(), Some("WAL write failed"));
        assert!(ctx.commit().is_err());
    }

    #[test]
    fn test_flags_and_metadata() {
        let ctx = TxContext::begin(
            TxOptions::for_user(Origin::Sql, "bob")
                .flag("no-index")
                .meta("request-id", "r-123"),
        );
        assert!(ctx.has_flag("no-index"));
        assert!(!ctx.has_flag("other"));
        assert_eq!(ctx.metadata().get("request-id").unwrap(), "r-123");
    }

    #[test]
    fn test_record_round_trips_as_json() {
        let mut ctx = TxContext::begin(TxOptions::for_user(Origin::Redis, "carol"));
        ctx.commit().unwrap();
        let record = ctx.record();
        let json = serde_json::to_string(&record).unwrap();
        let back: TxRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
        assert_eq!(back.status, TxStatus::Committed);
        assert_eq!(back.origin, Origin::Redis);
    }

    #[test]
    fn test_tx_ids_are_unique() {
        let a = TxContext::begin(TxOptions::internal());
        let b = TxContext::begin(TxOptions::internal());
        assert_ne!(a.tx_id(), b.tx_id());
    }
}
