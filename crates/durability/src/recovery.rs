//! Startup recovery scan
//!
//! Groups WAL records past the checkpoint into per-transaction units. A
//! transaction whose commit marker made it to disk is complete and
//! replayable; one without a marker died before its commit step and is
//! reported as failed (its records are skipped and the checkpoint still
//! advances past them). An abort marker fences a transaction whose ref CAS
//! never succeeded, so a failed write is never resurrected by replay. The
//! engine decides per complete transaction whether the commit object already
//! exists (nothing to do) or must be re-applied.

use crate::wal::{Wal, WalOp, WalRecord};
use chrondb_core::{ChronResult, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Metadata carried in a commit marker's payload
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommitMarker {
    /// Commit message
    #[serde(default)]
    pub message: String,
    /// Author recorded on the commit
    #[serde(default)]
    pub author: String,
    /// Commit timestamp (milliseconds since epoch)
    #[serde(default)]
    pub timestamp_ms: i64,
}

/// One complete transaction recovered from the WAL
#[derive(Debug, Clone)]
pub struct RecoveredTx {
    /// Transaction id
    pub tx_id: Uuid,
    /// Branch the transaction targeted
    pub branch: String,
    /// Put/delete records in sequence order
    pub changes: Vec<WalRecord>,
    /// Target commit id from the marker
    pub commit_id: ObjectId,
    /// Marker metadata
    pub marker: CommitMarker,
    /// Highest sequence number of the transaction
    pub max_seq: u64,
}

/// Result of scanning the WAL at startup
#[derive(Debug, Default)]
pub struct RecoveryPlan {
    /// Complete transactions, in commit order
    pub complete: Vec<RecoveredTx>,
    /// Transactions with no commit marker (writer died mid-commit)
    pub incomplete: usize,
    /// Transactions explicitly aborted (CAS never succeeded)
    pub aborted: usize,
    /// Highest sequence number seen in the scan (checkpoint target)
    pub max_seq: u64,
}

impl RecoveryPlan {
    /// Check whether the scan found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.complete.is_empty() && self.incomplete == 0 && self.aborted == 0
    }
}

/// Scan the WAL for records past `after_seq` and group them by transaction.
pub fn scan(wal: &Wal, after_seq: u64) -> ChronResult<RecoveryPlan> {
    let records = wal.read_from(after_seq)?;
    let mut plan = RecoveryPlan::default();
    if records.is_empty() {
        return Ok(plan);
    }

    // Pending changes per transaction, in arrival order.
    let mut open: HashMap<Uuid, Vec<WalRecord>> = HashMap::new();
    let mut order: Vec<Uuid> = Vec::new();

    for record in records {
        plan.max_seq = plan.max_seq.max(record.seq);
        match record.op {
            WalOp::Put | WalOp::Delete => {
                if !open.contains_key(&record.tx_id) {
                    order.push(record.tx_id);
                }
                open.entry(record.tx_id).or_default().push(record);
            }
            WalOp::Abort => {
                if open.remove(&record.tx_id).is_some() {
                    plan.aborted += 1;
                }
                order.retain(|id| *id != record.tx_id);
                // Also fences any marker this transaction already wrote; a
                // retried CAS aborts its previous attempt before re-appending.
                let before = plan.complete.len();
                plan.complete
                    .retain(|tx| !(tx.tx_id == record.tx_id && tx.max_seq < record.seq));
                plan.aborted += before - plan.complete.len();
            }
            WalOp::Commit => {
                let changes = open.remove(&record.tx_id).unwrap_or_default();
                order.retain(|id| *id != record.tx_id);
                let commit_id = match ObjectId::from_hex(&record.doc_id) {
                    Ok(id) => id,
                    Err(_) => {
                        warn!(tx = %record.tx_id, "commit marker with bad commit id, skipping");
                        plan.incomplete += 1;
                        continue;
                    }
                };
                let marker: CommitMarker =
                    serde_json::from_slice(&record.payload).unwrap_or_default();
                let max_seq = record.seq;
                plan.complete.push(RecoveredTx {
                    tx_id: record.tx_id,
                    branch: record.branch,
                    changes,
                    commit_id,
                    marker,
                    max_seq,
                });
            }
        }
    }

    plan.incomplete += open.len();
    for tx_id in order {
        warn!(tx = %tx_id, "transaction without commit marker, marking failed");
    }
    info!(
        complete = plan.complete.len(),
        incomplete = plan.incomplete,
        max_seq = plan.max_seq,
        "WAL recovery scan"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalEntry;
    use tempfile::TempDir;

    fn put(id: &str, payload: &[u8]) -> WalEntry {
        WalEntry {
            op: WalOp::Put,
            doc_id: id.to_string(),
            payload: payload.to_vec(),
        }
    }

    fn marker(commit_id: &ObjectId) -> WalEntry {
        WalEntry {
            op: WalOp::Commit,
            doc_id: commit_id.to_hex(),
            payload: serde_json::to_vec(&CommitMarker {
                message: "put user:1".to_string(),
                author: "t".to_string(),
                timestamp_ms: 1,
            })
            .unwrap(),
        }
    }

    #[test]
    fn test_scan_empty_wal() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();
        let plan = scan(&wal, 0).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.max_seq, 0);
    }

    #[test]
    fn test_complete_transaction_recovered() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();
        let tx = Uuid::new_v4();
        let commit_id = ObjectId::hash(b"commit");
        wal.append_commit(tx, "main", &[put("user:1", b"{}"), marker(&commit_id)])
            .unwrap();

        let plan = scan(&wal, 0).unwrap();
        assert_eq!(plan.complete.len(), 1);
        assert_eq!(plan.incomplete, 0);
        let recovered = &plan.complete[0];
        assert_eq!(recovered.tx_id, tx);
        assert_eq!(recovered.branch, "main");
        assert_eq!(recovered.commit_id, commit_id);
        assert_eq!(recovered.changes.len(), 1);
        assert_eq!(recovered.marker.message, "put user:1");
        assert_eq!(plan.max_seq, 2);
    }

    #[test]
    fn test_incomplete_transaction_marked_failed() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();
        // A put with no commit marker: the writer died before its commit step
        wal.append_commit(Uuid::new_v4(), "main", &[put("user:1", b"{}")])
            .unwrap();

        let plan = scan(&wal, 0).unwrap();
        assert_eq!(plan.complete.len(), 0);
        assert_eq!(plan.incomplete, 1);
        // The checkpoint still advances past the dead records
        assert_eq!(plan.max_seq, 1);
    }

    #[test]
    fn test_scan_respects_checkpoint() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();
        let c1 = ObjectId::hash(b"c1");
        let c2 = ObjectId::hash(b"c2");
        wal.append_commit(Uuid::new_v4(), "main", &[put("a", b"{}"), marker(&c1)])
            .unwrap();
        wal.append_commit(Uuid::new_v4(), "main", &[put("b", b"{}"), marker(&c2)])
            .unwrap();

        let plan = scan(&wal, 2).unwrap();
        assert_eq!(plan.complete.len(), 1);
        assert_eq!(plan.complete[0].commit_id, c2);
    }

    #[test]
    fn test_aborted_transaction_not_replayed() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();
        let tx = Uuid::new_v4();
        let commit_id = ObjectId::hash(b"never applied");
        wal.append_commit(tx, "main", &[put("user:1", b"{}"), marker(&commit_id)])
            .unwrap();
        wal.append_commit(
            tx,
            "main",
            &[WalEntry {
                op: WalOp::Abort,
                doc_id: String::new(),
                payload: Vec::new(),
            }],
        )
        .unwrap();

        let plan = scan(&wal, 0).unwrap();
        assert!(plan.complete.is_empty());
        assert_eq!(plan.aborted, 1);
        assert_eq!(plan.max_seq, 3);
    }

    #[test]
    fn test_interleaved_transactions_grouped() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), false).unwrap();
        let tx_a = Uuid::new_v4();
        let tx_b = Uuid::new_v4();
        let ca = ObjectId::hash(b"ca");
        let cb = ObjectId::hash(b"cb");
        // Batches land separately but scan still groups by tx id
        wal.append_commit(tx_a, "main", &[put("a1", b"{}")]).unwrap();
        wal.append_commit(tx_b, "dev", &[put("b1", b"{}")]).unwrap();
        wal.append_commit(tx_a, "main", &[marker(&ca)]).unwrap();
        wal.append_commit(tx_b, "dev", &[marker(&cb)]).unwrap();

        let plan = scan(&wal, 0).unwrap();
        assert_eq!(plan.complete.len(), 2);
        assert_eq!(plan.incomplete, 0);
        assert_eq!(plan.complete[0].commit_id, ca);
        assert_eq!(plan.complete[0].changes.len(), 1);
        assert_eq!(plan.complete[1].branch, "dev");
    }
}
