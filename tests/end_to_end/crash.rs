//! Crash recovery scenarios
//!
//! These tests simulate the failure windows of the commit pipeline by
//! manipulating the on-disk state between close and reopen: WAL intent with
//! no objects (crash before object write), objects with no ref advance
//! (crash before CAS), stale lock files, and torn WAL tails.

use chrondb::{Chrondb, Document, DocId, ObjectId};
use chrondb_durability::{CommitMarker, Wal, WalEntry, WalOp};
use chrondb_storage::RefStore;
use serde_json::json;
use std::fs::FileTimes;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use uuid::Uuid;

fn dirs(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    (dir.path().join("data"), dir.path().join("index"))
}

#[test]
fn wal_intent_without_objects_is_replayed() {
    let dir = TempDir::new().unwrap();
    let (data, index) = dirs(&dir);
    {
        let db = Chrondb::open(&data, &index).unwrap();
        db.put("user:1", json!({"v": 1})).unwrap();
        db.close().unwrap();
    }

    // Crash window: the WAL batch (changes + commit marker) hit disk, the
    // process died before writing any object.
    let doc = Document::from_value(DocId::new("user:3").unwrap(), json!({"v": 3})).unwrap();
    let ghost_commit = ObjectId::hash(b"commit that was never written");
    {
        let wal = Wal::open(&data, true).unwrap();
        wal.append_commit(
            Uuid::new_v4(),
            "main",
            &[
                WalEntry {
                    op: WalOp::Put,
                    doc_id: "user:3".to_string(),
                    payload: doc.encode().unwrap(),
                },
                WalEntry {
                    op: WalOp::Commit,
                    doc_id: ghost_commit.to_hex(),
                    payload: serde_json::to_vec(&CommitMarker {
                        message: "put user:3".to_string(),
                        author: "api".to_string(),
                        timestamp_ms: 1,
                    })
                    .unwrap(),
                },
            ],
        )
        .unwrap();
    }

    let db = Chrondb::open(&data, &index).unwrap();
    assert_eq!(db.get("user:3").unwrap().fields["v"], json!(3));
    // The earlier write survived too
    assert_eq!(db.get("user:1").unwrap().fields["v"], json!(1));
    db.close().unwrap();
}

#[test]
fn unreferenced_commit_is_not_resurrected() {
    let dir = TempDir::new().unwrap();
    let (data, index) = dirs(&dir);
    let second_tip;
    {
        let db = Chrondb::open(&data, &index).unwrap();
        db.put("user:1", json!({"v": 1})).unwrap();
        db.put("user:2", json!({"v": 2})).unwrap();
        second_tip = db.history("user:2").unwrap()[0].commit_id;
        db.put("user:3", json!({"v": 3})).unwrap();
        db.close().unwrap();
    }

    // Crash window: user:3's objects were written but the ref CAS never
    // landed. Simulated by rewinding the ref and forgetting the checkpoint.
    {
        let refs = RefStore::open(&data).unwrap();
        refs.force_set("heads/main", second_tip).unwrap();
        std::fs::remove_file(data.join("wal").join("CHECKPOINT")).unwrap();
    }

    let db = Chrondb::open(&data, &index).unwrap();
    // Replay is idempotent: the first two commits exist, so nothing is
    // re-applied; the third commit exists but unreferenced, so it stays
    // invisible.
    assert!(db.get("user:1").is_ok());
    assert!(db.get("user:2").is_ok());
    assert!(db.get("user:3").unwrap_err().is_not_found());

    // New writes proceed normally afterwards
    db.put("user:4", json!({"v": 4})).unwrap();
    assert!(db.get("user:4").is_ok());
    db.close().unwrap();
}

#[test]
fn stale_ref_lock_is_swept_at_open() {
    let dir = TempDir::new().unwrap();
    let (data, index) = dirs(&dir);
    {
        let db = Chrondb::open(&data, &index).unwrap();
        db.put("user:1", json!({"v": 1})).unwrap();
        db.close().unwrap();
    }

    // A writer died holding the ref lock more than a minute ago
    let lock_path = data.join("refs").join("heads").join("main.lock");
    std::fs::write(&lock_path, "").unwrap();
    let old = SystemTime::now() - Duration::from_secs(600);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&lock_path)
        .unwrap();
    file.set_times(FileTimes::new().set_accessed(old).set_modified(old))
        .unwrap();
    drop(file);

    let db = Chrondb::open(&data, &index).unwrap();
    assert!(!lock_path.exists());
    db.put("user:2", json!({"v": 2})).unwrap();
    db.close().unwrap();
}

#[test]
fn torn_wal_tail_does_not_block_open() {
    let dir = TempDir::new().unwrap();
    let (data, index) = dirs(&dir);
    {
        let db = Chrondb::open(&data, &index).unwrap();
        db.put("user:1", json!({"v": 1})).unwrap();
        db.close().unwrap();
    }

    // Crash mid-append: half a frame at the segment tail
    let segment = data.join("wal").join("000001.log");
    let mut bytes = std::fs::read(&segment).unwrap();
    bytes.extend_from_slice(&[200, 0, 0, 0, 1, 2, 3]);
    std::fs::write(&segment, bytes).unwrap();

    let db = Chrondb::open(&data, &index).unwrap();
    assert!(db.get("user:1").is_ok());
    db.put("user:2", json!({"v": 2})).unwrap();
    db.close().unwrap();
}

#[test]
fn repeated_recovery_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (data, index) = dirs(&dir);
    {
        let db = Chrondb::open(&data, &index).unwrap();
        db.put("user:1", json!({"v": 1})).unwrap();
        db.put("user:1", json!({"v": 2})).unwrap();
        db.close().unwrap();
    }

    // Forget the checkpoint repeatedly; each reopen rescans the full WAL
    for _ in 0..3 {
        let checkpoint = data.join("wal").join("CHECKPOINT");
        if checkpoint.exists() {
            std::fs::remove_file(&checkpoint).unwrap();
        }
        let db = Chrondb::open(&data, &index).unwrap();
        assert_eq!(db.get("user:1").unwrap().fields["v"], json!(2));
        // History never grows from replay alone
        assert_eq!(db.history("user:1").unwrap().len(), 2);
        db.close().unwrap();
    }
}
