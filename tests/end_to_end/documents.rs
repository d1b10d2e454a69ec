//! Document lifecycle and branch isolation

use crate::open;
use chrondb::{Chrondb, MergeOutcome, Origin};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn fresh_repo_put_get_history() {
    let (_dir, db) = open();
    db.put_as(Origin::Rest, "api", "user:1", json!({"name": "John", "age": 30}))
        .unwrap();

    let doc = db.get("user:1").unwrap();
    let value = doc.to_value();
    assert_eq!(value["id"], json!("user:1"));
    assert_eq!(value["_table"], json!("user"));
    assert_eq!(value["name"], json!("John"));
    assert_eq!(value["age"], json!(30));

    assert_eq!(db.history("user:1").unwrap().len(), 1);
    db.close().unwrap();
}

#[test]
fn update_grows_history_and_preserves_old_version() {
    let (_dir, db) = open();
    db.put("user:1", json!({"name": "John", "age": 30})).unwrap();
    db.put("user:1", json!({"name": "John", "age": 31})).unwrap();

    assert_eq!(db.get("user:1").unwrap().fields["age"], json!(31));

    let history = db.history("user:1").unwrap();
    assert_eq!(history.len(), 2);
    let first_commit = history[1].commit_id;
    let old = db.get_at(&first_commit.to_hex(), "user:1").unwrap();
    assert_eq!(old.fields["age"], json!(30));
    db.close().unwrap();
}

#[test]
fn read_your_write_within_instance() {
    let (_dir, db) = open();
    for i in 0..10 {
        let id = format!("rw:{}", i);
        db.put(&id, json!({"i": i})).unwrap();
        assert_eq!(db.get(&id).unwrap().fields["i"], json!(i));
    }
    db.close().unwrap();
}

#[test]
fn delete_is_a_tombstone_not_history_erasure() {
    let (_dir, db) = open();
    db.put("user:1", json!({"name": "John"})).unwrap();
    db.delete("user:1").unwrap();

    assert!(db.get("user:1").unwrap_err().is_not_found());
    let history = db.history("user:1").unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].document.is_none());
    assert!(history[1].document.is_some());
    db.close().unwrap();
}

#[test]
fn branch_writes_are_isolated_until_merge() {
    let (_dir, db) = open();
    db.create_branch("dev").unwrap();
    db.put_on(Some("dev"), Origin::Internal, "t", "user:2", json!({"name": "Eve"}))
        .unwrap();

    assert!(db.get_on(Some("main"), "user:2").unwrap_err().is_not_found());
    assert_eq!(
        db.get_on(Some("dev"), "user:2").unwrap().fields["name"],
        json!("Eve")
    );

    match db.merge("dev", "main").unwrap() {
        MergeOutcome::FastForward { .. } => {}
        other => panic!("expected fast-forward, got {:?}", other),
    }
    assert!(db.get_on(Some("main"), "user:2").is_ok());
    db.close().unwrap();
}

#[test]
fn diverged_merge_moves_nothing() {
    let (_dir, db) = open();
    db.create_branch("dev").unwrap();
    db.put("on-main", json!({"v": 1})).unwrap();
    db.put_on(Some("dev"), Origin::Internal, "t", "on-dev", json!({"v": 2}))
        .unwrap();

    let before: Vec<_> = db.branches().unwrap();
    assert!(db.merge("dev", "main").is_err());
    assert_eq!(db.branches().unwrap(), before);
    db.close().unwrap();
}

#[test]
fn notes_record_every_commit_metadata() {
    let (_dir, db) = open();
    db.put_as(Origin::Sql, "dba", "user:1", json!({"a": 1})).unwrap();
    let commit = db.history("user:1").unwrap()[0].commit_id;

    let note = db.database().get_note(&commit).unwrap().unwrap();
    assert_eq!(note.origin, Origin::Sql);
    assert_eq!(note.user, "dba");
    db.close().unwrap();
}

#[test]
fn reopen_preserves_everything() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let index = dir.path().join("index");
    {
        let db = Chrondb::open(&data, &index).unwrap();
        db.put("user:1", json!({"name": "John"})).unwrap();
        db.create_branch("dev").unwrap();
        db.close().unwrap();
    }
    let db = Chrondb::open(&data, &index).unwrap();
    assert_eq!(db.get("user:1").unwrap().fields["name"], json!("John"));
    assert_eq!(db.branches().unwrap().len(), 2);
    db.close().unwrap();
}
