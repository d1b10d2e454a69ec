//! Restore, point-in-time reads, and diff

use crate::open;
use serde_json::json;

#[test]
fn restore_round_trip_with_history() {
    let (_dir, db) = open();
    db.put("abc", json!({"value": 123})).unwrap();
    db.put("abc", json!({"value": 1234})).unwrap();

    let history = db.history("abc").unwrap();
    let first_commit = history[1].commit_id;

    db.restore("abc", first_commit).unwrap();

    assert_eq!(db.get("abc").unwrap().fields["value"], json!(123));

    let history = db.history("abc").unwrap();
    assert_eq!(history.len(), 3);
    let values: Vec<_> = history
        .iter()
        .map(|e| e.document.as_ref().unwrap().fields["value"].clone())
        .collect();
    assert_eq!(values, vec![json!(123), json!(1234), json!(123)]);
    assert!(history[0].message.contains("Restore"));
    db.close().unwrap();
}

#[test]
fn restore_matches_get_at_exactly() {
    let (_dir, db) = open();
    db.put("user:1", json!({"name": "John", "age": 30})).unwrap();
    db.put("user:1", json!({"name": "John", "age": 31})).unwrap();
    let first = db.history("user:1").unwrap()[1].commit_id;

    db.restore("user:1", first).unwrap();
    assert_eq!(
        db.get("user:1").unwrap(),
        db.get_at(&first.to_hex(), "user:1").unwrap()
    );
    db.close().unwrap();
}

#[test]
fn get_at_branch_name_reads_tip() {
    let (_dir, db) = open();
    db.put("user:1", json!({"v": 1})).unwrap();
    assert_eq!(db.get_at("main", "user:1").unwrap().fields["v"], json!(1));
    db.close().unwrap();
}

#[test]
fn diff_between_commits() {
    let (_dir, db) = open();
    db.put("user:1", json!({"name": "John", "age": 30, "city": "Lisbon"}))
        .unwrap();
    db.put("user:1", json!({"name": "John", "age": 31, "email": "j@x.com"}))
        .unwrap();

    let history = db.history("user:1").unwrap();
    let (newer, older) = (history[0].commit_id, history[1].commit_id);

    let diff = db.diff("user:1", older, newer).unwrap();
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.removed.len(), 1);
    assert_eq!(diff.changed.len(), 1);
    assert_eq!(diff.changed["age"], (json!(30), json!(31)));
    db.close().unwrap();
}

#[test]
fn history_pages_with_since_and_cursor() {
    let (_dir, db) = open();
    for i in 0..6 {
        db.put("counter", json!({"v": i})).unwrap();
    }

    let first = db.history_page("counter", None, None, 2).unwrap();
    assert_eq!(first.entries.len(), 2);
    let second = db
        .history_page("counter", first.next_cursor, None, 10)
        .unwrap();
    assert_eq!(second.entries.len(), 4);
    assert!(second.next_cursor.is_none());

    // since = newest timestamp keeps at least the newest entry and nothing
    // older than it
    let newest_ts = first.entries[0].timestamp_ms;
    let since_page = db
        .history_page("counter", None, Some(newest_ts), 10)
        .unwrap();
    assert!(since_page.entries.iter().all(|e| e.timestamp_ms >= newest_ts));
    db.close().unwrap();
}
