//! Search, select, schema, joins, pagination

use crate::open;
use chrondb::{
    AggFunc, AggregateSpec, Clause, ColumnDef, JoinKind, JoinSpec, Query, SelectRequest,
    SortSpec, TableName,
};
use serde_json::json;

#[test]
fn fts_search_finds_and_forgets() {
    let (_dir, db) = open();
    db.put("doc:1", json!({"content": "The quick brown fox"})).unwrap();

    let out = db
        .search(&Query::new().clause(Clause::fts("content", "quick")))
        .unwrap();
    assert_eq!(out.docs.len(), 1);
    assert_eq!(out.docs[0].id.as_str(), "doc:1");

    // Deletion is visible immediately: the writer requested a reader
    // refresh on commit
    db.delete("doc:1").unwrap();
    let out = db
        .search(&Query::new().clause(Clause::fts("content", "quick")))
        .unwrap();
    assert!(out.docs.is_empty());
    db.close().unwrap();
}

#[test]
fn search_results_satisfy_the_query_at_tip() {
    let (_dir, db) = open();
    for i in 0..20 {
        db.put(
            &format!("item:{:02}", i),
            json!({"content": format!("item number {}", i), "rank": i}),
        )
        .unwrap();
    }
    let out = db
        .search(
            &Query::new()
                .clause(Clause::fts("content", "item"))
                .clause(Clause::range_long("rank", Some(5), Some(9))),
        )
        .unwrap();
    assert_eq!(out.total, 5);
    for doc in &out.docs {
        let rank = doc.fields["rank"].as_i64().unwrap();
        assert!((5..=9).contains(&rank));
    }
    db.close().unwrap();
}

#[test]
fn structured_scan_with_sort_and_pages() {
    let (_dir, db) = open();
    for (id, age) in [("user:a", 30), ("user:b", 20), ("user:c", 40), ("user:d", 25)] {
        db.put(id, json!({"age": age})).unwrap();
    }
    let q = Query::new()
        .clause(Clause::range_long("age", Some(21), None))
        .sort_by(SortSpec::desc("age"))
        .limit(2);
    let first = db.search(&q).unwrap();
    assert_eq!(first.total, 3);
    let ids: Vec<&str> = first.docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["user:c", "user:a"]);

    let second = db
        .search(&q.clone().after(first.next_cursor.unwrap()))
        .unwrap();
    let ids: Vec<&str> = second.docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["user:d"]);
    db.close().unwrap();
}

#[test]
fn sql_shaped_flow_create_insert_select() {
    let (_dir, db) = open();
    db.create_table(
        "users",
        vec![
            ColumnDef::primary_key("id", "TEXT"),
            ColumnDef {
                nullable: false,
                ..ColumnDef::new("name", "TEXT")
            },
        ],
        false,
    )
    .unwrap();
    db.put("users:1", json!({"name": "Alice"})).unwrap();

    // SELECT * FROM users WHERE id = 'users:1'
    let out = db
        .select(&SelectRequest {
            query: Query::new().clause(Clause::term("id", "users:1")),
            table: Some(TableName::new("users").unwrap()),
            projection: vec!["id".to_string(), "name".to_string()],
            ..SelectRequest::default()
        })
        .unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0]["id"], json!("users:1"));
    assert_eq!(out.rows[0]["name"], json!("Alice"));

    // SHOW TABLES
    let tables = db.list_tables().unwrap();
    let users = tables.iter().find(|t| t.name.as_str() == "users").unwrap();
    assert!(users.has_schema);
    db.close().unwrap();
}

#[test]
fn group_by_with_aggregates() {
    let (_dir, db) = open();
    for (id, city, age) in [
        ("p:1", "Lisbon", 30),
        ("p:2", "Lisbon", 40),
        ("p:3", "Berlin", 20),
    ] {
        db.put(id, json!({"city": city, "age": age})).unwrap();
    }
    let out = db
        .select(&SelectRequest {
            table: Some(TableName::new("p").unwrap()),
            group_by: vec!["city".to_string()],
            aggregates: vec![
                AggregateSpec::count(),
                AggregateSpec::over(AggFunc::Max, "age"),
            ],
            ..SelectRequest::default()
        })
        .unwrap();
    assert_eq!(out.rows.len(), 2);
    let lisbon = out
        .rows
        .iter()
        .find(|r| r["city"] == json!("Lisbon"))
        .unwrap();
    assert_eq!(lisbon["count"], json!(2));
    assert_eq!(lisbon["max(age)"], json!(40));
    db.close().unwrap();
}

#[test]
fn inner_join_on_one_equality() {
    let (_dir, db) = open();
    db.put("user:1", json!({"name": "Alice"})).unwrap();
    db.put("user:2", json!({"name": "Bob"})).unwrap();
    db.put("order:1", json!({"user_id": "user:1", "total": 10})).unwrap();
    db.put("order:2", json!({"user_id": "user:1", "total": 20})).unwrap();

    let out = db
        .select(&SelectRequest {
            table: Some(TableName::new("user").unwrap()),
            join: Some(JoinSpec {
                table: "order".to_string(),
                left_field: "id".to_string(),
                right_field: "user_id".to_string(),
                kind: JoinKind::Inner,
            }),
            ..SelectRequest::default()
        })
        .unwrap();
    assert_eq!(out.rows.len(), 2);
    for row in &out.rows {
        assert_eq!(row["user.name"], json!("Alice"));
        assert!(row.contains_key("order.total"));
    }
    db.close().unwrap();
}

#[test]
fn point_lookup_short_circuits_without_index() {
    let (_dir, db) = open();
    db.put("user:1", json!({"name": "John"})).unwrap();
    let out = db
        .search(&Query::new().clause(Clause::term("id", "user:1")))
        .unwrap();
    assert_eq!(out.docs.len(), 1);

    let out = db
        .search(&Query::new().clause(Clause::term("id", "missing:1")))
        .unwrap();
    assert!(out.docs.is_empty());
    db.close().unwrap();
}

#[test]
fn cursor_tokens_round_trip_as_base64() {
    let (_dir, db) = open();
    for i in 0..5 {
        db.put(&format!("c:{}", i), json!({"i": i})).unwrap();
    }
    let out = db.search(&Query::new().limit(2)).unwrap();
    let cursor = out.next_cursor.unwrap();
    let token = cursor.encode().unwrap();
    let decoded = chrondb::Cursor::decode(&token).unwrap();
    assert_eq!(decoded, cursor);
    db.close().unwrap();
}
