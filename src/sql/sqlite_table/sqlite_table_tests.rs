use std::sync::Arc;

use super::*;
use crate::changelog::Event;

fn sample_table() -> SqliteTable {
    let conn = Arc::new(SqliteConnection::open(":memory:").unwrap());
    let mut table = SqliteTable::new(conn, "items").unwrap();
    table.add_column("a", ColumnType::Int, false, 0).unwrap();
    table.add_column("b", ColumnType::Varchar, false, 0).unwrap();
    table
}

#[test]
fn test_insert_then_seek() {
    let table = sample_table();
    let key = Key::from_int(1);

    let mut cursor = table.insert(&key).unwrap();
    cursor.bind_int(10, true).unwrap();
    cursor.bind_text("x", true).unwrap();
    assert_eq!(cursor.execute().unwrap(), 1);

    let mut found = table.seek(&key).unwrap().expect("row should exist");
    assert_eq!(found.row_key(), key);
    assert_eq!(found.get_int(0, 0), 10);
    assert_eq!(found.get_text(1, ""), "x");

    assert_eq!(table.log().len(), 1);
    assert_eq!(table.log().event(0), Some((Event::Add, key)));
}

#[test]
fn test_insert_upsert_keeps_unset_columns() {
    let table = sample_table();
    let key = Key::from_int(2);

    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 1, true).unwrap();
    cursor.set_text(1, "keep", true).unwrap();
    cursor.execute().unwrap();

    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 9, true).unwrap();
    cursor.execute().unwrap();

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), 9);
    assert_eq!(found.get_text(1, ""), "keep");
}

#[test]
fn test_increment_is_additive() {
    let table = sample_table();
    let key = Key::from_int(1);

    for (n, s) in [(10, "x"), (5, "y")] {
        let mut cursor = table.increment(&key).unwrap();
        cursor.bind_int(n, true).unwrap();
        cursor.bind_text(s, true).unwrap();
        cursor.execute().unwrap();
    }

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), 15);
    assert_eq!(found.get_text(1, ""), "x", "non-numeric cell fills only once");
    assert_eq!(table.log().len(), 2);
}

#[test]
fn test_remove_then_seek_is_none() {
    let table = sample_table();
    let key = Key::from_int(1);
    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 1, true).unwrap();
    cursor.execute().unwrap();

    table.remove(&key).unwrap();
    assert!(table.seek(&key).unwrap().is_none());
    assert_eq!(table.log().len(), 2);
    assert_eq!(table.log().event(1), Some((Event::Remove, key)));

    table.remove(&Key::from_int(42)).unwrap();
    assert_eq!(table.log().len(), 2, "absent key records nothing");
}

#[test]
fn test_auto_key_insert() {
    let table = sample_table();

    let mut cursor = table.insert_auto().unwrap();
    cursor.bind_int(7, true).unwrap();
    cursor.execute().unwrap();
    let id = cursor.last_insert_id();
    assert!(id > 0);

    let mut found = table.seek(&Key::from_int(id)).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), 7);
    assert_eq!(table.log().event(0), Some((Event::Add, Key::from_int(id))));
}

#[test]
fn test_iteration_in_key_order() {
    let table = sample_table();
    for id in [3i64, 1, 2] {
        let mut cursor = table.insert(&Key::from_int(id)).unwrap();
        cursor.set_int(0, id as i32, true).unwrap();
        cursor.execute().unwrap();
    }

    let mut cursor = table.seek_begin().unwrap().unwrap();
    let mut seen = vec![cursor.row_key().get_int64(0)];
    while cursor.next().unwrap() {
        seen.push(cursor.row_key().get_int64(0));
    }
    assert_eq!(seen, vec![1, 2, 3]);
}

#[test]
fn test_assign_update_clears_unmentioned_columns() {
    let table = sample_table();
    let key = Key::from_int(1);
    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 5, true).unwrap();
    cursor.set_text(1, "old", true).unwrap();
    cursor.execute().unwrap();

    let mut assign = table.assign(vec![0, 1]).unwrap();
    assign.set_int(0, 42, true).unwrap();
    assert_eq!(assign.update(&key).unwrap(), 1);

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), 42);
    assert!(found.is_null(1));

    assert_eq!(assign.update(&Key::from_int(77)).unwrap(), 0);
}

#[test]
fn test_composite_text_key_round_trip() {
    let conn = Arc::new(SqliteConnection::open(":memory:").unwrap());
    let mut table = SqliteTable::new(conn, "tracks").unwrap();
    table.set_key_type(vec![ColumnType::Varchar]);
    table.add_column("v", ColumnType::Int, false, 0).unwrap();

    let mut key = Key::from_text("album");
    key.add_int(7);
    key.add_text("track");

    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 1, true).unwrap();
    cursor.execute().unwrap();

    let found = table.seek(&key).unwrap().expect("composite key resolves");
    assert_eq!(found.row_key(), key, "serialized key decodes to the same key");
}

#[test]
fn test_clear_and_missing_table() {
    let conn = Arc::new(SqliteConnection::open(":memory:").unwrap());
    let table = SqliteTable::new(Arc::clone(&conn), "nothing").unwrap();
    assert!(table.seek_begin().unwrap().is_none());
    assert!(table.seek(&Key::from_int(1)).unwrap().is_none());
    table.clear().unwrap();

    let table = sample_table();
    for id in 0..3 {
        let mut cursor = table.insert(&Key::from_int(id)).unwrap();
        cursor.set_int(0, 1, true).unwrap();
        cursor.execute().unwrap();
    }
    table.clear().unwrap();
    assert!(table.seek_begin().unwrap().is_none());
}

#[test]
fn test_schema_reload_from_existing_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reload.db");
    {
        let conn = Arc::new(SqliteConnection::open(&path).unwrap());
        let mut table = SqliteTable::new(conn, "items").unwrap();
        table.add_column("a", ColumnType::Int, false, 0).unwrap();
        table.add_column("b", ColumnType::Varchar, false, 0).unwrap();
        let mut cursor = table.insert(&Key::from_int(1)).unwrap();
        cursor.set_int(0, 3, true).unwrap();
        cursor.set_text(1, "persisted", true).unwrap();
        cursor.execute().unwrap();
    }

    let conn = Arc::new(SqliteConnection::open(&path).unwrap());
    let table = SqliteTable::new(conn, "items").unwrap();
    assert_eq!(table.num_fields(), 2);
    assert_eq!(table.column_name(0), "a");
    assert_eq!(table.column_type(0), ColumnType::Int64);
    assert!(table.has_numeric_key());

    let mut found = table.seek(&Key::from_int(1)).unwrap().unwrap();
    assert_eq!(found.get_text(1, ""), "persisted");
}

#[test]
fn test_cursor_outlives_table() {
    let table = sample_table();
    let key = Key::from_int(1);
    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 9, true).unwrap();
    cursor.execute().unwrap();

    let mut reader = table.seek(&key).unwrap().unwrap();
    drop(table);
    assert_eq!(reader.get_int(0, 0), 9);
}

#[test]
fn test_bad_column_index_on_set() {
    let table = sample_table();
    let mut cursor = table.insert(&Key::from_int(1)).unwrap();
    let err = cursor.set_int(9, 1, true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadColumnIndex);
}
