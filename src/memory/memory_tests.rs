use std::sync::Arc;
use std::thread;

use super::*;
use crate::changelog::Event;

fn sample_table() -> MemoryTable {
    let mut table = MemoryTable::new();
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
}

#[test]
fn test_remove_then_seek_is_none() {
    let table = sample_table();
    let key = Key::from_int(5);
    let mut cursor = table.insert(&key).unwrap();
    cursor.bind_int(1, true).unwrap();
    cursor.execute().unwrap();

    table.remove(&key).unwrap();
    assert!(table.seek(&key).unwrap().is_none());
    assert_eq!(table.log().len(), 2);
    assert_eq!(table.log().event(1), Some((Event::Remove, key)));

    // removing an absent key records nothing
    table.remove(&Key::from_int(99)).unwrap();
    assert_eq!(table.log().len(), 2);
}

#[test]
fn test_increment_is_additive() {
    let table = sample_table();
    let key = Key::from_int(1);

    let mut cursor = table.increment(&key).unwrap();
    cursor.bind_int(10, true).unwrap();
    cursor.bind_text("x", true).unwrap();
    cursor.execute().unwrap();

    let mut cursor = table.increment(&key).unwrap();
    cursor.bind_int(5, true).unwrap();
    cursor.bind_text("y", true).unwrap();
    cursor.execute().unwrap();

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_text(0, ""), "15");
    assert_eq!(found.get_text(1, ""), "x", "occupied text cell is left alone");

    assert_eq!(table.log().len(), 2);
    assert_eq!(table.log().event(0), Some((Event::Add, key.clone())));
    assert_eq!(table.log().event(1), Some((Event::Add, key)));
}

#[test]
fn test_insert_overwrites_only_set_cells() {
    let table = sample_table();
    let key = Key::from_int(3);

    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 7, true).unwrap();
    cursor.set_text(1, "keep", true).unwrap();
    cursor.execute().unwrap();

    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 8, true).unwrap();
    cursor.execute().unwrap();

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), 8);
    assert_eq!(found.get_text(1, ""), "keep");
}

#[test]
fn test_set_undefined_writes_nothing() {
    let table = sample_table();
    let key = Key::from_int(4);
    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 11, true).unwrap();
    cursor.set_int(0, 0, false).unwrap();
    cursor.set_text(1, "v", true).unwrap();
    cursor.execute().unwrap();

    let mut found = table.seek(&key).unwrap().unwrap();
    assert!(found.is_null(0));
    assert_eq!(found.get_int(0, -1), -1);
    assert_eq!(found.get_text(1, ""), "v");
}

#[test]
fn test_auto_increment_ids() {
    let table = sample_table();

    let mut c1 = table.insert_auto().unwrap();
    c1.bind_int(1, true).unwrap();
    c1.execute().unwrap();
    assert_eq!(c1.last_insert_id(), 1);

    let mut c2 = table.insert_auto().unwrap();
    c2.bind_int(2, true).unwrap();
    c2.execute().unwrap();
    assert_eq!(c2.last_insert_id(), 2);

    assert_eq!(table.num_rows(), 2);
    assert!(table.seek(&Key::from_int(2)).unwrap().is_some());
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
fn test_seek_begin_empty_table() {
    let table = sample_table();
    assert!(table.seek_begin().unwrap().is_none());
}

#[test]
fn test_assign_update_clears_unmentioned_columns() {
    let table = sample_table();
    let key = Key::from_int(1);
    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 5, true).unwrap();
    cursor.set_text(1, "old", true).unwrap();
    cursor.execute().unwrap();

    // project both columns but stage only the first
    let mut assign = table.assign(vec![0, 1]).unwrap();
    assign.set_int(0, 42, true).unwrap();
    assert_eq!(assign.update(&key).unwrap(), 1);

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), 42);
    assert!(found.is_null(1), "unstaged projected column is cleared");

    assert_eq!(assign.update(&Key::from_int(77)).unwrap(), 0);
}

#[test]
fn test_clear_removes_all_rows() {
    let table = sample_table();
    for id in 0..4 {
        let mut cursor = table.insert(&Key::from_int(id)).unwrap();
        cursor.set_int(0, 1, true).unwrap();
        cursor.execute().unwrap();
    }
    table.clear().unwrap();
    assert_eq!(table.num_rows(), 0);
    assert!(table.seek_begin().unwrap().is_none());
}

#[test]
fn test_get_key_coercion() {
    let mut table = MemoryTable::new();
    table.add_column("n", ColumnType::Int, false, 0).unwrap();
    table.add_column("t", ColumnType::Varchar, false, 0).unwrap();
    let key = Key::from_int(1);
    let mut cursor = table.insert(&key).unwrap();
    cursor.set_int(0, 42, true).unwrap();
    cursor.set_text(1, "name", true).unwrap();
    cursor.execute().unwrap();

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_key(0), Key::from_int(42));
    assert_eq!(found.get_key(1), Key::from_text("name"));
}

#[test]
fn test_concurrent_distinct_inserts() {
    let table = Arc::new(sample_table());
    let threads = 8;
    let per_thread = 50;

    let mut handles = Vec::new();
    for t in 0..threads {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let key = Key::from_int((t * per_thread + i) as i64);
                let mut cursor = table.insert(&key).unwrap();
                cursor.bind_int(1, true).unwrap();
                cursor.execute().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.num_rows(), threads * per_thread);
    assert_eq!(table.log().len(), threads * per_thread);
    for i in 0..(threads * per_thread) {
        assert_eq!(
            table.log().event(i).map(|(event, _)| event),
            Some(Event::Add)
        );
    }
}

#[test]
fn test_concurrent_increments_serialize() {
    let table = Arc::new(sample_table());
    let key = Key::from_int(1);
    let threads = 8;
    let per_thread = 25;

    let mut handles = Vec::new();
    for _ in 0..threads {
        let table = Arc::clone(&table);
        let key = key.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..per_thread {
                let mut cursor = table.increment(&key).unwrap();
                cursor.bind_int(1, true).unwrap();
                cursor.execute().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut found = table.seek(&key).unwrap().unwrap();
    assert_eq!(found.get_int(0, 0), (threads * per_thread) as i32);
    assert_eq!(table.log().len(), threads * per_thread);
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
fn test_empty_key_is_rejected() {
    let table = sample_table();
    let err = table.insert(&Key::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mismatch);
}
