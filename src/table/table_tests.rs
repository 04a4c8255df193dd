use std::cell::Cell;
use std::sync::Arc;

use super::*;
use crate::changelog::Event;
use crate::memory::MemoryTable;
use crate::sql::sqlite::SqliteConnection;
use crate::sql::sqlite_table::SqliteTable;
use crate::stream::DataStream;

fn filled_source(rows: usize) -> MemoryTable {
    let mut source = MemoryTable::new();
    source.add_column("n", ColumnType::Int, false, 0).unwrap();
    for i in 0..rows {
        let mut cursor = source.insert(&Key::from_int(i as i64)).unwrap();
        cursor.bind_int(i as i32, true).unwrap();
        cursor.execute().unwrap();
    }
    source
}

#[test]
fn test_append_adopts_schema_into_empty_destination() {
    let mut source = MemoryTable::with_key_type(vec![ColumnType::Varchar]);
    source.add_column("count", ColumnType::Int, false, 0).unwrap();
    source.add_column("label", ColumnType::Varchar, true, 2).unwrap();
    for (key, count, label) in [("a", 1, "first"), ("b", 2, "second")] {
        let mut cursor = source.insert(&Key::from_text(key)).unwrap();
        cursor.bind_int(count, true).unwrap();
        cursor.bind_text(label, true).unwrap();
        cursor.execute().unwrap();
    }

    let mut destination = MemoryTable::with_key_type(Vec::new());
    destination.append(&source).unwrap();

    assert_eq!(destination.key_type(), source.key_type());
    assert_eq!(destination.num_fields(), 2);
    assert_eq!(destination.column_name(0), "count");
    assert_eq!(destination.column_name(1), "label");
    assert!(destination.is_column_unique(1));
    assert_eq!(destination.column_decimals(1), 2);

    for key in ["a", "b"] {
        let key = Key::from_text(key);
        let mut src = source.seek(&key).unwrap().unwrap();
        let mut dst = destination.seek(&key).unwrap().unwrap();
        assert_eq!(dst.get_int(0, -1), src.get_int(0, -2));
        assert_eq!(dst.get_text(1, ""), src.get_text(1, "!"));
    }
}

#[test]
fn test_append_log_is_spliced_from_source() {
    let source = filled_source(5);
    assert_eq!(source.log().len(), 5);

    let mut destination = MemoryTable::with_key_type(Vec::new());
    destination.append(&source).unwrap();

    assert_eq!(destination.num_rows(), 5);
    assert_eq!(
        destination.log().len(),
        5,
        "row copies are silent; only the source log is spliced"
    );
    for i in 0..5 {
        assert_eq!(
            destination.log().event(i),
            Some((Event::Add, Key::from_int(i as i64)))
        );
    }
}

#[test]
fn test_append_typed_dispatch() {
    let mut source = MemoryTable::new();
    source.add_column("i", ColumnType::Int, false, 0).unwrap();
    source.add_column("big", ColumnType::Int64, false, 0).unwrap();
    source.add_column("d", ColumnType::Double, false, 0).unwrap();
    source.add_column("f", ColumnType::Float, false, 0).unwrap();
    source.add_column("t", ColumnType::Text, false, 0).unwrap();
    source.add_column("bin", ColumnType::Blob, false, 0).unwrap();

    let key = Key::from_int(1);
    let mut cursor = source.insert(&key).unwrap();
    cursor.set_int(0, -5, true).unwrap();
    cursor.set_int64(1, 1 << 40, true).unwrap();
    cursor.set_double(2, 2.5, true).unwrap();
    cursor.set_float(3, 0.5, true).unwrap();
    cursor.set_text(4, "copy me", true).unwrap();
    cursor.set_blob(5, b"payload", true).unwrap();
    cursor.execute().unwrap();

    let mut destination = MemoryTable::with_key_type(Vec::new());
    destination.append(&source).unwrap();

    let mut row = destination.seek(&key).unwrap().unwrap();
    assert_eq!(row.get_int(0, 0), -5);
    assert_eq!(row.get_int64(1, 0), 1 << 40);
    assert_eq!(row.get_double(2, 0.0), 2.5);
    assert_eq!(row.get_float(3, 0.0), 0.5);
    assert_eq!(row.get_text(4, ""), "copy me");
    assert!(row.is_null(5), "blob payloads are written as NULL");
}

#[test]
fn test_append_preserves_null_cells() {
    let mut source = MemoryTable::new();
    source.add_column("a", ColumnType::Int, false, 0).unwrap();
    source.add_column("b", ColumnType::Varchar, false, 0).unwrap();
    let mut cursor = source.insert(&Key::from_int(1)).unwrap();
    cursor.set_text(1, "only b", true).unwrap();
    cursor.execute().unwrap();

    let mut destination = MemoryTable::with_key_type(Vec::new());
    destination.append(&source).unwrap();

    let mut row = destination.seek(&Key::from_int(1)).unwrap().unwrap();
    assert!(row.is_null(0));
    assert_eq!(row.get_text(1, ""), "only b");
}

#[test]
fn test_append_empty_source() {
    let mut source = MemoryTable::new();
    source.add_column("n", ColumnType::Int, false, 0).unwrap();

    let mut destination = MemoryTable::with_key_type(Vec::new());
    destination.append(&source).unwrap();
    assert_eq!(destination.num_fields(), 1);
    assert_eq!(destination.num_rows(), 0);
    assert_eq!(destination.log().len(), 0);
}

/// Forwards everything to an inner table while counting transaction
/// calls, so batching behavior is observable.
struct CountingTable {
    inner: SqliteTable,
    begins: Cell<usize>,
    commits: Cell<usize>,
}

impl CountingTable {
    fn new(inner: SqliteTable) -> Self {
        Self {
            inner,
            begins: Cell::new(0),
            commits: Cell::new(0),
        }
    }
}

impl Table for CountingTable {
    fn meta(&self) -> &TableMeta {
        self.inner.meta()
    }

    fn meta_mut(&mut self) -> &mut TableMeta {
        self.inner.meta_mut()
    }

    fn num_fields(&self) -> usize {
        self.inner.num_fields()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        self.inner.column_type(column_index)
    }

    fn column_name(&self, column_index: usize) -> String {
        self.inner.column_name(column_index)
    }

    fn add_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        unique: bool,
        decimals: u32,
    ) -> Result<()> {
        self.inner.add_column(name, column_type, unique, decimals)
    }

    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>> {
        self.inner.seek_begin()
    }

    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>> {
        self.inner.seek(key)
    }

    fn insert(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        self.inner.insert(key)
    }

    fn insert_auto(&self) -> Result<Box<dyn Cursor>> {
        self.inner.insert_auto()
    }

    fn increment(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        self.inner.increment(key)
    }

    fn assign(&self, columns: Vec<usize>) -> Result<Box<dyn Cursor>> {
        self.inner.assign(columns)
    }

    fn remove(&self, key: &Key) -> Result<()> {
        self.inner.remove(key)
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn open_row(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        self.inner.open_row(key)
    }

    fn begin(&self) -> Result<()> {
        self.begins.set(self.begins.get() + 1);
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.commits.set(self.commits.get() + 1);
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }
}

#[test]
fn test_append_batches_into_transactions() {
    let rows = 9000;
    let source = filled_source(rows);

    let conn = Arc::new(SqliteConnection::open(":memory:").unwrap());
    let inner = SqliteTable::new(conn, "copied").unwrap();
    let mut destination = CountingTable::new(inner);
    destination.append(&source).unwrap();

    let mut count = 0usize;
    let mut cursor = destination.seek_begin().unwrap().unwrap();
    count += 1;
    while cursor.next().unwrap() {
        count += 1;
    }
    assert_eq!(count, rows);
    assert_eq!(destination.log().len(), rows);

    // 9000 rows batch into ceil(9000 / 4096) = 3 commits
    assert_eq!(destination.commits.get(), 3);
    assert_eq!(destination.begins.get(), 3);

    let mut row = destination.seek(&Key::from_int(4500)).unwrap().unwrap();
    assert_eq!(row.get_int(0, -1), 4500);
}

#[test]
fn test_column_lookup_helpers() {
    let mut table = MemoryTable::new();
    table.add_column("a", ColumnType::Int, false, 0).unwrap();
    table.add_column("b", ColumnType::Int, false, 0).unwrap();
    table.add_column("a", ColumnType::Int, false, 0).unwrap();

    assert_eq!(table.column_index("a"), Some(2), "last match wins");
    assert_eq!(table.column_index("b"), Some(1));
    assert_eq!(table.column_index("z"), None);

    let names: std::collections::HashSet<String> =
        ["a", "z"].iter().map(|s| s.to_string()).collect();
    assert_eq!(table.columns_by_name(&names), vec![2, 0]);
}

#[test]
fn test_sort_and_filter_hints() {
    let mut table = MemoryTable::new();
    table.add_column("a", ColumnType::Int, false, 0).unwrap();

    assert!(table.sort_order().is_none());
    table.set_sort_col(0, 1, true);
    assert_eq!(
        table.sort_order(),
        Some(SortOrder {
            column: 0,
            sub_column: 1,
            descending: true
        })
    );

    assert!(!table.has_filter(0));
    let keys: std::collections::HashSet<Key> =
        [Key::from_int(1), Key::from_int(2)].into_iter().collect();
    table.set_filter(0, keys);
    assert!(table.has_filter(0));
    assert_eq!(table.filter(0).unwrap().len(), 2);
    assert!(table.filter(0).unwrap().contains(&Key::from_int(1)));
    assert!(!table.has_filter(3));
}

#[test]
fn test_key_type_predicates() {
    let table = MemoryTable::new();
    assert!(table.has_numeric_key());

    let table = MemoryTable::with_key_type(vec![ColumnType::Varchar]);
    assert!(!table.has_numeric_key());

    let table = MemoryTable::with_key_type(vec![ColumnType::Int, ColumnType::Int64]);
    assert!(!table.has_numeric_key(), "composite keys are not numeric");
}
