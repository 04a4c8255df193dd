use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::changelog::ChangeLog;
use crate::cursor::Cursor;
use crate::error::Result;
use crate::key::Key;
use crate::types::ColumnType;

/// Rows are batched into one transaction per this many appended rows.
const APPEND_BATCH_SIZE: usize = 4096;

/// One column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub unique: bool,
    pub decimals: u32,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            unique: false,
            decimals: 0,
        }
    }

    pub fn with_options(
        name: impl Into<String>,
        column_type: ColumnType,
        unique: bool,
        decimals: u32,
    ) -> Self {
        Self {
            name: name.into(),
            column_type,
            unique,
            decimals,
        }
    }
}

/// Advisory iteration order hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: usize,
    pub sub_column: usize,
    pub descending: bool,
}

/// Metadata every table carries: the primary-key shape, advisory sort
/// and filter hints, and the shared change log.
#[derive(Debug)]
pub struct TableMeta {
    pub(crate) key_type: Vec<ColumnType>,
    pub(crate) sort: Option<SortOrder>,
    pub(crate) filters: HashMap<usize, HashSet<Key>>,
    pub(crate) log: Arc<ChangeLog>,
    pub(crate) human_readable_key: bool,
}

impl TableMeta {
    pub fn new(key_type: Vec<ColumnType>) -> Self {
        Self {
            key_type,
            sort: None,
            filters: HashMap::new(),
            log: Arc::new(ChangeLog::new()),
            human_readable_key: false,
        }
    }

    pub fn with_human_readable_key(mut self) -> Self {
        self.human_readable_key = true;
        self
    }
}

impl Default for TableMeta {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// A table of rows identified by [`Key`]s, served by some backend.
///
/// Cursors obtained from a table hold the backing store through shared
/// ownership and stay usable after the table value is dropped.
/// Read-only backends return a `ReadOnly` error from every mutating
/// operation.
pub trait Table {
    fn meta(&self) -> &TableMeta;

    fn meta_mut(&mut self) -> &mut TableMeta;

    fn num_fields(&self) -> usize;

    fn column_type(&self, column_index: usize) -> ColumnType;

    fn column_name(&self, column_index: usize) -> String;

    fn is_column_unique(&self, _column_index: usize) -> bool {
        false
    }

    fn column_decimals(&self, _column_index: usize) -> u32 {
        0
    }

    fn add_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        unique: bool,
        decimals: u32,
    ) -> Result<()>;

    /// A cursor positioned at the first row, or `None` when the table
    /// is empty.
    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>>;

    /// A cursor positioned at `key`, or `None` when absent.
    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>>;

    /// Creates-or-opens a pending row at `key`; the first `execute`
    /// commits it and records an ADD event.
    fn insert(&self, key: &Key) -> Result<Box<dyn Cursor>>;

    /// Like [`insert`], with an auto-generated key. The assigned id is
    /// readable from the cursor after `execute`.
    ///
    /// [`insert`]: Table::insert
    fn insert_auto(&self) -> Result<Box<dyn Cursor>>;

    /// A cursor whose `execute` merges the staged values additively
    /// into the row at `key`: numeric columns are summed, empty cells
    /// filled, occupied non-numeric cells left alone.
    fn increment(&self, key: &Key) -> Result<Box<dyn Cursor>>;

    /// A cursor whose staged fields map positionally onto the given
    /// column projection; `update(key)` applies them and clears the
    /// projected columns that were not staged.
    fn assign(&self, columns: Vec<usize>) -> Result<Box<dyn Cursor>>;

    /// Deletes the row and records a REMOVE event.
    fn remove(&self, key: &Key) -> Result<()>;

    /// Removes all rows.
    fn clear(&self) -> Result<()>;

    /// Creates-or-opens a pending row without recording a log event.
    /// Row copying in [`append`] goes through this so the destination
    /// log grows only by the spliced source log.
    ///
    /// [`append`]: Table::append
    fn open_row(&self, key: &Key) -> Result<Box<dyn Cursor>>;

    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        Ok(())
    }

    fn key_type(&self) -> &[ColumnType] {
        &self.meta().key_type
    }

    fn set_key_type(&mut self, key_type: Vec<ColumnType>) {
        self.meta_mut().key_type = key_type;
    }

    fn has_numeric_key(&self) -> bool {
        let key_type = self.key_type();
        key_type.len() == 1 && key_type[0].is_numeric()
    }

    fn has_human_readable_key(&self) -> bool {
        self.meta().human_readable_key
    }

    fn log(&self) -> &Arc<ChangeLog> {
        &self.meta().log
    }

    fn sort_order(&self) -> Option<SortOrder> {
        self.meta().sort
    }

    fn set_sort_col(&mut self, column: usize, sub_column: usize, descending: bool) {
        self.meta_mut().sort = Some(SortOrder {
            column,
            sub_column,
            descending,
        });
    }

    fn has_filter(&self, column_index: usize) -> bool {
        self.meta().filters.contains_key(&column_index)
    }

    fn filter(&self, column_index: usize) -> Option<&HashSet<Key>> {
        self.meta().filters.get(&column_index)
    }

    fn set_filter(&mut self, column_index: usize, keys: HashSet<Key>) {
        self.meta_mut().filters.insert(column_index, keys);
    }

    /// Index of the last column with the given name.
    fn column_index(&self, name: &str) -> Option<usize> {
        for i in (0..self.num_fields()).rev() {
            if self.column_name(i) == name {
                return Some(i);
            }
        }
        None
    }

    /// Indices of the columns whose names appear in `names`, scanned
    /// from the last column backwards.
    fn columns_by_name(&self, names: &HashSet<String>) -> Vec<usize> {
        let mut found = Vec::new();
        for i in (0..self.num_fields()).rev() {
            if names.contains(&self.column_name(i)) {
                found.push(i);
            }
        }
        found
    }

    /// Copies every row of `other` into this table, batching writes
    /// into transactions, then splices `other`'s change log onto this
    /// table's log. An empty destination adopts the source key type
    /// and columns.
    ///
    /// Values are copied per column through the typed accessor matching
    /// the source column type; BLOB and VECTOR payloads are written as
    /// NULL.
    fn append(&mut self, other: &dyn Table) -> Result<()> {
        if self.num_fields() == 0 {
            self.set_key_type(other.key_type().to_vec());
            for i in 0..other.num_fields() {
                self.add_column(
                    &other.column_name(i),
                    other.column_type(i),
                    other.is_column_unique(i),
                    other.column_decimals(i),
                )?;
            }
        }

        if let Some(mut source) = other.seek_begin()? {
            let num_fields = source.num_fields();
            self.begin()?;
            let mut appended = 0usize;
            loop {
                let key = source.row_key();
                let mut row = self.open_row(&key)?;
                for i in 0..num_fields {
                    copy_value(source.as_mut(), row.as_mut(), i)?;
                }
                row.execute()?;
                appended += 1;
                if appended % APPEND_BATCH_SIZE == 0 {
                    self.commit()?;
                    self.begin()?;
                }
                if !source.next()? {
                    break;
                }
            }
            self.commit()?;
        }

        self.log().append_events(other.log().events_from(0));
        Ok(())
    }
}

/// Copies one cell, dispatching on the source column type.
fn copy_value(source: &mut dyn Cursor, target: &mut dyn Cursor, column_index: usize) -> Result<()> {
    let is_defined = !source.is_null(column_index);
    match source.column_type(column_index) {
        ColumnType::Int | ColumnType::Bool | ColumnType::Enum => {
            target.set_int(column_index, source.get_int(column_index, 0), is_defined)
        }
        ColumnType::Int64 | ColumnType::Datetime | ColumnType::Date => {
            target.set_int64(column_index, source.get_int64(column_index, 0), is_defined)
        }
        ColumnType::Double => {
            target.set_double(column_index, source.get_double(column_index, 0.0), is_defined)
        }
        ColumnType::Float => {
            target.set_float(column_index, source.get_float(column_index, 0.0), is_defined)
        }
        ColumnType::Blob | ColumnType::Vector => target.set_blob(column_index, &[], false),
        _ => target.set_text(column_index, &source.get_text(column_index, ""), is_defined),
    }
}

#[cfg(test)]
mod table_tests;
