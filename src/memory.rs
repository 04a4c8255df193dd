use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::changelog::ChangeLog;
use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind, Result};
use crate::key::Key;
use crate::stream::DataStream;
use crate::table::{Column, Table, TableMeta};
use crate::types::ColumnType;
use crate::util::lock_recover;

struct StorageInner {
    // ordered map so iteration follows key order and survives inserts
    data: BTreeMap<Key, Vec<String>>,
    columns: Vec<Column>,
    auto_increment: i64,
}

/// Row and schema storage shared between a [`MemoryTable`] and its
/// cursors. One mutex guards data, schema and the id counter; every
/// public operation takes it.
pub(crate) struct MemoryStorage {
    inner: Mutex<StorageInner>,
}

impl MemoryStorage {
    fn new() -> Self {
        Self {
            inner: Mutex::new(StorageInner {
                data: BTreeMap::new(),
                columns: Vec::new(),
                auto_increment: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StorageInner> {
        lock_recover(&self.inner, "memory table")
    }
}

/// Thread-safe in-memory table: an ordered map from [`Key`] to rows of
/// cell text, with numeric values stored as decimal strings.
pub struct MemoryTable {
    storage: Arc<MemoryStorage>,
    meta: TableMeta,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::with_key_type(vec![ColumnType::Int64])
    }

    pub fn with_key_type(key_type: Vec<ColumnType>) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            meta: TableMeta::new(key_type),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.storage.lock().data.len()
    }

    fn make_cursor(&self, key: &Key, op: PendingOp, log: Option<Arc<ChangeLog>>) -> Result<MemoryCursor> {
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Mismatch, "empty row key"));
        }
        let columns = self.storage.lock().columns.clone();
        Ok(MemoryCursor {
            storage: Arc::clone(&self.storage),
            columns,
            position: None,
            pending_key: Some(key.clone()),
            pending: HashMap::new(),
            selected_columns: Vec::new(),
            op,
            log,
            bind_index: 0,
            last_insert_id: 0,
        })
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for MemoryTable {
    fn meta(&self) -> &TableMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TableMeta {
        &mut self.meta
    }

    fn num_fields(&self) -> usize {
        self.storage.lock().columns.len()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        self.storage
            .lock()
            .columns
            .get(column_index)
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Any)
    }

    fn column_name(&self, column_index: usize) -> String {
        self.storage
            .lock()
            .columns
            .get(column_index)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn is_column_unique(&self, column_index: usize) -> bool {
        self.storage
            .lock()
            .columns
            .get(column_index)
            .map(|c| c.unique)
            .unwrap_or(false)
    }

    fn column_decimals(&self, column_index: usize) -> u32 {
        self.storage
            .lock()
            .columns
            .get(column_index)
            .map(|c| c.decimals)
            .unwrap_or(0)
    }

    fn add_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        unique: bool,
        decimals: u32,
    ) -> Result<()> {
        self.storage
            .lock()
            .columns
            .push(Column::with_options(name, column_type, unique, decimals));
        Ok(())
    }

    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>> {
        let inner = self.storage.lock();
        let Some(first) = inner.data.keys().next().cloned() else {
            return Ok(None);
        };
        let columns = inner.columns.clone();
        drop(inner);
        Ok(Some(Box::new(MemoryCursor::positioned(
            Arc::clone(&self.storage),
            columns,
            first,
        ))))
    }

    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>> {
        let inner = self.storage.lock();
        if !inner.data.contains_key(key) {
            return Ok(None);
        }
        let columns = inner.columns.clone();
        drop(inner);
        Ok(Some(Box::new(MemoryCursor::positioned(
            Arc::clone(&self.storage),
            columns,
            key.clone(),
        ))))
    }

    fn insert(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(self.make_cursor(
            key,
            PendingOp::Insert,
            Some(Arc::clone(self.log())),
        )?))
    }

    fn insert_auto(&self) -> Result<Box<dyn Cursor>> {
        let id = {
            let mut inner = self.storage.lock();
            inner.auto_increment += 1;
            inner.auto_increment
        };
        let mut cursor = self.make_cursor(
            &Key::from_int(id),
            PendingOp::Insert,
            Some(Arc::clone(self.log())),
        )?;
        cursor.last_insert_id = id;
        Ok(Box::new(cursor))
    }

    fn increment(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(self.make_cursor(
            key,
            PendingOp::Increment,
            Some(Arc::clone(self.log())),
        )?))
    }

    fn assign(&self, columns: Vec<usize>) -> Result<Box<dyn Cursor>> {
        let schema = self.storage.lock().columns.clone();
        Ok(Box::new(MemoryCursor {
            storage: Arc::clone(&self.storage),
            columns: schema,
            position: None,
            pending_key: None,
            pending: HashMap::new(),
            selected_columns: columns,
            op: PendingOp::Insert,
            log: Some(Arc::clone(self.log())),
            bind_index: 0,
            last_insert_id: 0,
        }))
    }

    fn remove(&self, key: &Key) -> Result<()> {
        let removed = self.storage.lock().data.remove(key).is_some();
        if removed {
            self.log().remove(key.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.storage.lock().data.clear();
        Ok(())
    }

    fn open_row(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(self.make_cursor(key, PendingOp::Insert, None)?))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    Insert,
    Increment,
}

struct MemoryCursor {
    storage: Arc<MemoryStorage>,
    // schema snapshot, so metadata reads need no lock
    columns: Vec<Column>,
    position: Option<Key>,
    pending_key: Option<Key>,
    pending: HashMap<usize, String>,
    selected_columns: Vec<usize>,
    op: PendingOp,
    log: Option<Arc<ChangeLog>>,
    bind_index: usize,
    last_insert_id: i64,
}

impl MemoryCursor {
    fn positioned(storage: Arc<MemoryStorage>, columns: Vec<Column>, key: Key) -> Self {
        Self {
            storage,
            columns,
            position: Some(key),
            pending_key: None,
            pending: HashMap::new(),
            selected_columns: Vec::new(),
            op: PendingOp::Insert,
            log: None,
            bind_index: 0,
            last_insert_id: 0,
        }
    }

    fn cell(&self, column_index: usize) -> Option<String> {
        let position = self.position.as_ref()?;
        let inner = self.storage.lock();
        let row = inner.data.get(position)?;
        row.get(column_index).cloned()
    }
}

impl DataStream for MemoryCursor {
    fn execute(&mut self) -> Result<usize> {
        let mut inner = self.storage.lock();
        if let Some(key) = self.pending_key.take() {
            inner.data.entry(key.clone()).or_default();
            self.position = Some(key);
        }
        let Some(position) = self.position.clone() else {
            return Ok(0);
        };
        let is_increment = self.op == PendingOp::Increment;
        let columns = &self.columns;
        let Some(row) = inner.data.get_mut(&position) else {
            return Ok(0);
        };
        for (&column_index, value) in &self.pending {
            if row.len() <= column_index {
                row.resize(column_index + 1, String::new());
            }
            let cell = &mut row[column_index];
            if is_increment {
                if cell.is_empty() {
                    *cell = value.clone();
                } else if columns
                    .get(column_index)
                    .map(|c| c.column_type.is_numeric())
                    .unwrap_or(false)
                {
                    let sum = cell.parse::<i64>().unwrap_or(0) + value.parse::<i64>().unwrap_or(0);
                    *cell = sum.to_string();
                }
            } else {
                *cell = value.clone();
            }
        }
        self.pending.clear();
        drop(inner);
        if let Some(log) = &self.log {
            log.add(position);
        }
        Ok(1)
    }

    fn next(&mut self) -> Result<bool> {
        self.pending.clear();
        let Some(position) = self.position.clone() else {
            return Ok(false);
        };
        let inner = self.storage.lock();
        match inner
            .data
            .range((Bound::Excluded(position), Bound::Unbounded))
            .next()
        {
            Some((key, _)) => {
                self.position = Some(key.clone());
                Ok(true)
            }
            None => {
                self.position = None;
                Ok(false)
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        self.pending.clear();
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        match self.cell(column_index) {
            Some(cell) => cell.is_empty(),
            None => true,
        }
    }

    fn num_fields(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, column_index: usize) -> String {
        self.columns
            .get(column_index)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        self.columns
            .get(column_index)
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Any)
    }

    fn get_text(&mut self, column_index: usize, default_value: &str) -> String {
        self.cell(column_index)
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_blob(&mut self, column_index: usize) -> Vec<u8> {
        self.cell(column_index)
            .map(|cell| cell.into_bytes())
            .unwrap_or_default()
    }

    fn set_text(&mut self, column_index: usize, value: &str, is_defined: bool) -> Result<()> {
        if is_defined {
            self.pending.insert(column_index, value.to_string());
        } else {
            self.pending.remove(&column_index);
        }
        Ok(())
    }

    fn set_blob(&mut self, column_index: usize, data: &[u8], is_defined: bool) -> Result<()> {
        self.set_text(
            column_index,
            &String::from_utf8_lossy(data),
            is_defined,
        )
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl Cursor for MemoryCursor {
    fn row_key(&self) -> Key {
        self.position
            .clone()
            .or_else(|| self.pending_key.clone())
            .unwrap_or_default()
    }

    fn update(&mut self, key: &Key) -> Result<usize> {
        let mut inner = self.storage.lock();
        let Some(row) = inner.data.get_mut(key) else {
            return Ok(0);
        };
        for (i, &column_index) in self.selected_columns.iter().enumerate() {
            if let Some(value) = self.pending.get(&i) {
                if row.len() <= column_index {
                    row.resize(column_index + 1, String::new());
                }
                row[column_index] = value.clone();
            } else if column_index < row.len() {
                row[column_index].clear();
            }
        }
        self.pending.clear();
        drop(inner);
        if let Some(log) = &self.log {
            log.add(key.clone());
        }
        Ok(1)
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }
}

#[cfg(test)]
mod memory_tests;
