use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use unicode_normalization::UnicodeNormalization;

use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind, Result};
use crate::key::Key;
use crate::stream::DataStream;
use crate::table::{Column, Table, TableMeta};
use crate::types::ColumnType;

/// One materialized dBASE attribute.
#[derive(Debug, Clone, PartialEq)]
enum DbaseValue {
    Null,
    Text(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

struct DbaseData {
    columns: Vec<Column>,
    records: Vec<Vec<DbaseValue>>,
    primary_key: Option<usize>,
}

fn map_field_type(field_type: dbase::FieldType) -> ColumnType {
    match field_type {
        dbase::FieldType::Character => ColumnType::Varchar,
        dbase::FieldType::Integer => ColumnType::Int,
        dbase::FieldType::Numeric
        | dbase::FieldType::Float
        | dbase::FieldType::Double
        | dbase::FieldType::Currency => ColumnType::Double,
        dbase::FieldType::Logical => ColumnType::Bool,
        _ => ColumnType::Any,
    }
}

fn normalize(text: String) -> String {
    text.nfc().collect()
}

fn map_value(value: &dbase::FieldValue) -> DbaseValue {
    match value {
        dbase::FieldValue::Character(Some(s)) => DbaseValue::Text(normalize(s.trim().to_string())),
        dbase::FieldValue::Character(None) => DbaseValue::Null,
        dbase::FieldValue::Integer(v) => DbaseValue::Int(*v as i64),
        dbase::FieldValue::Numeric(Some(v)) => DbaseValue::Double(*v),
        dbase::FieldValue::Numeric(None) => DbaseValue::Null,
        dbase::FieldValue::Float(Some(v)) => DbaseValue::Double(*v as f64),
        dbase::FieldValue::Float(None) => DbaseValue::Null,
        dbase::FieldValue::Double(v) => DbaseValue::Double(*v),
        dbase::FieldValue::Currency(v) => DbaseValue::Double(*v),
        dbase::FieldValue::Logical(Some(v)) => DbaseValue::Bool(*v),
        dbase::FieldValue::Logical(None) => DbaseValue::Null,
        dbase::FieldValue::Date(Some(d)) => {
            DbaseValue::Text(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }
        dbase::FieldValue::Date(None) => DbaseValue::Null,
        dbase::FieldValue::Memo(s) => DbaseValue::Text(normalize(s.clone())),
        _ => DbaseValue::Null,
    }
}

/// Read-only table over a dBASE IV (`.dbf`) file. Records are
/// materialized at open time; rows are addressed either through an
/// attached primary-key mapping or by zero-based record index.
pub struct DbaseTable {
    data: Arc<DbaseData>,
    primary_key_mapping: HashMap<Key, i64>,
    meta: TableMeta,
}

impl DbaseTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_inner(path.as_ref(), None)
    }

    /// Opens the file and uses `primary_key` (a column index) as the
    /// source of row keys.
    pub fn open_with_primary_key(path: impl AsRef<Path>, primary_key: usize) -> Result<Self> {
        Self::open_inner(path.as_ref(), Some(primary_key))
    }

    fn open_inner(path: &Path, primary_key: Option<usize>) -> Result<Self> {
        debug!("opening {}", path.display());
        let mut reader = dbase::Reader::from_path(path)
            .map_err(|e| Error::new(ErrorKind::OpenFailed, format!("{}: {e}", path.display())))?;

        let columns: Vec<Column> = reader
            .fields()
            .iter()
            .filter(|f| f.name() != "DeletionFlag")
            .map(|f| Column::new(f.name().to_string(), map_field_type(f.field_type())))
            .collect();

        let mut records = Vec::new();
        for record in reader
            .read()
            .map_err(|e| Error::new(ErrorKind::OpenFailed, e.to_string()))?
        {
            let row: Vec<DbaseValue> = columns
                .iter()
                .map(|c| record.get(&c.name).map(map_value).unwrap_or(DbaseValue::Null))
                .collect();
            records.push(row);
        }
        debug!("{}: {} records", path.display(), records.len());

        let key_type = match primary_key {
            Some(_) => vec![ColumnType::Varchar],
            None => vec![ColumnType::Int, ColumnType::Int],
        };

        Ok(Self {
            data: Arc::new(DbaseData {
                columns,
                records,
                primary_key,
            }),
            primary_key_mapping: HashMap::new(),
            meta: TableMeta::new(key_type),
        })
    }

    /// Attaches a key-to-row lookup used by [`Table::seek`] instead of
    /// positional addressing.
    pub fn set_primary_key_mapping(&mut self, mapping: HashMap<Key, i64>) {
        self.primary_key_mapping = mapping;
    }

    pub fn num_rows(&self) -> usize {
        self.data.records.len()
    }

    fn cursor_at(&self, row: i64) -> Option<Box<dyn Cursor>> {
        if row < 0 || row as usize >= self.data.records.len() {
            return None;
        }
        Some(Box::new(DbaseCursor {
            data: Arc::clone(&self.data),
            row: row as usize,
            bind_index: 0,
        }))
    }
}

impl Table for DbaseTable {
    fn meta(&self) -> &TableMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TableMeta {
        &mut self.meta
    }

    fn num_fields(&self) -> usize {
        self.data.columns.len()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        self.data
            .columns
            .get(column_index)
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Any)
    }

    fn column_name(&self, column_index: usize) -> String {
        self.data
            .columns
            .get(column_index)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn add_column(&mut self, _name: &str, _type: ColumnType, _unique: bool, _decimals: u32) -> Result<()> {
        Err(Error::read_only("dBASE"))
    }

    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>> {
        Ok(self.cursor_at(0))
    }

    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>> {
        if !self.primary_key_mapping.is_empty() {
            return Ok(self
                .primary_key_mapping
                .get(key)
                .and_then(|row| self.cursor_at(*row)));
        }
        let component = key.size().saturating_sub(1);
        Ok(self.cursor_at(key.get_int64(component)))
    }

    fn insert(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("dBASE"))
    }

    fn insert_auto(&self) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("dBASE"))
    }

    fn increment(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("dBASE"))
    }

    fn assign(&self, _columns: Vec<usize>) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("dBASE"))
    }

    fn remove(&self, _key: &Key) -> Result<()> {
        Err(Error::read_only("dBASE"))
    }

    fn clear(&self) -> Result<()> {
        Err(Error::read_only("dBASE"))
    }

    fn open_row(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("dBASE"))
    }
}

struct DbaseCursor {
    data: Arc<DbaseData>,
    row: usize,
    bind_index: usize,
}

impl DbaseCursor {
    fn value(&self, column_index: usize) -> Option<&DbaseValue> {
        self.data.records.get(self.row)?.get(column_index)
    }

    fn text_value(&self, column_index: usize) -> Option<String> {
        match self.value(column_index)? {
            DbaseValue::Text(s) => Some(s.clone()),
            DbaseValue::Int(v) => Some(v.to_string()),
            DbaseValue::Double(v) => Some(v.to_string()),
            DbaseValue::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            DbaseValue::Null => None,
        }
    }
}

impl DataStream for DbaseCursor {
    fn execute(&mut self) -> Result<usize> {
        Err(Error::read_only("dBASE"))
    }

    fn next(&mut self) -> Result<bool> {
        if self.row + 1 < self.data.records.len() {
            self.row += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        matches!(self.value(column_index), None | Some(DbaseValue::Null))
    }

    fn num_fields(&self) -> usize {
        self.data.columns.len()
    }

    fn column_name(&self, column_index: usize) -> String {
        self.data
            .columns
            .get(column_index)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        self.data
            .columns
            .get(column_index)
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Any)
    }

    fn get_text(&mut self, column_index: usize, default_value: &str) -> String {
        self.text_value(column_index)
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_blob(&mut self, column_index: usize) -> Vec<u8> {
        self.get_text(column_index, "").into_bytes()
    }

    fn get_bool(&mut self, column_index: usize, default_value: bool) -> bool {
        match self.value(column_index) {
            Some(DbaseValue::Bool(v)) => *v,
            Some(DbaseValue::Int(v)) => *v != 0,
            _ => default_value,
        }
    }

    fn get_int(&mut self, column_index: usize, default_value: i32) -> i32 {
        self.get_int64(column_index, default_value as i64) as i32
    }

    fn get_int64(&mut self, column_index: usize, default_value: i64) -> i64 {
        match self.value(column_index) {
            Some(DbaseValue::Int(v)) => *v,
            Some(DbaseValue::Double(v)) => *v as i64,
            Some(DbaseValue::Bool(v)) => *v as i64,
            Some(DbaseValue::Text(s)) => s.trim().parse().unwrap_or(default_value),
            _ => default_value,
        }
    }

    fn get_float(&mut self, column_index: usize, default_value: f32) -> f32 {
        self.get_double(column_index, default_value as f64) as f32
    }

    fn get_double(&mut self, column_index: usize, default_value: f64) -> f64 {
        match self.value(column_index) {
            Some(DbaseValue::Double(v)) => *v,
            Some(DbaseValue::Int(v)) => *v as f64,
            Some(DbaseValue::Text(s)) => s.trim().parse().unwrap_or(default_value),
            _ => default_value,
        }
    }

    fn set_text(&mut self, _column_index: usize, _value: &str, _is_defined: bool) -> Result<()> {
        Err(Error::read_only("dBASE"))
    }

    fn set_blob(&mut self, _column_index: usize, _data: &[u8], _is_defined: bool) -> Result<()> {
        Err(Error::read_only("dBASE"))
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl Cursor for DbaseCursor {
    fn row_key(&self) -> Key {
        if let Some(primary_key) = self.data.primary_key {
            return Key::from_text(self.text_value(primary_key).unwrap_or_default());
        }
        Key::from_ints2(0, self.row as i64)
    }

    fn update(&mut self, _key: &Key) -> Result<usize> {
        Err(Error::read_only("dBASE"))
    }
}
