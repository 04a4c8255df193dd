use std::collections::BTreeMap;
use std::sync::Arc;

use crate::changelog::ChangeLog;
use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind, Result};
use crate::key::Key;
use crate::sql::sqlite::{SqlValue, SqliteConnection};
use crate::sql::Connection;
use crate::stream::DataStream;
use crate::table::{Column, Table, TableMeta};
use crate::types::ColumnType;

const KEY_COLUMN: &str = "id";

fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Int
        | ColumnType::Int64
        | ColumnType::Bool
        | ColumnType::Datetime
        | ColumnType::Date => "INTEGER",
        ColumnType::Float | ColumnType::Double => "REAL",
        ColumnType::Blob | ColumnType::Vector => "BLOB",
        _ => "TEXT",
    }
}

fn column_type_from_sql(declared: &str) -> ColumnType {
    match declared.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT" => ColumnType::Int64,
        "REAL" | "DOUBLE" | "FLOAT" => ColumnType::Double,
        "BLOB" => ColumnType::Blob,
        _ => ColumnType::Text,
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Decomposes a key the way [`DataStream::set_key`] does: single
/// numeric component as an integer, single text component as text, a
/// composite key as its serialization.
fn key_to_value(key: &Key) -> SqlValue {
    if key.is_empty() {
        SqlValue::Null
    } else if key.size() >= 2 {
        SqlValue::Text(key.serialize_to_text())
    } else if key.get_type(0).is_numeric() {
        SqlValue::Int(key.get_int64(0))
    } else {
        SqlValue::Text(key.get_text(0).to_string())
    }
}

fn key_from_value(value: &SqlValue) -> Key {
    match value {
        SqlValue::Int(v) => Key::from_int(*v),
        SqlValue::Real(v) => Key::from_int(*v as i64),
        SqlValue::Text(s) => Key::parse_text(s),
        _ => Key::new(),
    }
}

fn bind_sql_value(stmt: &mut dyn crate::sql::SqlStatement, value: &SqlValue) -> Result<()> {
    match value {
        SqlValue::Null => stmt.bind_null(),
        SqlValue::Int(v) => stmt.bind_int64(*v, true),
        SqlValue::Real(v) => stmt.bind_double(*v, true),
        SqlValue::Text(s) => stmt.bind_text(s, true),
        SqlValue::Blob(b) => stmt.bind_blob(b, true),
    }
}

/// A [`Table`] stored in one SQLite database table with an `id`
/// primary-key column. The table is created lazily on the first
/// mutating operation, typed from the key type known at that point.
pub struct SqliteTable {
    conn: Arc<SqliteConnection>,
    table: String,
    columns: Vec<Column>,
    meta: TableMeta,
}

impl SqliteTable {
    pub fn new(conn: Arc<SqliteConnection>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let mut this = Self {
            conn,
            table,
            columns: Vec::new(),
            meta: TableMeta::new(vec![ColumnType::Int64]),
        };
        this.load_schema()?;
        Ok(this)
    }

    pub fn connection(&self) -> &Arc<SqliteConnection> {
        &self.conn
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn load_schema(&mut self) -> Result<()> {
        if !self.table_exists()? {
            return Ok(());
        }
        let query = format!("PRAGMA table_info({})", quote_identifier(&self.table));
        let mut stmt = self.conn.prepare(&query)?;
        while stmt.next()? {
            let name = stmt.get_text(1, "");
            let declared = stmt.get_text(2, "");
            if name == KEY_COLUMN {
                self.meta.key_type = vec![match column_type_from_sql(&declared) {
                    ColumnType::Int64 => ColumnType::Int64,
                    _ => ColumnType::Varchar,
                }];
                continue;
            }
            self.columns
                .push(Column::new(name, column_type_from_sql(&declared)));
        }
        Ok(())
    }

    fn table_exists(&self) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")?;
        stmt.bind_text(&self.table, true)?;
        stmt.next()
    }

    fn ensure_table(&self) -> Result<()> {
        let key_sql = if self.has_numeric_key() { "INTEGER" } else { "TEXT" };
        self.conn.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} PRIMARY KEY)",
            quote_identifier(&self.table),
            quote_identifier(KEY_COLUMN),
            key_sql
        ))?;
        Ok(())
    }

    fn select_all_sql(&self) -> String {
        let mut selected = quote_identifier(KEY_COLUMN);
        for column in &self.columns {
            selected.push_str(", ");
            selected.push_str(&quote_identifier(&column.name));
        }
        format!(
            "SELECT {selected} FROM {}",
            quote_identifier(&self.table)
        )
    }

    /// Runs a row query and materializes `(key, cells)` pairs.
    fn fetch_rows(&self, query: &str, key: Option<&Key>) -> Result<Vec<(Key, Vec<SqlValue>)>> {
        let mut stmt = self.conn.prepare(query)?;
        if let Some(key) = key {
            bind_sql_value(stmt.as_mut(), &key_to_value(key))?;
        }
        let mut rows = Vec::new();
        while stmt.next()? {
            let mut cells = Vec::with_capacity(self.columns.len());
            for i in 0..self.columns.len() {
                cells.push(read_cell(stmt.as_mut(), i + 1));
            }
            rows.push((key_from_value(&read_cell(stmt.as_mut(), 0)), cells));
        }
        Ok(rows)
    }

    fn read_cursor(&self, rows: Vec<(Key, Vec<SqlValue>)>) -> SqliteTableCursor {
        SqliteTableCursor {
            conn: Arc::clone(&self.conn),
            table: self.table.clone(),
            columns: self.columns.clone(),
            rows,
            row_idx: 0,
            pending: BTreeMap::new(),
            pending_key: None,
            op: CursorOp::Read,
            selected_columns: Vec::new(),
            log: None,
            auto_key: false,
            last_insert_id: 0,
            bind_index: 0,
        }
    }

    fn write_cursor(&self, key: Option<Key>, op: CursorOp, log: Option<Arc<ChangeLog>>) -> SqliteTableCursor {
        SqliteTableCursor {
            conn: Arc::clone(&self.conn),
            table: self.table.clone(),
            columns: self.columns.clone(),
            rows: Vec::new(),
            row_idx: 0,
            pending: BTreeMap::new(),
            pending_key: key,
            op,
            selected_columns: Vec::new(),
            log,
            auto_key: false,
            last_insert_id: 0,
            bind_index: 0,
        }
    }
}

fn read_cell(stmt: &mut dyn crate::sql::SqlStatement, column_index: usize) -> SqlValue {
    if stmt.is_null(column_index) {
        return SqlValue::Null;
    }
    match stmt.column_type(column_index) {
        ColumnType::Int64 => SqlValue::Int(stmt.get_int64(column_index, 0)),
        ColumnType::Float => SqlValue::Real(stmt.get_double(column_index, 0.0)),
        _ => SqlValue::Text(stmt.get_text(column_index, "")),
    }
}

impl Table for SqliteTable {
    fn meta(&self) -> &TableMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TableMeta {
        &mut self.meta
    }

    fn num_fields(&self) -> usize {
        self.columns.len()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        self.columns
            .get(column_index)
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Any)
    }

    fn column_name(&self, column_index: usize) -> String {
        self.columns
            .get(column_index)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn add_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        unique: bool,
        decimals: u32,
    ) -> Result<()> {
        if self.columns.iter().any(|c| c.name == name) {
            return Ok(());
        }
        self.ensure_table()?;
        self.conn.execute(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_identifier(&self.table),
            quote_identifier(name),
            sql_type(column_type)
        ))?;
        self.columns
            .push(Column::with_options(name, column_type, unique, decimals));
        Ok(())
    }

    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>> {
        if !self.table_exists()? {
            return Ok(None);
        }
        let query = format!(
            "{} ORDER BY {}",
            self.select_all_sql(),
            quote_identifier(KEY_COLUMN)
        );
        let rows = self.fetch_rows(&query, None)?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(self.read_cursor(rows))))
    }

    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>> {
        if !self.table_exists()? {
            return Ok(None);
        }
        let query = format!(
            "{} WHERE {} = ?",
            self.select_all_sql(),
            quote_identifier(KEY_COLUMN)
        );
        let rows = self.fetch_rows(&query, Some(key))?;
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(self.read_cursor(rows))))
    }

    fn insert(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        self.ensure_table()?;
        Ok(Box::new(self.write_cursor(
            Some(key.clone()),
            CursorOp::Insert,
            Some(Arc::clone(self.log())),
        )))
    }

    fn insert_auto(&self) -> Result<Box<dyn Cursor>> {
        if !self.has_numeric_key() {
            return Err(Error::new(
                ErrorKind::Mismatch,
                "auto-generated keys need a numeric key column",
            ));
        }
        self.ensure_table()?;
        let mut cursor = self.write_cursor(None, CursorOp::Insert, Some(Arc::clone(self.log())));
        cursor.auto_key = true;
        Ok(Box::new(cursor))
    }

    fn increment(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        self.ensure_table()?;
        Ok(Box::new(self.write_cursor(
            Some(key.clone()),
            CursorOp::Increment,
            Some(Arc::clone(self.log())),
        )))
    }

    fn assign(&self, columns: Vec<usize>) -> Result<Box<dyn Cursor>> {
        self.ensure_table()?;
        let mut cursor = self.write_cursor(None, CursorOp::Insert, Some(Arc::clone(self.log())));
        cursor.selected_columns = columns;
        Ok(Box::new(cursor))
    }

    fn remove(&self, key: &Key) -> Result<()> {
        if !self.table_exists()? {
            return Ok(());
        }
        let query = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(&self.table),
            quote_identifier(KEY_COLUMN)
        );
        let mut stmt = self.conn.prepare(&query)?;
        bind_sql_value(stmt.as_mut(), &key_to_value(key))?;
        if stmt.execute()? > 0 {
            self.log().remove(key.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if !self.table_exists()? {
            return Ok(());
        }
        self.conn
            .execute(&format!("DELETE FROM {}", quote_identifier(&self.table)))?;
        Ok(())
    }

    fn open_row(&self, key: &Key) -> Result<Box<dyn Cursor>> {
        self.ensure_table()?;
        Ok(Box::new(self.write_cursor(
            Some(key.clone()),
            CursorOp::Insert,
            None,
        )))
    }

    fn begin(&self) -> Result<()> {
        Connection::begin(self.conn.as_ref())
    }

    fn commit(&self) -> Result<()> {
        Connection::commit(self.conn.as_ref())
    }

    fn rollback(&self) -> Result<()> {
        Connection::rollback(self.conn.as_ref())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CursorOp {
    Read,
    Insert,
    Increment,
}

struct SqliteTableCursor {
    conn: Arc<SqliteConnection>,
    table: String,
    columns: Vec<Column>,
    rows: Vec<(Key, Vec<SqlValue>)>,
    row_idx: usize,
    pending: BTreeMap<usize, SqlValue>,
    pending_key: Option<Key>,
    op: CursorOp,
    selected_columns: Vec<usize>,
    log: Option<Arc<ChangeLog>>,
    auto_key: bool,
    last_insert_id: i64,
    bind_index: usize,
}

impl SqliteTableCursor {
    fn current_value(&self, column_index: usize) -> Option<&SqlValue> {
        self.rows.get(self.row_idx)?.1.get(column_index)
    }

    fn stage(&mut self, column_index: usize, value: SqlValue, is_defined: bool) -> Result<()> {
        let in_projection =
            !self.selected_columns.is_empty() && column_index < self.selected_columns.len();
        if column_index >= self.columns.len() && !in_projection {
            return Err(Error::bad_column_index(column_index));
        }
        if is_defined {
            self.pending.insert(column_index, value);
        } else {
            self.pending.remove(&column_index);
        }
        Ok(())
    }

    /// Upsert of the staged cells. Increment rewrites each staged
    /// column additively for numeric types and fill-if-empty for the
    /// rest.
    fn flush(&mut self) -> Result<usize> {
        let key = self.pending_key.clone();
        let table = quote_identifier(&self.table);
        let key_column = quote_identifier(KEY_COLUMN);

        let mut insert_columns = Vec::new();
        let mut update_clauses = Vec::new();
        for (&column_index, _) in &self.pending {
            let Some(column) = self.columns.get(column_index) else {
                return Err(Error::bad_column_index(column_index));
            };
            let name = quote_identifier(&column.name);
            if self.op == CursorOp::Increment {
                if column.column_type.is_numeric() {
                    update_clauses.push(format!(
                        "{name} = COALESCE({name}, 0) + excluded.{name}"
                    ));
                } else {
                    update_clauses.push(format!(
                        "{name} = CASE WHEN {name} IS NULL OR {name} = '' THEN excluded.{name} ELSE {name} END"
                    ));
                }
            } else {
                update_clauses.push(format!("{name} = excluded.{name}"));
            }
            insert_columns.push(name);
        }

        let mut query = format!("INSERT INTO {table} (");
        let mut placeholders = Vec::new();
        if key.is_some() {
            query.push_str(&key_column);
            placeholders.push("?");
            if !insert_columns.is_empty() {
                query.push_str(", ");
            }
        } else if insert_columns.is_empty() {
            // auto key with nothing staged
            query = format!("INSERT INTO {table} DEFAULT VALUES");
        }
        if !insert_columns.is_empty() {
            query.push_str(&insert_columns.join(", "));
            for _ in &insert_columns {
                placeholders.push("?");
            }
        }
        if !placeholders.is_empty() {
            query.push_str(&format!(") VALUES ({})", placeholders.join(", ")));
        }
        if key.is_some() {
            if update_clauses.is_empty() {
                query.push_str(&format!(" ON CONFLICT({key_column}) DO NOTHING"));
            } else {
                query.push_str(&format!(
                    " ON CONFLICT({key_column}) DO UPDATE SET {}",
                    update_clauses.join(", ")
                ));
            }
        }

        let mut stmt = self.conn.prepare(&query)?;
        if let Some(key) = &key {
            bind_sql_value(stmt.as_mut(), &key_to_value(key))?;
        }
        for value in self.pending.values() {
            bind_sql_value(stmt.as_mut(), value)?;
        }
        let affected = stmt.execute()?;
        self.last_insert_id = stmt.last_insert_id();
        drop(stmt);
        self.pending.clear();

        let logged_key = key.unwrap_or_else(|| Key::from_int(self.last_insert_id));
        if let Some(log) = &self.log {
            log.add(logged_key);
        }
        Ok(affected)
    }
}

impl DataStream for SqliteTableCursor {
    fn execute(&mut self) -> Result<usize> {
        if self.op == CursorOp::Read {
            return Ok(0);
        }
        if self.pending_key.is_none() && !self.auto_key {
            // assign cursors write through update()
            return Ok(0);
        }
        self.flush()
    }

    fn next(&mut self) -> Result<bool> {
        self.pending.clear();
        if self.row_idx + 1 < self.rows.len() {
            self.row_idx += 1;
            Ok(true)
        } else {
            self.row_idx = self.rows.len();
            Ok(false)
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        self.pending.clear();
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        matches!(self.current_value(column_index), None | Some(SqlValue::Null))
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
        match self.current_value(column_index) {
            Some(SqlValue::Int(v)) => v.to_string(),
            Some(SqlValue::Real(v)) => v.to_string(),
            Some(SqlValue::Text(s)) => s.clone(),
            Some(SqlValue::Blob(b)) => String::from_utf8_lossy(b).into_owned(),
            _ => default_value.to_string(),
        }
    }

    fn get_blob(&mut self, column_index: usize) -> Vec<u8> {
        match self.current_value(column_index) {
            Some(SqlValue::Blob(b)) => b.clone(),
            Some(SqlValue::Text(s)) => s.clone().into_bytes(),
            _ => Vec::new(),
        }
    }

    fn get_int(&mut self, column_index: usize, default_value: i32) -> i32 {
        self.get_int64(column_index, default_value as i64) as i32
    }

    fn get_int64(&mut self, column_index: usize, default_value: i64) -> i64 {
        match self.current_value(column_index) {
            Some(SqlValue::Int(v)) => *v,
            Some(SqlValue::Real(v)) => *v as i64,
            Some(SqlValue::Text(s)) => s.trim().parse().unwrap_or(default_value),
            _ => default_value,
        }
    }

    fn get_float(&mut self, column_index: usize, default_value: f32) -> f32 {
        self.get_double(column_index, default_value as f64) as f32
    }

    fn get_double(&mut self, column_index: usize, default_value: f64) -> f64 {
        match self.current_value(column_index) {
            Some(SqlValue::Int(v)) => *v as f64,
            Some(SqlValue::Real(v)) => *v,
            Some(SqlValue::Text(s)) => s.trim().parse().unwrap_or(default_value),
            _ => default_value,
        }
    }

    fn set_text(&mut self, column_index: usize, value: &str, is_defined: bool) -> Result<()> {
        self.stage(column_index, SqlValue::Text(value.to_string()), is_defined)
    }

    fn set_blob(&mut self, column_index: usize, data: &[u8], is_defined: bool) -> Result<()> {
        self.stage(column_index, SqlValue::Blob(data.to_vec()), is_defined)
    }

    fn set_int(&mut self, column_index: usize, value: i32, is_defined: bool) -> Result<()> {
        self.stage(column_index, SqlValue::Int(value as i64), is_defined)
    }

    fn set_int64(&mut self, column_index: usize, value: i64, is_defined: bool) -> Result<()> {
        self.stage(column_index, SqlValue::Int(value), is_defined)
    }

    fn set_float(&mut self, column_index: usize, value: f32, is_defined: bool) -> Result<()> {
        self.stage(column_index, SqlValue::Real(value as f64), is_defined)
    }

    fn set_double(&mut self, column_index: usize, value: f64, is_defined: bool) -> Result<()> {
        self.stage(column_index, SqlValue::Real(value), is_defined)
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl Cursor for SqliteTableCursor {
    fn row_key(&self) -> Key {
        if let Some((key, _)) = self.rows.get(self.row_idx) {
            return key.clone();
        }
        self.pending_key.clone().unwrap_or_default()
    }

    /// Applies the staged projection: staged slots are written, the
    /// other projected columns cleared.
    fn update(&mut self, key: &Key) -> Result<usize> {
        if self.selected_columns.is_empty() {
            return Ok(0);
        }
        let table = quote_identifier(&self.table);
        let key_column = quote_identifier(KEY_COLUMN);
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for (i, &column_index) in self.selected_columns.iter().enumerate() {
            let Some(column) = self.columns.get(column_index) else {
                return Err(Error::bad_column_index(column_index));
            };
            let name = quote_identifier(&column.name);
            if let Some(value) = self.pending.get(&i) {
                clauses.push(format!("{name} = ?"));
                values.push(value.clone());
            } else {
                clauses.push(format!("{name} = NULL"));
            }
        }
        let query = format!(
            "UPDATE {table} SET {} WHERE {key_column} = ?",
            clauses.join(", ")
        );
        let mut stmt = self.conn.prepare(&query)?;
        for value in &values {
            bind_sql_value(stmt.as_mut(), value)?;
        }
        bind_sql_value(stmt.as_mut(), &key_to_value(key))?;
        let affected = stmt.execute()?;
        drop(stmt);
        self.pending.clear();
        if affected > 0 {
            if let Some(log) = &self.log {
                log.add(key.clone());
            }
        }
        Ok(affected)
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }
}

#[cfg(test)]
mod sqlite_table_tests;
