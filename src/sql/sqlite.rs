use std::cmp::Ordering;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::error::{Error, ErrorKind, Result};
use crate::sql::{Connection, SqlStatement};
use crate::stream::DataStream;
use crate::types::ColumnType;

const BUSY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Case-folded ordering that puts the Nordic accents after Z, per
/// column: å/Å = 27, ä/Ä = 28, ö/Ö = 29. Other characters keep their
/// code point.
static CHAR_ORDER: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut order = [0u32; 256];
    for (i, slot) in order.iter_mut().enumerate() {
        *slot = i as u32;
    }
    for c in b'a'..=b'z' {
        order[c as usize] = 1 + (c - b'a') as u32;
    }
    for c in b'A'..=b'Z' {
        order[c as usize] = 1 + (c - b'A') as u32;
    }
    order[0xe5] = 27;
    order[0xc5] = 27;
    order[0xe4] = 28;
    order[0xc4] = 28;
    order[0xf6] = 29;
    order[0xd6] = 29;
    order
});

fn char_order(c: char) -> u32 {
    let code = c as u32;
    if code < 256 {
        CHAR_ORDER[code as usize]
    } else {
        code
    }
}

fn collate_nocase(a: &str, b: &str) -> Ordering {
    let mut rhs = b.chars();
    for ca in a.chars() {
        let Some(cb) = rhs.next() else {
            return Ordering::Greater;
        };
        match char_order(ca).cmp(&char_order(cb)) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
    }
    if rhs.next().is_some() {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

fn map_error(e: rusqlite::Error, default_kind: ErrorKind, query: &str) -> Error {
    let kind = match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                ErrorKind::QueryTimedOut
            }
            rusqlite::ErrorCode::ConstraintViolation => ErrorKind::ConstraintViolation,
            rusqlite::ErrorCode::SchemaChanged => ErrorKind::SchemaChanged,
            rusqlite::ErrorCode::ApiMisuse => ErrorKind::DatabaseMisuse,
            rusqlite::ErrorCode::TypeMismatch => ErrorKind::Mismatch,
            rusqlite::ErrorCode::ReadOnly => ErrorKind::ReadOnly,
            _ => default_kind,
        },
        _ => default_kind,
    };
    Error::with_query(kind, e.to_string(), query)
}

/// One materialized cell of a result row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    fn from_ref(value: rusqlite::types::ValueRef<'_>) -> Result<Self> {
        use rusqlite::types::ValueRef;
        Ok(match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(bytes) => SqlValue::Text(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| Error::new(ErrorKind::GetFailed, "invalid UTF-8 in text cell"))?,
            ),
            ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
        })
    }
}

/// Connection to a SQLite database file (or `:memory:`).
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Opens read-write, creating the database when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), false)
    }

    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), true)
    }

    fn open_with(path: &Path, read_only: bool) -> Result<Self> {
        use rusqlite::OpenFlags;

        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        let conn = rusqlite::Connection::open_with_flags(path, flags)
            .map_err(|e| Error::new(ErrorKind::OpenFailed, e.to_string()))?;
        debug!("opened {}", path.display());

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::new(ErrorKind::InitFailed, e.to_string()))?;
        if let Err(e) = conn.create_collation("NOCASE", collate_nocase) {
            warn!("failed to create NOCASE collation: {e}");
        }
        Ok(Self { conn })
    }

    pub(crate) fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn prepare<'a>(&'a self, query: &str) -> Result<Box<dyn SqlStatement + 'a>> {
        let stmt = self
            .conn
            .prepare(query)
            .map_err(|e| map_error(e, ErrorKind::PrepareFailed, query))?;
        let column_names = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        Ok(Box::new(SqliteStatement {
            conn: &self.conn,
            stmt,
            query: query.to_string(),
            column_names,
            rows: Vec::new(),
            row_idx: 0,
            executed: false,
            available: false,
            affected: 0,
            last_insert_id: 0,
            bind_index: 0,
        }))
    }
}

pub struct SqliteStatement<'conn> {
    conn: &'conn rusqlite::Connection,
    stmt: rusqlite::Statement<'conn>,
    query: String,
    column_names: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    row_idx: usize,
    executed: bool,
    available: bool,
    affected: usize,
    last_insert_id: i64,
    bind_index: usize,
}

impl SqliteStatement<'_> {
    fn current_value(&self, column_index: usize) -> Option<&SqlValue> {
        if !self.available {
            return None;
        }
        self.rows.get(self.row_idx)?.get(column_index)
    }

    /// Binds through the 1-based native parameter index.
    fn bind_value<T: rusqlite::ToSql>(
        &mut self,
        column_index: usize,
        value: T,
        is_defined: bool,
    ) -> Result<()> {
        if column_index >= self.stmt.parameter_count() {
            return Err(Error::bad_bind_index(column_index));
        }
        if is_defined {
            self.stmt
                .raw_bind_parameter(column_index + 1, value)
                .map_err(|e| map_error(e, ErrorKind::BindFailed, &self.query))
        } else {
            self.stmt
                .raw_bind_parameter(column_index + 1, rusqlite::types::Null)
                .map_err(|e| map_error(e, ErrorKind::BindFailed, &self.query))
        }
    }
}

impl DataStream for SqliteStatement<'_> {
    fn execute(&mut self) -> Result<usize> {
        self.rows.clear();
        self.row_idx = 0;
        self.available = false;
        self.executed = true;

        if self.stmt.column_count() > 0 {
            let mut rows = self.stmt.raw_query();
            while let Some(row) = rows
                .next()
                .map_err(|e| map_error(e, ErrorKind::ExecuteFailed, &self.query))?
            {
                let mut cells = Vec::with_capacity(self.column_names.len());
                for i in 0..self.column_names.len() {
                    let value = row
                        .get_ref(i)
                        .map_err(|e| map_error(e, ErrorKind::GetFailed, &self.query))?;
                    cells.push(SqlValue::from_ref(value)?);
                }
                self.rows.push(cells);
            }
            self.available = !self.rows.is_empty();
        } else {
            self.stmt
                .raw_execute()
                .map_err(|e| map_error(e, ErrorKind::ExecuteFailed, &self.query))?;
        }

        self.affected = self.conn.changes() as usize;
        self.last_insert_id = self.conn.last_insert_rowid();
        Ok(self.affected)
    }

    fn next(&mut self) -> Result<bool> {
        if !self.executed {
            self.execute()?;
            return Ok(self.available);
        }
        if self.row_idx + 1 < self.rows.len() {
            self.row_idx += 1;
            self.available = true;
        } else {
            self.available = false;
        }
        Ok(self.available)
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        self.rows.clear();
        self.row_idx = 0;
        self.available = false;
        self.executed = false;
        for i in 1..=self.stmt.parameter_count() {
            self.stmt
                .raw_bind_parameter(i, rusqlite::types::Null)
                .map_err(|e| map_error(e, ErrorKind::BindFailed, &self.query))?;
        }
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        matches!(self.current_value(column_index), None | Some(SqlValue::Null))
    }

    fn num_fields(&self) -> usize {
        self.column_names.len()
    }

    fn column_name(&self, column_index: usize) -> String {
        self.column_names
            .get(column_index)
            .cloned()
            .unwrap_or_default()
    }

    /// Storage class of the current cell: INTEGER, REAL, TEXT, BLOB and
    /// NULL map to Int64, Float, Varchar, Varchar and Undef.
    fn column_type(&self, column_index: usize) -> ColumnType {
        match self.current_value(column_index) {
            Some(SqlValue::Int(_)) => ColumnType::Int64,
            Some(SqlValue::Real(_)) => ColumnType::Float,
            Some(SqlValue::Text(_)) => ColumnType::Varchar,
            Some(SqlValue::Blob(_)) => ColumnType::Varchar,
            Some(SqlValue::Null) | None => ColumnType::Undef,
        }
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
        self.bind_value(column_index, value.to_string(), is_defined)
    }

    fn set_blob(&mut self, column_index: usize, data: &[u8], is_defined: bool) -> Result<()> {
        self.bind_value(column_index, data.to_vec(), is_defined)
    }

    fn set_int(&mut self, column_index: usize, value: i32, is_defined: bool) -> Result<()> {
        self.bind_value(column_index, value, is_defined)
    }

    fn set_int64(&mut self, column_index: usize, value: i64, is_defined: bool) -> Result<()> {
        self.bind_value(column_index, value, is_defined)
    }

    fn set_float(&mut self, column_index: usize, value: f32, is_defined: bool) -> Result<()> {
        self.bind_value(column_index, value as f64, is_defined)
    }

    fn set_double(&mut self, column_index: usize, value: f64, is_defined: bool) -> Result<()> {
        self.bind_value(column_index, value, is_defined)
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl SqlStatement for SqliteStatement<'_> {
    fn affected_rows(&self) -> usize {
        self.affected
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }

    fn results_available(&self) -> bool {
        self.available
    }

    fn query(&self) -> &str {
        &self.query
    }
}
