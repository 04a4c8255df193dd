use std::cell::RefCell;

use log::{debug, warn};
use mysql::consts::CapabilityFlags;
use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Params, Row, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::sql::{Connection, SqlStatement};
use crate::stream::DataStream;

/// Upper bound on positional parameters per statement.
const MAX_BOUND_PARAMS: usize = 255;

/// Client error for a connection the server has dropped.
const SERVER_GONE: u16 = 2006;

/// Endpoint description for a MySQL connection. Serializable so
/// embedding applications can persist connection settings; the
/// password is never written out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectionInfo {
    pub fn new(
        name: &str,
        username: &str,
        password: &str,
        host: &str,
        port: u16,
        database: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} ({}@{}:{}/{})",
            self.name, self.username, self.host, self.port, self.database
        )
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: String::new(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 3306,
            database: String::new(),
        }
    }
}

fn is_server_gone(e: &mysql::Error) -> bool {
    match e {
        mysql::Error::MySqlError(server) => server.code == SERVER_GONE,
        mysql::Error::IoError(_) => true,
        _ => false,
    }
}

fn map_error(e: mysql::Error, kind: ErrorKind, query: &str) -> Error {
    Error::with_query(kind, e.to_string(), query)
}

/// Connection to a MySQL server. Connects with `CLIENT_FOUND_ROWS` and
/// switches the session to utf8mb4. Statements borrow the connection;
/// sharing one connection across threads requires external
/// serialization.
pub struct MySqlConnection {
    conn: RefCell<mysql::Conn>,
    info: ConnectionInfo,
}

impl MySqlConnection {
    pub fn connect(info: ConnectionInfo) -> Result<Self> {
        let conn = Self::open(&info)?;
        Ok(Self {
            conn: RefCell::new(conn),
            info,
        })
    }

    fn opts(info: &ConnectionInfo) -> Opts {
        OptsBuilder::new()
            .ip_or_hostname(Some(info.host.clone()))
            .tcp_port(info.port)
            .user(Some(info.username.clone()))
            .pass(Some(info.password.clone()))
            .db_name(Some(info.database.clone()))
            .additional_capabilities(CapabilityFlags::CLIENT_FOUND_ROWS)
            .into()
    }

    fn open(info: &ConnectionInfo) -> Result<mysql::Conn> {
        let mut conn = mysql::Conn::new(Self::opts(info)).map_err(|e| {
            Error::new(
                ErrorKind::ConnectionFailed,
                format!("{}: {e}", info.display_string()),
            )
        })?;
        conn.query_drop("SET NAMES utf8mb4")
            .map_err(|e| Error::new(ErrorKind::InitFailed, e.to_string()))?;
        debug!("connected to {}", info.display_string());
        Ok(conn)
    }

    fn reconnect(&self) -> Result<()> {
        *self.conn.borrow_mut() = Self::open(&self.info)?;
        Ok(())
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }
}

impl Connection for MySqlConnection {
    /// Prepares `query`, transparently reconnecting once when the
    /// server has gone away.
    fn prepare<'a>(&'a self, query: &str) -> Result<Box<dyn SqlStatement + 'a>> {
        for attempt in 0.. {
            let prepared = self.conn.borrow_mut().prep(query);
            match prepared {
                Ok(stmt) => {
                    return Ok(Box::new(MySqlStatement {
                        conn: self,
                        stmt,
                        query: query.to_string(),
                        params: Vec::new(),
                        rows: Vec::new(),
                        row_idx: None,
                        column_names: Vec::new(),
                        executed: false,
                        available: false,
                        affected: 0,
                        last_insert_id: 0,
                        warnings: 0,
                        bind_index: 0,
                    }));
                }
                Err(e) if attempt == 0 && is_server_gone(&e) => {
                    warn!("server has gone away, reconnecting");
                    self.reconnect()?;
                }
                Err(e) => return Err(map_error(e, ErrorKind::PrepareFailed, query)),
            }
        }
        unreachable!()
    }

    fn execute(&self, query: &str) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let result = conn
            .query_iter(query)
            .map_err(|e| map_error(e, ErrorKind::ExecuteFailed, query))?;
        Ok(result.affected_rows() as usize)
    }

    fn begin(&self) -> Result<()> {
        self.execute("SET autocommit = 0").map(drop)
    }

    fn commit(&self) -> Result<()> {
        let committed = self.execute("COMMIT");
        let restored = self.execute("SET autocommit = 1");
        committed
            .map_err(|e| Error::new(ErrorKind::CommitFailed, e.message()))
            .and(restored)
            .map(drop)
    }

    fn rollback(&self) -> Result<()> {
        warn!("rolling back transaction");
        let rolled_back = self.execute("ROLLBACK");
        let restored = self.execute("SET autocommit = 1");
        rolled_back
            .map_err(|e| Error::new(ErrorKind::RollbackFailed, e.message()))
            .and(restored)
            .map(drop)
    }

    fn ping(&self) -> bool {
        self.conn.borrow_mut().ping().is_ok()
    }
}

pub struct MySqlStatement<'a> {
    conn: &'a MySqlConnection,
    stmt: mysql::Statement,
    query: String,
    params: Vec<Value>,
    rows: Vec<Row>,
    row_idx: Option<usize>,
    column_names: Vec<String>,
    executed: bool,
    available: bool,
    affected: usize,
    last_insert_id: i64,
    warnings: usize,
    bind_index: usize,
}

impl MySqlStatement<'_> {
    fn stage(&mut self, bind_index: usize, value: Value, is_defined: bool) -> Result<()> {
        if bind_index >= MAX_BOUND_PARAMS {
            return Err(Error::bad_bind_index(bind_index));
        }
        if self.params.len() <= bind_index {
            self.params.resize(bind_index + 1, Value::NULL);
        }
        self.params[bind_index] = if is_defined { value } else { Value::NULL };
        Ok(())
    }

    fn current_value(&self, column_index: usize) -> Option<&Value> {
        if !self.available {
            return None;
        }
        self.rows.get(self.row_idx?)?.as_ref(column_index)
    }

    fn value_to_text(value: &Value) -> Option<String> {
        match value {
            Value::NULL => None,
            Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Value::Int(v) => Some(v.to_string()),
            Value::UInt(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Date(year, month, day, hour, minute, second, _) => Some(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )),
            Value::Time(negative, days, hours, minutes, seconds, _) => {
                let sign = if *negative { "-" } else { "" };
                Some(format!(
                    "{sign}{:02}:{minutes:02}:{seconds:02}",
                    *days as u32 * 24 + *hours as u32
                ))
            }
        }
    }
}

impl DataStream for MySqlStatement<'_> {
    /// Binds the staged parameters, executes, and stores the whole
    /// result client-side.
    fn execute(&mut self) -> Result<usize> {
        self.executed = true;
        self.available = false;
        self.row_idx = None;
        self.rows.clear();

        let mut conn = self.conn.conn.borrow_mut();
        let params = if self.params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(self.params.clone())
        };
        let mut result = conn
            .exec_iter(&self.stmt, params)
            .map_err(|e| map_error(e, ErrorKind::ExecuteFailed, &self.query))?;
        self.affected = result.affected_rows() as usize;
        self.last_insert_id = result.last_insert_id().unwrap_or(0) as i64;
        self.warnings = result.warnings() as usize;

        for row in result.by_ref() {
            let row = row.map_err(|e| map_error(e, ErrorKind::GetFailed, &self.query))?;
            if self.column_names.is_empty() {
                self.column_names = row
                    .columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect();
            }
            self.rows.push(row);
        }
        Ok(self.affected)
    }

    fn next(&mut self) -> Result<bool> {
        if !self.executed {
            self.execute()?;
        }
        let next_idx = match self.row_idx {
            None => 0,
            Some(idx) => idx + 1,
        };
        if next_idx < self.rows.len() {
            self.row_idx = Some(next_idx);
            self.available = true;
        } else {
            self.available = false;
        }
        Ok(self.available)
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        self.params.clear();
        self.rows.clear();
        self.row_idx = None;
        self.executed = false;
        self.available = false;
        self.affected = 0;
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        matches!(self.current_value(column_index), None | Some(Value::NULL))
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

    fn get_text(&mut self, column_index: usize, default_value: &str) -> String {
        self.current_value(column_index)
            .and_then(Self::value_to_text)
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_blob(&mut self, column_index: usize) -> Vec<u8> {
        match self.current_value(column_index) {
            Some(Value::Bytes(bytes)) => bytes.clone(),
            Some(value) => Self::value_to_text(value)
                .map(String::into_bytes)
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn get_int(&mut self, column_index: usize, default_value: i32) -> i32 {
        self.get_int64(column_index, default_value as i64) as i32
    }

    fn get_int64(&mut self, column_index: usize, default_value: i64) -> i64 {
        match self.current_value(column_index) {
            Some(Value::Int(v)) => *v,
            Some(Value::UInt(v)) => *v as i64,
            Some(Value::Float(v)) => *v as i64,
            Some(Value::Double(v)) => *v as i64,
            Some(Value::Bytes(bytes)) => String::from_utf8_lossy(bytes)
                .trim()
                .parse()
                .unwrap_or(default_value),
            _ => default_value,
        }
    }

    fn get_float(&mut self, column_index: usize, default_value: f32) -> f32 {
        self.get_double(column_index, default_value as f64) as f32
    }

    fn get_double(&mut self, column_index: usize, default_value: f64) -> f64 {
        match self.current_value(column_index) {
            Some(Value::Int(v)) => *v as f64,
            Some(Value::UInt(v)) => *v as f64,
            Some(Value::Float(v)) => *v as f64,
            Some(Value::Double(v)) => *v,
            Some(Value::Bytes(bytes)) => String::from_utf8_lossy(bytes)
                .trim()
                .parse()
                .unwrap_or(default_value),
            _ => default_value,
        }
    }

    fn set_text(&mut self, column_index: usize, value: &str, is_defined: bool) -> Result<()> {
        self.stage(column_index, Value::Bytes(value.as_bytes().to_vec()), is_defined)
    }

    fn set_blob(&mut self, column_index: usize, data: &[u8], is_defined: bool) -> Result<()> {
        self.stage(column_index, Value::Bytes(data.to_vec()), is_defined)
    }

    fn set_int(&mut self, column_index: usize, value: i32, is_defined: bool) -> Result<()> {
        self.stage(column_index, Value::Int(value as i64), is_defined)
    }

    fn set_int64(&mut self, column_index: usize, value: i64, is_defined: bool) -> Result<()> {
        self.stage(column_index, Value::Int(value), is_defined)
    }

    fn set_float(&mut self, column_index: usize, value: f32, is_defined: bool) -> Result<()> {
        self.stage(column_index, Value::Float(value), is_defined)
    }

    fn set_double(&mut self, column_index: usize, value: f64, is_defined: bool) -> Result<()> {
        self.stage(column_index, Value::Double(value), is_defined)
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl SqlStatement for MySqlStatement<'_> {
    fn affected_rows(&self) -> usize {
        self.affected
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }

    fn num_warnings(&self) -> usize {
        self.warnings
    }

    fn results_available(&self) -> bool {
        self.available
    }

    fn query(&self) -> &str {
        &self.query
    }
}
