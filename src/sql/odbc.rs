use log::debug;
use odbc_api::parameter::InputParameter;
use odbc_api::{Cursor as OdbcRowCursor, IntoParameter, ResultSetMetadata};

use crate::error::{Error, ErrorKind, Result};
use crate::sql::{Connection, SqlStatement};
use crate::stream::DataStream;

fn map_error(e: odbc_api::Error, kind: ErrorKind, query: &str) -> Error {
    Error::with_query(kind, e.to_string(), query)
}

/// Connection through an ODBC driver manager. Values travel in text
/// mode in both directions, which keeps the driver surface small; the
/// typed accessors coerce from text like the file backends do.
pub struct OdbcConnection {
    conn: odbc_api::Connection<'static>,
}

impl OdbcConnection {
    /// Connects with a full ODBC connection string
    /// (`DSN=...;UID=...;PWD=...`).
    pub fn connect(connection_string: &str) -> Result<Self> {
        let env = odbc_api::environment()
            .map_err(|e| Error::new(ErrorKind::InitFailed, e.to_string()))?;
        let conn = env
            .connect_with_connection_string(
                connection_string,
                odbc_api::ConnectionOptions::default(),
            )
            .map_err(|e| Error::new(ErrorKind::ConnectionFailed, e.to_string()))?;
        debug!("connected through ODBC");
        Ok(Self { conn })
    }
}

impl Connection for OdbcConnection {
    fn prepare<'a>(&'a self, query: &str) -> Result<Box<dyn SqlStatement + 'a>> {
        let prepared = self
            .conn
            .prepare(query)
            .map_err(|e| map_error(e, ErrorKind::PrepareFailed, query))?;
        Ok(Box::new(OdbcStatement {
            prepared,
            query: query.to_string(),
            params: Vec::new(),
            column_names: Vec::new(),
            rows: Vec::new(),
            row_idx: None,
            executed: false,
            available: false,
            affected: 0,
            bind_index: 0,
        }))
    }

    fn begin(&self) -> Result<()> {
        self.conn
            .set_autocommit(false)
            .map_err(|e| Error::new(ErrorKind::ExecuteFailed, e.to_string()))
    }

    fn commit(&self) -> Result<()> {
        let committed = self
            .conn
            .commit()
            .map_err(|e| Error::new(ErrorKind::CommitFailed, e.to_string()));
        let _ = self.conn.set_autocommit(true);
        committed
    }

    fn rollback(&self) -> Result<()> {
        let rolled_back = self
            .conn
            .rollback()
            .map_err(|e| Error::new(ErrorKind::RollbackFailed, e.to_string()));
        let _ = self.conn.set_autocommit(true);
        rolled_back
    }
}

pub struct OdbcStatement<'conn> {
    prepared: odbc_api::Prepared<odbc_api::handles::StatementImpl<'conn>>,
    query: String,
    params: Vec<Option<String>>,
    column_names: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    row_idx: Option<usize>,
    executed: bool,
    available: bool,
    affected: usize,
    bind_index: usize,
}

impl OdbcStatement<'_> {
    fn current_value(&self, column_index: usize) -> Option<&str> {
        if !self.available {
            return None;
        }
        self.rows
            .get(self.row_idx?)?
            .get(column_index)?
            .as_deref()
    }

    fn stage(&mut self, bind_index: usize, value: Option<String>) -> Result<()> {
        if self.params.len() <= bind_index {
            self.params.resize(bind_index + 1, None);
        }
        self.params[bind_index] = value;
        Ok(())
    }
}

impl DataStream for OdbcStatement<'_> {
    fn execute(&mut self) -> Result<usize> {
        self.executed = true;
        self.available = false;
        self.row_idx = None;
        self.rows.clear();

        let params: Vec<Box<dyn InputParameter>> = self
            .params
            .iter()
            .map(|p| Box::new(p.clone().into_parameter()) as Box<dyn InputParameter>)
            .collect();

        let cursor = self
            .prepared
            .execute(&params[..])
            .map_err(|e| map_error(e, ErrorKind::ExecuteFailed, &self.query))?;
        if let Some(mut cursor) = cursor {
            let num_cols = cursor
                .num_result_cols()
                .map_err(|e| map_error(e.into(), ErrorKind::GetFailed, &self.query))?
                as u16;
            if self.column_names.is_empty() {
                for i in 1..=num_cols {
                    let name = cursor
                        .col_name(i)
                        .map_err(|e| map_error(e.into(), ErrorKind::GetFailed, &self.query))?;
                    self.column_names.push(name);
                }
            }
            while let Some(mut row) = cursor
                .next_row()
                .map_err(|e| map_error(e, ErrorKind::GetFailed, &self.query))?
            {
                let mut cells = Vec::with_capacity(num_cols as usize);
                for i in 1..=num_cols {
                    let mut buf = Vec::new();
                    let defined = row
                        .get_text(i, &mut buf)
                        .map_err(|e| map_error(e, ErrorKind::GetFailed, &self.query))?;
                    if defined {
                        cells.push(Some(String::from_utf8_lossy(&buf).into_owned()));
                    } else {
                        cells.push(None);
                    }
                }
                self.rows.push(cells);
            }
        }
        // SQLRowCount is not surfaced uniformly across drivers in text
        // mode; report materialized rows for result sets.
        self.affected = self.rows.len();
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
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        self.current_value(column_index).is_none()
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
            .map(str::to_string)
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_blob(&mut self, column_index: usize) -> Vec<u8> {
        self.current_value(column_index)
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default()
    }

    fn set_text(&mut self, column_index: usize, value: &str, is_defined: bool) -> Result<()> {
        self.stage(
            column_index,
            if is_defined {
                Some(value.to_string())
            } else {
                None
            },
        )
    }

    fn set_blob(&mut self, column_index: usize, data: &[u8], is_defined: bool) -> Result<()> {
        self.stage(
            column_index,
            if is_defined {
                Some(String::from_utf8_lossy(data).into_owned())
            } else {
                None
            },
        )
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl SqlStatement for OdbcStatement<'_> {
    fn affected_rows(&self) -> usize {
        self.affected
    }

    fn results_available(&self) -> bool {
        self.available
    }

    fn query(&self) -> &str {
        &self.query
    }
}
