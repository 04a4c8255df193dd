use std::fmt;

/// Closed set of error conditions reported by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InitFailed,
    ConnectionFailed,
    OpenFailed,
    PrepareFailed,
    ExecuteFailed,
    BindFailed,
    QueryTimedOut,
    DatabaseError,
    DatabaseMisuse,
    SchemaChanged,
    BadBindIndex,
    BadColumnIndex,
    GetFailed,
    CommitFailed,
    RollbackFailed,
    ConstraintViolation,
    Mismatch,
    ReadOnly,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InitFailed => "Init failed",
            ErrorKind::ConnectionFailed => "Connection failed",
            ErrorKind::OpenFailed => "Open failed",
            ErrorKind::PrepareFailed => "Prepare failed",
            ErrorKind::ExecuteFailed => "Execute failed",
            ErrorKind::BindFailed => "Bind failed",
            ErrorKind::QueryTimedOut => "Query timed out",
            ErrorKind::DatabaseError => "Database error",
            ErrorKind::DatabaseMisuse => "Database misuse",
            ErrorKind::SchemaChanged => "Schema changed",
            ErrorKind::BadBindIndex => "Bad bind index",
            ErrorKind::BadColumnIndex => "Bad column index",
            ErrorKind::GetFailed => "Get failed",
            ErrorKind::CommitFailed => "Commit failed",
            ErrorKind::RollbackFailed => "Rollback failed",
            ErrorKind::ConstraintViolation => "Constraint violation",
            ErrorKind::Mismatch => "Type mismatch",
            ErrorKind::ReadOnly => "Read-only",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library error: a kind, the backend message, and the offending SQL
/// text when one was involved.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    query: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            query: None,
        }
    }

    pub fn with_query(kind: ErrorKind, message: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            query: Some(query.into()),
        }
    }

    /// The error every mutating operation of a read-only backend returns.
    pub fn read_only(backend: &str) -> Self {
        Self::new(ErrorKind::ReadOnly, format!("{backend} is read-only"))
    }

    pub fn bad_column_index(column_index: usize) -> Self {
        Self::new(
            ErrorKind::BadColumnIndex,
            format!("no column at index {column_index}"),
        )
    }

    pub fn bad_bind_index(bind_index: usize) -> Self {
        Self::new(
            ErrorKind::BadBindIndex,
            format!("no parameter at index {bind_index}"),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
