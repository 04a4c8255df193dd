//! Embeddable data access over one tabular abstraction: a [`Table`] of
//! rows identified by a structured [`Key`], served by interchangeable
//! backends — SQLite and MySQL connections, read-only CSV, dBASE and
//! audio files, and a thread-safe in-memory table.
//!
//! All backends share the [`DataStream`]/[`Cursor`] contract for
//! iteration, mutation and column introspection, so callers can swap
//! storage without code changes and copy rows between backends with
//! [`Table::append`].

pub mod audio;
pub mod changelog;
pub mod csv;
pub mod cursor;
pub mod dbase;
pub mod error;
pub mod key;
pub mod memory;
pub mod sql;
pub mod stream;
pub mod table;
pub mod types;

mod util;

pub use audio::AudioTable;
pub use changelog::{ChangeLog, Event};
pub use csv::CsvTable;
pub use cursor::Cursor;
pub use dbase::DbaseTable;
pub use error::{Error, ErrorKind, Result};
pub use key::{Key, KeyComponent};
pub use memory::MemoryTable;
pub use sql::mysql::{ConnectionInfo, MySqlConnection};
pub use sql::sqlite::SqliteConnection;
pub use sql::sqlite_table::SqliteTable;
pub use sql::{Connection, SqlStatement};
pub use stream::DataStream;
pub use table::{Column, SortOrder, Table, TableMeta};
pub use types::ColumnType;
