use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use unicode_normalization::UnicodeNormalization;

use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind, Result};
use crate::key::Key;
use crate::stream::DataStream;
use crate::table::{Table, TableMeta};
use crate::types::ColumnType;
use crate::util::lock_recover;

const READ_CHUNK: usize = 4096;
const CANDIDATE_DELIMITERS: [char; 3] = [',', ';', '\t'];

/// Splits one record into fields. A `"` toggles the in-quote state, a
/// backslash escapes the next character, carriage returns are dropped.
/// With no delimiter the whole record is a single field.
fn split_record(record: &str, delimiter: Option<char>) -> Vec<String> {
    if record.is_empty() {
        return Vec::new();
    }
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = record.chars();
    while let Some(c) = chars.next() {
        if c == '\r' {
            continue;
        }
        if !in_quote && c == '"' {
            in_quote = true;
        } else if in_quote {
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == '"' {
                in_quote = false;
            } else {
                current.push(c);
            }
        } else if Some(c) == delimiter {
            fields.push(current.clone());
            current.clear();
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

fn normalize_fields(fields: Vec<String>) -> Vec<String> {
    fields
        .into_iter()
        .map(|field| field.nfc().collect::<String>())
        .collect()
}

struct CsvFile {
    path: PathBuf,
    file: Option<File>,
    delimiter: Option<char>,
    header_row: Vec<String>,
    current_row: Vec<String>,
    input_buffer: Vec<u8>,
    row_offsets: Vec<u64>,
    next_row_idx: usize,
    // bytes consumed from the file so far; the unread tail sits in
    // input_buffer
    file_pos: u64,
    total_size: u64,
}

impl CsvFile {
    fn open(path: &Path, has_header: bool) -> Result<Self> {
        debug!("opening {}", path.display());
        let file = File::open(path)
            .map_err(|e| Error::new(ErrorKind::OpenFailed, format!("{}: {e}", path.display())))?;
        let total_size = file
            .metadata()
            .map_err(|e| Error::new(ErrorKind::OpenFailed, e.to_string()))?
            .len();

        let mut csv = Self {
            path: path.to_path_buf(),
            file: Some(file),
            delimiter: None,
            header_row: Vec::new(),
            current_row: Vec::new(),
            input_buffer: Vec::new(),
            row_offsets: Vec::new(),
            next_row_idx: 0,
            file_pos: 0,
            total_size,
        };

        let first = csv.read_record()?.unwrap_or_default();
        csv.detect_delimiter(&first);
        if has_header {
            csv.header_row = match csv.delimiter {
                Some(d) => normalize_fields(split_record(&first, Some(d))),
                None => vec!["Content".to_string()],
            };
        } else {
            // no header record: derive the column count from the first
            // record and rewind so it is served as row 0
            csv.header_row = match csv.delimiter {
                Some(d) => split_record(&first, Some(d))
                    .iter()
                    .map(|_| String::new())
                    .collect(),
                None => vec!["Content".to_string()],
            };
            csv.rewind_to(0)?;
        }
        Ok(csv)
    }

    fn detect_delimiter(&mut self, record: &str) {
        let mut best_fields = 0;
        for candidate in CANDIDATE_DELIMITERS {
            let fields = split_record(record, Some(candidate)).len();
            if fields > best_fields {
                best_fields = fields;
                self.delimiter = Some(candidate);
            }
        }
        if best_fields <= 1 {
            self.delimiter = None;
        }
        match self.delimiter {
            Some(d) => debug!("{}: delimiter = {:?}", self.path.display(), d),
            None => debug!("{}: no delimiter, single column", self.path.display()),
        }
    }

    fn rewind_to(&mut self, offset: u64) -> Result<()> {
        if let Some(file) = &mut self.file {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::new(ErrorKind::GetFailed, e.to_string()))?;
        }
        self.input_buffer.clear();
        self.file_pos = offset;
        Ok(())
    }

    /// Next complete record: the bytes up to an unquoted newline. A
    /// trailing piece without a newline does not form a record.
    fn read_record(&mut self) -> Result<Option<String>> {
        loop {
            let mut in_quote = false;
            let mut i = 0;
            while i < self.input_buffer.len() {
                let b = self.input_buffer[i];
                if !in_quote && b == b'"' {
                    in_quote = true;
                } else if b == b'\\' {
                    i += 1;
                } else if in_quote && b == b'"' {
                    in_quote = false;
                } else if !in_quote && b == b'\n' {
                    let raw: Vec<u8> = self.input_buffer.drain(..=i).collect();
                    let record = String::from_utf8(raw[..raw.len() - 1].to_vec()).map_err(|_| {
                        Error::new(
                            ErrorKind::GetFailed,
                            format!("{}: invalid UTF-8", self.path.display()),
                        )
                    })?;
                    return Ok(Some(record));
                }
                i += 1;
            }

            let Some(file) = &mut self.file else {
                return Ok(None);
            };
            let mut chunk = [0u8; READ_CHUNK];
            let n = file
                .read(&mut chunk)
                .map_err(|e| Error::new(ErrorKind::GetFailed, e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.file_pos += n as u64;
            self.input_buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn next_record(&mut self) -> Result<bool> {
        let row_offset = self.file_pos - self.input_buffer.len() as u64;
        let Some(record) = self.read_record()? else {
            return Ok(false);
        };
        self.current_row = normalize_fields(split_record(&record, self.delimiter));
        if self.next_row_idx == self.row_offsets.len() {
            self.row_offsets.push(row_offset);
        }
        self.next_row_idx += 1;
        Ok(true)
    }

    /// Positions on row `row` (0-based). Cached offsets are seeked
    /// directly; rows past the cache are reached by reading forward
    /// from the last known record start.
    fn seek_row(&mut self, row: usize) -> Result<bool> {
        if row + 1 == self.next_row_idx {
            return Ok(true);
        }
        if row < self.row_offsets.len() {
            let offset = self.row_offsets[row];
            self.next_row_idx = row;
            self.rewind_to(offset)?;
            return self.next_record();
        }
        let mut remaining = row;
        if !self.row_offsets.is_empty() {
            let last = self.row_offsets.len() - 1;
            self.next_row_idx = last;
            self.rewind_to(self.row_offsets[last])?;
            remaining -= last;
        }
        while remaining > 0 {
            if !self.next_record()? {
                return Ok(false);
            }
            remaining -= 1;
        }
        self.next_record()
    }

    fn current_row_index(&self) -> i64 {
        self.next_row_idx as i64 - 1
    }
}

/// Read-only table over a delimiter-separated text file. Rows are
/// identified by `(0, row)` with the row number counted from 0 after
/// the header record.
pub struct CsvTable {
    file: Arc<Mutex<CsvFile>>,
    meta: TableMeta,
}

impl CsvTable {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_header(path, true)
    }

    pub fn open_with_header(path: impl AsRef<Path>, has_header: bool) -> Result<Self> {
        let file = CsvFile::open(path.as_ref(), has_header)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            meta: TableMeta::new(vec![ColumnType::Int, ColumnType::Int]),
        })
    }

    pub fn total_size(&self) -> u64 {
        self.lock().total_size
    }

    fn lock(&self) -> MutexGuard<'_, CsvFile> {
        lock_recover(&self.file, "csv file")
    }

    fn cursor_at(&self, row: usize) -> Result<Option<Box<dyn Cursor>>> {
        if !self.lock().seek_row(row)? {
            return Ok(None);
        }
        Ok(Some(Box::new(CsvCursor {
            file: Arc::clone(&self.file),
            bind_index: 0,
        })))
    }
}

impl Table for CsvTable {
    fn meta(&self) -> &TableMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut TableMeta {
        &mut self.meta
    }

    fn num_fields(&self) -> usize {
        self.lock().header_row.len()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        if column_index < self.num_fields() {
            ColumnType::Text
        } else {
            ColumnType::Any
        }
    }

    fn column_name(&self, column_index: usize) -> String {
        self.lock()
            .header_row
            .get(column_index)
            .cloned()
            .unwrap_or_default()
    }

    fn add_column(&mut self, _name: &str, _type: ColumnType, _unique: bool, _decimals: u32) -> Result<()> {
        Err(Error::read_only("CSV"))
    }

    fn seek_begin(&self) -> Result<Option<Box<dyn Cursor>>> {
        self.cursor_at(0)
    }

    fn seek(&self, key: &Key) -> Result<Option<Box<dyn Cursor>>> {
        let component = if key.size() >= 2 { 1 } else { 0 };
        let row = key.get_int64(component);
        if row < 0 {
            return Ok(None);
        }
        self.cursor_at(row as usize)
    }

    fn insert(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("CSV"))
    }

    fn insert_auto(&self) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("CSV"))
    }

    fn increment(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("CSV"))
    }

    fn assign(&self, _columns: Vec<usize>) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("CSV"))
    }

    fn remove(&self, _key: &Key) -> Result<()> {
        Err(Error::read_only("CSV"))
    }

    fn clear(&self) -> Result<()> {
        Err(Error::read_only("CSV"))
    }

    fn open_row(&self, _key: &Key) -> Result<Box<dyn Cursor>> {
        Err(Error::read_only("CSV"))
    }
}

struct CsvCursor {
    file: Arc<Mutex<CsvFile>>,
    bind_index: usize,
}

impl CsvCursor {
    fn lock(&self) -> MutexGuard<'_, CsvFile> {
        lock_recover(&self.file, "csv file")
    }
}

impl DataStream for CsvCursor {
    fn execute(&mut self) -> Result<usize> {
        Err(Error::read_only("CSV"))
    }

    fn next(&mut self) -> Result<bool> {
        self.lock().next_record()
    }

    fn reset(&mut self) -> Result<()> {
        self.bind_index = 0;
        Ok(())
    }

    fn is_null(&self, column_index: usize) -> bool {
        column_index >= self.lock().current_row.len()
    }

    fn num_fields(&self) -> usize {
        self.lock().header_row.len()
    }

    fn column_name(&self, column_index: usize) -> String {
        self.lock()
            .header_row
            .get(column_index)
            .cloned()
            .unwrap_or_default()
    }

    fn get_text(&mut self, column_index: usize, default_value: &str) -> String {
        self.lock()
            .current_row
            .get(column_index)
            .cloned()
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_blob(&mut self, column_index: usize) -> Vec<u8> {
        // raw bytes of the text cell
        self.lock()
            .current_row
            .get(column_index)
            .map(|cell| cell.clone().into_bytes())
            .unwrap_or_default()
    }

    fn set_text(&mut self, _column_index: usize, _value: &str, _is_defined: bool) -> Result<()> {
        Err(Error::read_only("CSV"))
    }

    fn set_blob(&mut self, _column_index: usize, _data: &[u8], _is_defined: bool) -> Result<()> {
        Err(Error::read_only("CSV"))
    }

    fn next_bind_index(&mut self) -> usize {
        let index = self.bind_index;
        self.bind_index += 1;
        index
    }
}

impl Cursor for CsvCursor {
    fn row_key(&self) -> Key {
        let row = self.lock().current_row_index();
        if row < 0 {
            return Key::new();
        }
        Key::from_ints2(0, row)
    }

    fn update(&mut self, _key: &Key) -> Result<usize> {
        Err(Error::read_only("CSV"))
    }
}
