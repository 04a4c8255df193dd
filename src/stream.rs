use crate::error::Result;
use crate::key::Key;
use crate::types::ColumnType;

/// Base contract shared by cursors and SQL statements: a current row
/// with typed accessors, typed setters staging a pending write, and a
/// positional bind counter.
///
/// Getters never fail: NULL cells, out-of-range indices and values that
/// do not coerce all yield the caller's default. Setters validate their
/// index and report `BadColumnIndex` / `BadBindIndex`.
pub trait DataStream {
    /// Commit the pending write, or step the statement once. Returns
    /// the number of affected rows.
    fn execute(&mut self) -> Result<usize>;

    /// Advance to the next row; false at end of data.
    fn next(&mut self) -> Result<bool>;

    /// Clear the bind counter and any staged state so the stream can be
    /// rebound and re-executed.
    fn reset(&mut self) -> Result<()>;

    fn is_null(&self, column_index: usize) -> bool;

    fn num_fields(&self) -> usize;

    fn column_name(&self, _column_index: usize) -> String {
        String::new()
    }

    fn column_type(&self, column_index: usize) -> ColumnType {
        if column_index < self.num_fields() {
            ColumnType::Text
        } else {
            ColumnType::Any
        }
    }

    /// Text value of the column, or `default_value` when NULL or out of
    /// range.
    fn get_text(&mut self, column_index: usize, default_value: &str) -> String;

    /// Raw bytes of the column; empty when NULL.
    fn get_blob(&mut self, column_index: usize) -> Vec<u8>;

    fn get_bool(&mut self, column_index: usize, default_value: bool) -> bool {
        self.get_int(column_index, default_value as i32) != 0
    }

    fn get_int(&mut self, column_index: usize, default_value: i32) -> i32 {
        let s = self.get_text(column_index, "");
        if s.is_empty() {
            return default_value;
        }
        s.trim().parse().unwrap_or(default_value)
    }

    fn get_int64(&mut self, column_index: usize, default_value: i64) -> i64 {
        let s = self.get_text(column_index, "");
        if s.is_empty() {
            return default_value;
        }
        s.trim().parse().unwrap_or(default_value)
    }

    fn get_float(&mut self, column_index: usize, default_value: f32) -> f32 {
        let s = self.get_text(column_index, "");
        if s.is_empty() {
            return default_value;
        }
        s.trim().parse().unwrap_or(default_value)
    }

    fn get_double(&mut self, column_index: usize, default_value: f64) -> f64 {
        let s = self.get_text(column_index, "");
        if s.is_empty() {
            return default_value;
        }
        s.trim().parse().unwrap_or(default_value)
    }

    /// Decoded sample data for vector columns; empty elsewhere.
    fn get_vector(&mut self, _column_index: usize) -> Vec<f32> {
        Vec::new()
    }

    /// The column value as a key, coerced by the column type: `Any`
    /// tries integer then text, numeric types read an integer, the rest
    /// read text.
    fn get_key(&mut self, column_index: usize) -> Key {
        let column_type = self.column_type(column_index);
        if column_type == ColumnType::Any {
            let s = self.get_text(column_index, "");
            match s.parse::<i64>() {
                Ok(v) => Key::from_int(v),
                Err(_) => Key::from_text(s),
            }
        } else if column_type.is_numeric() {
            Key::from_int(self.get_int64(column_index, 0))
        } else {
            Key::from_text(self.get_text(column_index, ""))
        }
    }

    /// Stage a text value; `is_defined = false` writes NULL.
    fn set_text(&mut self, column_index: usize, value: &str, is_defined: bool) -> Result<()>;

    /// Stage raw bytes; `is_defined = false` writes NULL.
    fn set_blob(&mut self, column_index: usize, data: &[u8], is_defined: bool) -> Result<()>;

    fn set_int(&mut self, column_index: usize, value: i32, is_defined: bool) -> Result<()> {
        self.set_text(column_index, &value.to_string(), is_defined)
    }

    fn set_int64(&mut self, column_index: usize, value: i64, is_defined: bool) -> Result<()> {
        self.set_text(column_index, &value.to_string(), is_defined)
    }

    fn set_bool(&mut self, column_index: usize, value: bool, is_defined: bool) -> Result<()> {
        self.set_int(column_index, value as i32, is_defined)
    }

    fn set_float(&mut self, column_index: usize, value: f32, is_defined: bool) -> Result<()> {
        self.set_text(column_index, &value.to_string(), is_defined)
    }

    fn set_double(&mut self, column_index: usize, value: f64, is_defined: bool) -> Result<()> {
        self.set_text(column_index, &value.to_string(), is_defined)
    }

    fn set_null(&mut self, column_index: usize) -> Result<()> {
        self.set_int(column_index, 0, false)
    }

    /// Stage a key, decomposed by shape: empty writes NULL, a single
    /// component writes by that component's type, a composite key
    /// writes its `|`-joined serialization.
    fn set_key(&mut self, column_index: usize, key: &Key) -> Result<()> {
        if key.is_empty() {
            self.set_int(column_index, 0, false)
        } else if key.size() >= 2 {
            self.set_text(column_index, &key.serialize_to_text(), true)
        } else if key.get_type(0).is_numeric() {
            self.set_int64(column_index, key.get_int64(0), true)
        } else {
            self.set_text(column_index, key.get_text(0), true)
        }
    }

    /// Post-incrementing positional counter backing the `bind_*`
    /// convenience methods. Implementations reset it in [`reset`].
    ///
    /// [`reset`]: DataStream::reset
    fn next_bind_index(&mut self) -> usize;

    fn bind_text(&mut self, value: &str, is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_text(index, value, is_defined)
    }

    fn bind_blob(&mut self, data: &[u8], is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_blob(index, data, is_defined)
    }

    fn bind_int(&mut self, value: i32, is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_int(index, value, is_defined)
    }

    fn bind_int64(&mut self, value: i64, is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_int64(index, value, is_defined)
    }

    fn bind_bool(&mut self, value: bool, is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_bool(index, value, is_defined)
    }

    fn bind_float(&mut self, value: f32, is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_float(index, value, is_defined)
    }

    fn bind_double(&mut self, value: f64, is_defined: bool) -> Result<()> {
        let index = self.next_bind_index();
        self.set_double(index, value, is_defined)
    }

    fn bind_null(&mut self) -> Result<()> {
        let index = self.next_bind_index();
        self.set_int(index, 0, false)
    }

    fn bind_key(&mut self, key: &Key) -> Result<()> {
        let index = self.next_bind_index();
        self.set_key(index, key)
    }
}
