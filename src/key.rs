use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::types::ColumnType;

/// One element of a [`Key`]: either a signed 64-bit integer or a UTF-8
/// string. Integer components order before text components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyComponent {
    Int(i64),
    Text(String),
}

/// Structured row identity: an ordered sequence of components,
/// partitioned into column groups.
///
/// Equality, ordering and hashing depend on the components alone; the
/// grouping only affects [`Key::get_column`].
#[derive(Debug, Clone, Default)]
pub struct Key {
    components: Vec<KeyComponent>,
    group_sizes: Vec<usize>,
}

const HASH_SEED: u64 = 0x9e37_79b9;

fn combine(h: u64, v: u64) -> u64 {
    h ^ v
        .wrapping_add(HASH_SEED)
        .wrapping_add(h << 6)
        .wrapping_add(h >> 2)
}

fn component_hash(c: &KeyComponent) -> u64 {
    match c {
        KeyComponent::Int(v) => *v as u64,
        KeyComponent::Text(s) => s.bytes().fold(0u64, |h, b| combine(h, b as u64)),
    }
}

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_int(value: i64) -> Self {
        let mut key = Self::new();
        key.add_int(value);
        key
    }

    pub fn from_text(value: impl Into<String>) -> Self {
        let mut key = Self::new();
        key.add_text(value);
        key
    }

    /// An integer component followed by all of `rest`'s components as a
    /// new group.
    pub fn with_prefix(value: i64, rest: &Key) -> Self {
        let mut key = Self::from_int(value);
        if !rest.is_empty() {
            key.start_column();
            for c in &rest.components {
                key.push(c.clone());
            }
        }
        key
    }

    /// Concatenates the given keys, each contributing its components as
    /// one column group. Empty keys are skipped.
    pub fn concat(keys: &[&Key]) -> Self {
        let mut key = Self::new();
        for k in keys {
            if k.is_empty() {
                continue;
            }
            if !key.is_empty() {
                key.start_column();
            }
            for c in &k.components {
                key.push(c.clone());
            }
        }
        key
    }

    pub fn from_ints2(a: i64, b: i64) -> Self {
        let mut key = Self::from_int(a);
        key.add_int(b);
        key
    }

    pub fn from_ints4(a: i64, b: i64, c: i64, d: i64) -> Self {
        let mut key = Self::from_ints2(a, b);
        key.add_int(c);
        key.add_int(d);
        key
    }

    /// Parses the `|`-joined serialization produced by
    /// [`Key::serialize_to_text`]. Each piece becomes an integer
    /// component when it parses as a signed decimal, a text component
    /// otherwise.
    pub fn parse_text(serialized: &str) -> Self {
        let mut key = Self::new();
        if serialized.is_empty() {
            return key;
        }
        for piece in serialized.split('|') {
            match piece.parse::<i64>() {
                Ok(v) => key.add_int(v),
                Err(_) => key.add_text(piece),
            };
        }
        key
    }

    fn push(&mut self, component: KeyComponent) {
        if self.group_sizes.is_empty() {
            self.group_sizes.push(0);
        }
        *self.group_sizes.last_mut().unwrap() += 1;
        self.components.push(component);
    }

    /// Appends an integer component to the current column group.
    pub fn add_int(&mut self, value: i64) -> &mut Self {
        self.push(KeyComponent::Int(value));
        self
    }

    /// Appends a text component to the current column group.
    pub fn add_text(&mut self, value: impl Into<String>) -> &mut Self {
        self.push(KeyComponent::Text(value.into()));
        self
    }

    /// Opens a new column group; subsequent components land in it.
    pub fn start_column(&mut self) -> &mut Self {
        self.group_sizes.push(0);
        self
    }

    pub fn size(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn clear(&mut self) {
        self.components.clear();
        self.group_sizes.clear();
    }

    /// Truncates to the first `n` components.
    pub fn resize(&mut self, n: usize) {
        while self.components.len() > n {
            self.pop_back();
        }
    }

    /// Drops the first component.
    pub fn shift(&mut self) {
        if self.components.is_empty() {
            return;
        }
        self.components.remove(0);
        if let Some(first) = self.group_sizes.first_mut() {
            *first -= 1;
            if *first == 0 {
                self.group_sizes.remove(0);
            }
        }
    }

    /// Prepends an integer component to the first column group.
    pub fn unshift(&mut self, value: i64) {
        self.components.insert(0, KeyComponent::Int(value));
        if self.group_sizes.is_empty() {
            self.group_sizes.push(1);
        } else {
            self.group_sizes[0] += 1;
        }
    }

    pub fn pop_back(&mut self) {
        if self.components.pop().is_none() {
            return;
        }
        if let Some(last) = self.group_sizes.last_mut() {
            *last -= 1;
            if *last == 0 {
                self.group_sizes.pop();
            }
        }
    }

    pub fn component(&self, index: usize) -> Option<&KeyComponent> {
        self.components.get(index)
    }

    /// The declared type of component `index`: `Int64` for integers,
    /// `Varchar` for text, `Any` out of range.
    pub fn get_type(&self, index: usize) -> ColumnType {
        match self.components.get(index) {
            Some(KeyComponent::Int(_)) => ColumnType::Int64,
            Some(KeyComponent::Text(_)) => ColumnType::Varchar,
            None => ColumnType::Any,
        }
    }

    /// Integer value of component `index`. Text components are parsed
    /// as signed decimal; parse failure and out-of-range yield 0.
    pub fn get_int64(&self, index: usize) -> i64 {
        match self.components.get(index) {
            Some(KeyComponent::Int(v)) => *v,
            Some(KeyComponent::Text(s)) => s.parse().unwrap_or(0),
            None => 0,
        }
    }

    /// Text value of component `index`; empty for integer components
    /// and out-of-range.
    pub fn get_text(&self, index: usize) -> &str {
        match self.components.get(index) {
            Some(KeyComponent::Text(s)) => s,
            _ => "",
        }
    }

    pub fn num_columns(&self) -> usize {
        self.group_sizes.len()
    }

    /// The components of column group `column` as a new key.
    pub fn get_column(&self, column: usize) -> Key {
        let mut start = 0;
        for (i, n) in self.group_sizes.iter().enumerate() {
            if i == column {
                let mut key = Key::new();
                for c in &self.components[start..start + n] {
                    key.push(c.clone());
                }
                return key;
            }
            start += n;
        }
        Key::new()
    }

    /// Components `[from, from + n)` as a new single-group key.
    pub fn get_sub_key(&self, from: usize, n: usize) -> Key {
        let mut key = Key::new();
        let end = (from + n).min(self.components.len());
        if from < end {
            for c in &self.components[from..end] {
                key.push(c.clone());
            }
        }
        key
    }

    /// The key without its last component, when it has at least two.
    pub fn get_parent_key(&self) -> Key {
        let mut key = self.clone();
        if key.size() >= 2 {
            key.pop_back();
        }
        key
    }

    /// Canonical textual form: components joined by `|`, integers as
    /// decimal, text as-is.
    pub fn serialize_to_text(&self) -> String {
        let mut out = String::new();
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            match c {
                KeyComponent::Int(v) => out.push_str(&v.to_string()),
                KeyComponent::Text(s) => out.push_str(s),
            }
        }
        out
    }

    /// Folds per-component hashes with a splitmix-style combine. Equal
    /// keys hash equal.
    pub fn hash_value(&self) -> u64 {
        self.components
            .iter()
            .fold(0u64, |h, c| combine(h, component_hash(c)))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_value());
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize_to_text())
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::from_int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::from_text(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::from_text(value)
    }
}
