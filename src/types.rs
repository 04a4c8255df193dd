/// Cell types understood by every backend.
///
/// Backends that have no native type system (CSV) report `Text` for all
/// columns; `Any` is the out-of-range / unknown answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Undef,
    Any,
    Int,
    Int64,
    Char,
    Bool,
    Varchar,
    Text,
    Datetime,
    Date,
    Float,
    Double,
    Url,
    TextKey,
    BinaryKey,
    Enum,
    Blob,
    Vector,
}

impl ColumnType {
    /// True for the types whose cells are stored and merged as numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Int
                | ColumnType::Int64
                | ColumnType::Bool
                | ColumnType::Datetime
                | ColumnType::Date
                | ColumnType::Float
                | ColumnType::Double
        )
    }
}
