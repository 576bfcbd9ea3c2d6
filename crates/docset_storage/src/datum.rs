//! Cell values, rows, filters and table declarations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a physical table.
///
/// Table IDs are assigned by the store when a table is first created and
/// never change afterwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TableId(pub u32);

impl TableId {
    /// Creates a new table ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// A single stored cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Datum {
    /// Absent value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

static NULL: Datum = Datum::Null;

impl Datum {
    /// Checks if this datum is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Returns the integer, if this is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Datum::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Datum::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<bool> for Datum {
    fn from(value: bool) -> Self {
        Datum::Bool(value)
    }
}

impl From<i64> for Datum {
    fn from(value: i64) -> Self {
        Datum::Int(value)
    }
}

impl From<f64> for Datum {
    fn from(value: f64) -> Self {
        Datum::Float(value)
    }
}

impl From<&str> for Datum {
    fn from(value: &str) -> Self {
        Datum::Text(value.to_string())
    }
}

impl From<String> for Datum {
    fn from(value: String) -> Self {
        Datum::Text(value)
    }
}

impl From<Vec<u8>> for Datum {
    fn from(value: Vec<u8>) -> Self {
        Datum::Bytes(value)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(value: Option<T>) -> Self {
        value.map_or(Datum::Null, Into::into)
    }
}

/// A stored row: column name to cell.
///
/// Columns that were never written read back as [`Datum::Null`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row(BTreeMap<String, Datum>);

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cell for `column`, or null if it was never set.
    #[must_use]
    pub fn get(&self, column: &str) -> &Datum {
        self.0.get(column).unwrap_or(&NULL)
    }

    /// Sets a cell.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Datum>) {
        self.0.insert(column.into(), value.into());
    }

    /// Builder-style [`Row::set`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Datum>) -> Self {
        self.set(column, value);
        self
    }

    /// Iterates over the populated cells in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Datum)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copies every cell of `other` over this row.
    pub fn merge(&mut self, other: Row) {
        self.0.extend(other.0);
    }

    /// Returns the number of populated cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks if no cell is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A row predicate for `select_where` queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    /// Column equals the datum.
    Eq(String, Datum),
    /// Column equals one of the datums.
    In(String, Vec<Datum>),
    /// All sub-filters match.
    And(Vec<Filter>),
}

impl Filter {
    /// Shorthand for [`Filter::Eq`].
    pub fn eq(column: impl Into<String>, value: impl Into<Datum>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    /// Evaluates the filter against a row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(column, value) => row.get(column) == value,
            Filter::In(column, values) => values.contains(row.get(column)),
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }
}

/// Declaration of a physical table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSpec {
    /// Table name, unique within a store.
    pub name: String,
    /// Column names. The row identifier column is implicit.
    pub columns: Vec<String>,
}

impl TableSpec {
    /// Creates a table declaration without columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }
}
