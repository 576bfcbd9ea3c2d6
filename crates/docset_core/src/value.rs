//! Typed values held by working-set items.

use crate::types::{PendingId, RowId};
use docset_storage::Datum;
use std::cmp::Ordering;

/// A value of a document or sub-document column.
///
/// Unlike the storage [`Datum`], a value can hold a [`RowId`] that still
/// points at a pending row of the same working set.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
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
    /// Raw bytes. In a blob column this is a payload not yet stored.
    Bytes(Vec<u8>),
    /// Row reference.
    Id(RowId),
}

impl Value {
    /// Checks if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer, if this is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the row reference, if this is one.
    #[must_use]
    pub fn as_id(&self) -> Option<RowId> {
        match self {
            Value::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the pending token referenced by this value, if any.
    #[must_use]
    pub fn pending(&self) -> Option<PendingId> {
        self.as_id().and_then(RowId::pending)
    }

    /// Converts to a storage cell.
    ///
    /// # Errors
    ///
    /// Returns the pending token if the value still references an unwritten
    /// row.
    pub fn to_datum(&self) -> Result<Datum, PendingId> {
        Ok(match self {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(*b),
            Value::Int(n) => Datum::Int(*n),
            Value::Float(x) => Datum::Float(*x),
            Value::Text(s) => Datum::Text(s.clone()),
            Value::Bytes(b) => Datum::Bytes(b.clone()),
            Value::Id(RowId::Persisted(id)) => Datum::Int(*id),
            Value::Id(RowId::Pending(p)) => return Err(*p),
        })
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Id(_) => "id",
        }
    }

    /// Total order used for sorting rows by an ordering specification.
    ///
    /// Nulls sort first; values of different kinds sort by kind.
    #[must_use]
    pub fn cmp_for_order(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Id(a), Value::Id(b)) => match (a, b) {
                (RowId::Persisted(x), RowId::Persisted(y)) => x.cmp(y),
                (RowId::Pending(x), RowId::Pending(y)) => x.cmp(y),
                (RowId::Persisted(_), RowId::Pending(_)) => Ordering::Less,
                (RowId::Pending(_), RowId::Persisted(_)) => Ordering::Greater,
            },
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
            Value::Id(_) => 5,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<RowId> for Value {
    fn from(value: RowId) -> Self {
        Value::Id(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
