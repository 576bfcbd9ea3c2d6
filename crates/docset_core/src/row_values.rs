//! Uniform access to the values of a row.
//!
//! Permission filters, lifecycle hooks and callers read values through
//! [`RowValues`] whether the row is a working-set item, a group of items or
//! a plain value vector decoded from storage.

use crate::error::CoreResult;
use crate::schema::TableDef;
use crate::value::Value;
use docset_storage::Row;

static NULL: Value = Value::Null;

/// Read access to a row's values.
pub trait RowValues {
    /// Declaration of the row's table.
    fn table(&self) -> &TableDef;

    /// Value of a column by index. Out-of-range indices read as null.
    ///
    /// For a group whose rows disagree this is the first row's value.
    fn value(&self, column: usize) -> &Value;

    /// Whether the rows behind this accessor disagree on a column.
    fn is_grayed(&self, _column: usize) -> bool {
        false
    }

    /// Whether the values may not be modified.
    fn is_read_only(&self) -> bool;

    /// Value of a column by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist.
    fn get(&self, name: &str) -> CoreResult<&Value> {
        let column = self.table().require_column(name)?;
        Ok(self.value(column))
    }

    /// Whether a column is null.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist.
    fn is_null(&self, name: &str) -> CoreResult<bool> {
        Ok(self.get(name)?.is_null())
    }

    /// Whether a column is grayed, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist.
    fn is_grayed_by_name(&self, name: &str) -> CoreResult<bool> {
        Ok(self.is_grayed(self.table().require_column(name)?))
    }
}

/// Write access to a row's values.
pub trait RowValuesMut: RowValues {
    /// Sets a column by index, checking the value against the column type.
    ///
    /// # Errors
    ///
    /// Returns an error for a read-only row, an unknown column or a value
    /// of the wrong type.
    fn set_value(&mut self, column: usize, value: Value) -> CoreResult<()>;

    /// Sets a column by name.
    ///
    /// # Errors
    ///
    /// See [`RowValuesMut::set_value`].
    fn set(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()>
    where
        Self: Sized,
    {
        let column = self.table().require_column(name)?;
        self.set_value(column, value.into())
    }
}

/// Read-only values held in a plain vector.
#[derive(Debug, Clone)]
pub struct ValueArray<'a> {
    table: &'a TableDef,
    values: Vec<Value>,
}

impl<'a> ValueArray<'a> {
    /// Wraps a value vector.
    #[must_use]
    pub fn new(table: &'a TableDef, values: Vec<Value>) -> Self {
        Self { table, values }
    }

    /// Decodes a stored row.
    #[must_use]
    pub fn from_row(table: &'a TableDef, row: &Row) -> Self {
        Self::new(table, decode_row(table, row))
    }

    /// Returns the values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the accessor, returning the values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl RowValues for ValueArray<'_> {
    fn table(&self) -> &TableDef {
        self.table
    }

    fn value(&self, column: usize) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Decodes a stored row into a value vector in column order.
#[must_use]
pub fn decode_row(table: &TableDef, row: &Row) -> Vec<Value> {
    table
        .columns()
        .iter()
        .map(|c| c.decode(row.get(&c.name)))
        .collect()
}

/// Value of a slice position, reading missing positions as null.
pub(crate) fn value_at(values: &[Value], column: usize) -> &Value {
    values.get(column).unwrap_or(&NULL)
}
