//! Working-set items and their value accessors.

use crate::error::{CoreError, CoreResult};
use crate::row_values::{value_at, RowValues, RowValuesMut};
use crate::schema::TableDef;
use crate::types::{DocState, RowId};
use crate::value::Value;

/// A document held by a working set.
#[derive(Debug, Clone)]
pub(crate) struct DocItem {
    pub(crate) id: RowId,
    pub(crate) state: DocState,
    pub(crate) values: Vec<Value>,
    /// Values as stored when the item was loaded.
    pub(crate) original: Option<Vec<Value>>,
    /// Stored version when loaded.
    pub(crate) version: Option<u64>,
    /// Fingerprint of the stored row when loaded.
    pub(crate) fingerprint: Option<[u8; 32]>,
    /// Stored deletion flag when loaded.
    pub(crate) soft_deleted: bool,
    /// One collection per sub-document type.
    pub(crate) subs: Vec<SubSet>,
}

impl DocItem {
    pub(crate) fn new_insert(id: RowId, values: Vec<Value>, sub_types: usize) -> Self {
        Self {
            id,
            state: DocState::Insert,
            values,
            original: None,
            version: None,
            fingerprint: None,
            soft_deleted: false,
            subs: vec![SubSet::default(); sub_types],
        }
    }

    /// Whether applying the item restores a soft-deleted document.
    pub(crate) fn is_restore(&self) -> bool {
        self.state == DocState::Edit && self.soft_deleted
    }

    /// Whether the item or any of its sub-documents differ from storage.
    pub(crate) fn is_changed(&self) -> bool {
        self.original.as_ref() != Some(&self.values)
            || self.subs.iter().any(SubSet::is_changed)
    }
}

/// Sub-document rows of one type under one document.
#[derive(Debug, Clone, Default)]
pub(crate) struct SubSet {
    pub(crate) rows: Vec<SubItem>,
    /// Persisted rows removed from the document.
    pub(crate) removed: Vec<i64>,
}

impl SubSet {
    fn is_changed(&self) -> bool {
        !self.removed.is_empty() || self.rows.iter().any(SubItem::is_changed)
    }

    pub(crate) fn position(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|r| r.id == id)
    }
}

/// A sub-document row.
#[derive(Debug, Clone)]
pub(crate) struct SubItem {
    pub(crate) id: RowId,
    pub(crate) values: Vec<Value>,
    /// Values as stored, `None` for new rows.
    pub(crate) original: Option<Vec<Value>>,
}

impl SubItem {
    pub(crate) fn is_changed(&self) -> bool {
        self.original.as_ref() != Some(&self.values)
    }
}

/// Read access to one working-set row.
#[derive(Debug, Clone, Copy)]
pub struct ItemValues<'a> {
    table: &'a TableDef,
    values: &'a [Value],
    read_only: bool,
}

impl<'a> ItemValues<'a> {
    pub(crate) fn new(table: &'a TableDef, values: &'a [Value], read_only: bool) -> Self {
        Self {
            table,
            values,
            read_only,
        }
    }

    /// Returns all values in column order.
    #[must_use]
    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

impl RowValues for ItemValues<'_> {
    fn table(&self) -> &TableDef {
        self.table
    }

    fn value(&self, column: usize) -> &Value {
        value_at(self.values, column)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Write access to one working-set row in Insert or Edit state.
#[derive(Debug)]
pub struct ItemValuesMut<'a> {
    table: &'a TableDef,
    values: &'a mut Vec<Value>,
}

impl<'a> ItemValuesMut<'a> {
    pub(crate) fn new(table: &'a TableDef, values: &'a mut Vec<Value>) -> Self {
        Self { table, values }
    }

    /// Returns all values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        self.values
    }
}

impl RowValues for ItemValuesMut<'_> {
    fn table(&self) -> &TableDef {
        self.table
    }

    fn value(&self, column: usize) -> &Value {
        value_at(self.values, column)
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

impl RowValuesMut for ItemValuesMut<'_> {
    fn set_value(&mut self, column: usize, value: Value) -> CoreResult<()> {
        let value = checked(self.table, column, value)?;
        self.values[column] = value;
        Ok(())
    }
}

/// Checks a value against a column by index.
pub(crate) fn checked(table: &TableDef, column: usize, value: Value) -> CoreResult<Value> {
    let declared = table.columns().get(column).ok_or_else(|| {
        CoreError::invalid_request(format!("column {column} out of range in {}", table.name()))
    })?;
    declared.check_value(value)
}
