//! Grouped access over several documents of one type.
//!
//! A group exposes every column as one value. Where the documents disagree
//! the column is grayed: reading it yields the first document's value and
//! writing it overwrites the column in every document of the group.

use super::item::checked;
use crate::error::CoreResult;
use crate::row_values::{value_at, RowValues, RowValuesMut};
use crate::schema::TableDef;
use crate::value::Value;

/// Read access to a group of documents.
#[derive(Debug, Clone)]
pub struct DocGroup<'a> {
    table: &'a TableDef,
    rows: Vec<&'a [Value]>,
    read_only: bool,
}

impl<'a> DocGroup<'a> {
    pub(crate) fn new(table: &'a TableDef, rows: Vec<&'a [Value]>, read_only: bool) -> Self {
        Self {
            table,
            rows,
            read_only,
        }
    }

    /// Number of documents in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Checks if the group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn grayed<'v>(mut rows: impl Iterator<Item = &'v Value>) -> bool {
    match rows.next() {
        Some(first) => rows.any(|v| v != first),
        None => false,
    }
}

impl RowValues for DocGroup<'_> {
    fn table(&self) -> &TableDef {
        self.table
    }

    fn value(&self, column: usize) -> &Value {
        match self.rows.first() {
            Some(first) => value_at(first, column),
            None => value_at(&[], column),
        }
    }

    fn is_grayed(&self, column: usize) -> bool {
        grayed(self.rows.iter().map(|r| value_at(r, column)))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Write access to a group of documents in Insert or Edit state.
#[derive(Debug)]
pub struct DocGroupMut<'a> {
    table: &'a TableDef,
    rows: Vec<&'a mut Vec<Value>>,
}

impl<'a> DocGroupMut<'a> {
    pub(crate) fn new(table: &'a TableDef, rows: Vec<&'a mut Vec<Value>>) -> Self {
        Self { table, rows }
    }

    /// Number of documents in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Checks if the group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowValues for DocGroupMut<'_> {
    fn table(&self) -> &TableDef {
        self.table
    }

    fn value(&self, column: usize) -> &Value {
        match self.rows.first() {
            Some(first) => value_at(first, column),
            None => value_at(&[], column),
        }
    }

    fn is_grayed(&self, column: usize) -> bool {
        grayed(self.rows.iter().map(|r| value_at(r, column)))
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

impl RowValuesMut for DocGroupMut<'_> {
    fn set_value(&mut self, column: usize, value: Value) -> CoreResult<()> {
        let value = checked(self.table, column, value)?;
        for row in &mut self.rows {
            row[column] = value.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn table() -> TableDef {
        TableDef::new("Doc")
            .column(Column::text("x", 10))
            .column(Column::text("y", 10))
    }

    #[test]
    fn differing_column_is_grayed() {
        let table = table();
        let a = vec![Value::from("1"), Value::from("same")];
        let b = vec![Value::from("2"), Value::from("same")];
        let group = DocGroup::new(&table, vec![a.as_slice(), b.as_slice()], true);
        assert!(group.is_grayed_by_name("x").unwrap());
        assert!(!group.is_grayed_by_name("y").unwrap());
        assert_eq!(group.get("x").unwrap(), &Value::from("1"));
        assert_eq!(group.get("y").unwrap(), &Value::from("same"));
    }

    #[test]
    fn writing_grayed_column_sets_every_row() {
        let table = table();
        let mut a = vec![Value::from("1"), Value::Null];
        let mut b = vec![Value::from("2"), Value::Null];
        {
            let mut group = DocGroupMut::new(&table, vec![&mut a, &mut b]);
            assert!(group.is_grayed(0));
            group.set("x", "3").unwrap();
            assert!(!group.is_grayed(0));
        }
        assert_eq!(a[0], Value::from("3"));
        assert_eq!(b[0], Value::from("3"));
    }
}
