//! Column, table and document type declarations.

use crate::error::{CoreError, CoreResult};
use crate::types::RowId;
use crate::value::Value;
use docset_storage::Datum;
use std::fmt;

/// Type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// UTF-8 text; `max_len` counts characters.
    Text,
    /// Raw bytes; `max_len` counts bytes.
    Bytes,
    /// Reference to a document of the named type.
    DocRef(String),
    /// Reference to a sub-document row.
    SubRef {
        /// Owning document type.
        document: String,
        /// Sub-document type.
        sub: String,
    },
    /// Parent pointer into the same table, forming a forest.
    TreeRef,
    /// Row half of a variable-type reference.
    RowId,
    /// Identifier of a binary object in the blob store.
    Blob,
}

impl ColumnKind {
    /// Checks if values of this kind are row references.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ColumnKind::DocRef(_) | ColumnKind::SubRef { .. } | ColumnKind::TreeRef | ColumnKind::RowId
        )
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Bool => f.write_str("bool"),
            ColumnKind::Int => f.write_str("int"),
            ColumnKind::Float => f.write_str("float"),
            ColumnKind::Text => f.write_str("text"),
            ColumnKind::Bytes => f.write_str("bytes"),
            ColumnKind::DocRef(target) => write!(f, "ref({target})"),
            ColumnKind::SubRef { document, sub } => write!(f, "ref({document}.{sub})"),
            ColumnKind::TreeRef => f.write_str("tree"),
            ColumnKind::RowId => f.write_str("row id"),
            ColumnKind::Blob => f.write_str("blob"),
        }
    }
}

/// A column declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    pub kind: ColumnKind,
    /// Whether null is an acceptable committed value.
    pub nullable: bool,
    /// Maximum length for text and bytes columns.
    pub max_len: Option<usize>,
    /// Whether the value is recomputed server-side before every write.
    pub calculated: bool,
}

impl Column {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            max_len: None,
            calculated: false,
        }
    }

    /// Boolean column.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Bool)
    }

    /// Integer column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Int)
    }

    /// Float column.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Float)
    }

    /// Text column limited to `max_len` characters.
    pub fn text(name: impl Into<String>, max_len: usize) -> Self {
        let mut column = Self::new(name, ColumnKind::Text);
        column.max_len = Some(max_len);
        column
    }

    /// Bytes column.
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Bytes)
    }

    /// Simple reference to a document type.
    pub fn doc_ref(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::DocRef(target.into()))
    }

    /// Reference to a sub-document type.
    pub fn sub_ref(
        name: impl Into<String>,
        document: impl Into<String>,
        sub: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ColumnKind::SubRef {
                document: document.into(),
                sub: sub.into(),
            },
        )
    }

    /// Tree (parent) reference into the same table.
    pub fn tree_ref(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::TreeRef)
    }

    /// Row half of a variable-type reference.
    pub fn row_id(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::RowId)
    }

    /// Binary object column.
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, ColumnKind::Blob)
    }

    /// Marks the column as not nullable.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Checks a value against this column and normalizes it.
    ///
    /// Integer values assigned to reference columns become persisted row
    /// references; integers assigned to float columns become floats.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong type or exceeds the
    /// maximum length.
    pub fn check_value(&self, value: Value) -> CoreResult<Value> {
        let value = match (&self.kind, value) {
            (_, Value::Null) => Value::Null,
            (ColumnKind::Bool, v @ Value::Bool(_)) => v,
            (ColumnKind::Int, v @ Value::Int(_)) => v,
            (ColumnKind::Float, v @ Value::Float(_)) => v,
            (ColumnKind::Float, Value::Int(n)) => Value::Float(n as f64),
            (ColumnKind::Text, v @ Value::Text(_)) => v,
            (ColumnKind::Bytes, v @ Value::Bytes(_)) => v,
            (ColumnKind::Blob, v @ (Value::Int(_) | Value::Bytes(_))) => v,
            (kind, v @ Value::Id(_)) if kind.is_reference() => v,
            (kind, Value::Int(n)) if kind.is_reference() && n > 0 => {
                Value::Id(RowId::Persisted(n))
            }
            (kind, other) => {
                return Err(CoreError::invalid_request(format!(
                    "column '{}' expects {kind}, got {}",
                    self.name,
                    other.type_name()
                )))
            }
        };

        if let Some(max) = self.max_len {
            let len = match &value {
                Value::Text(s) => s.chars().count(),
                Value::Bytes(b) if self.kind == ColumnKind::Bytes => b.len(),
                _ => 0,
            };
            if len > max {
                return Err(CoreError::invalid_request(format!(
                    "column '{}' is limited to {max}, got {len}",
                    self.name
                )));
            }
        }
        Ok(value)
    }

    /// Converts a stored cell into a value of this column.
    #[must_use]
    pub fn decode(&self, datum: &Datum) -> Value {
        match datum {
            Datum::Null => Value::Null,
            Datum::Int(n) if self.kind.is_reference() => Value::Id(RowId::Persisted(*n)),
            Datum::Int(n) => Value::Int(*n),
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Float(x) => Value::Float(*x),
            Datum::Text(s) => Value::Text(s.clone()),
            Datum::Bytes(b) => Value::Bytes(b.clone()),
        }
    }
}

/// A variable-type reference: a (table id, row id) column pair whose target
/// type is chosen at runtime from an allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRefDecl {
    /// Logical name of the reference.
    pub name: String,
    /// Integer column holding the target table identifier.
    pub table_column: String,
    /// Row-id column holding the target row identifier.
    pub row_column: String,
    /// Document types the reference may point at.
    pub targets: Vec<String>,
}

impl VarRefDecl {
    /// Declares a variable reference over two existing columns.
    pub fn new(
        name: impl Into<String>,
        table_column: impl Into<String>,
        row_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table_column: table_column.into(),
            row_column: row_column.into(),
            targets: Vec::new(),
        }
    }

    /// Allows a target document type.
    #[must_use]
    pub fn target(mut self, doc_type: impl Into<String>) -> Self {
        self.targets.push(doc_type.into());
        self
    }
}

/// One key of an ordering specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column sorted on.
    pub column: String,
    /// Whether the order is descending.
    pub descending: bool,
}

/// Resolved column positions of a variable reference.
#[derive(Debug, Clone, Copy)]
pub struct VarRefColumns<'a> {
    /// The declaration.
    pub decl: &'a VarRefDecl,
    /// Index of the table-id column.
    pub table_column: usize,
    /// Index of the row-id column.
    pub row_column: usize,
}

/// Declaration of one table: a document type's main table or a
/// sub-document type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    columns: Vec<Column>,
    var_refs: Vec<VarRefDecl>,
    order_by: Vec<OrderBy>,
}

impl TableDef {
    /// Creates a table without columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            var_refs: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// Adds a source column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds a calculated column.
    #[must_use]
    pub fn calculated(mut self, mut column: Column) -> Self {
        column.calculated = true;
        self.columns.push(column);
        self
    }

    /// Adds a variable-type reference over two declared columns.
    #[must_use]
    pub fn var_ref(mut self, decl: VarRefDecl) -> Self {
        self.var_refs.push(decl);
        self
    }

    /// Appends a key to the ordering specification.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all columns (source and calculated) in value-vector order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the variable reference declarations.
    #[must_use]
    pub fn var_refs(&self) -> &[VarRefDecl] {
        &self.var_refs
    }

    /// Returns the ordering specification.
    #[must_use]
    pub fn ordering(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Finds a column by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Finds a column by name, failing if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownColumn`].
    pub fn require_column(&self, name: &str) -> CoreResult<usize> {
        self.column_index(name).ok_or_else(|| CoreError::UnknownColumn {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }

    /// Returns the index of the tree-reference column, if any.
    #[must_use]
    pub fn tree_column(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.kind == ColumnKind::TreeRef)
    }

    /// Returns the indices of calculated columns.
    pub fn calculated_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.calculated)
            .map(|(i, _)| i)
    }

    /// Resolves the column positions of every variable reference.
    ///
    /// Declarations naming unknown columns are skipped; a frozen schema
    /// has none.
    #[must_use]
    pub fn var_ref_columns(&self) -> Vec<VarRefColumns<'_>> {
        self.var_refs
            .iter()
            .filter_map(|decl| {
                Some(VarRefColumns {
                    decl,
                    table_column: self.column_index(&decl.table_column)?,
                    row_column: self.column_index(&decl.row_column)?,
                })
            })
            .collect()
    }

    /// Creates an all-null value vector.
    #[must_use]
    pub fn empty_values(&self) -> Vec<Value> {
        vec![Value::Null; self.columns.len()]
    }
}

/// A document type: a main table plus sub-document tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocType {
    table: TableDef,
    subs: Vec<TableDef>,
    versioned: bool,
    soft_delete: bool,
}

impl DocType {
    /// Creates a document type without columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: TableDef::new(name),
            subs: Vec::new(),
            versioned: false,
            soft_delete: false,
        }
    }

    /// Adds a source column to the main table.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.table = self.table.column(column);
        self
    }

    /// Adds a calculated column to the main table.
    #[must_use]
    pub fn calculated(mut self, column: Column) -> Self {
        self.table = self.table.calculated(column);
        self
    }

    /// Adds a variable-type reference to the main table.
    #[must_use]
    pub fn var_ref(mut self, decl: VarRefDecl) -> Self {
        self.table = self.table.var_ref(decl);
        self
    }

    /// Appends a key to the main table's ordering specification.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.table = self.table.order_by(column, descending);
        self
    }

    /// Adds a sub-document type.
    #[must_use]
    pub fn sub(mut self, table: TableDef) -> Self {
        self.subs.push(table);
        self
    }

    /// Enables version numbers.
    #[must_use]
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    /// Enables soft deletion.
    #[must_use]
    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    /// Returns the document type name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.table.name()
    }

    /// Returns the main table.
    #[must_use]
    pub fn table(&self) -> &TableDef {
        &self.table
    }

    /// Returns the sub-document tables.
    #[must_use]
    pub fn subs(&self) -> &[TableDef] {
        &self.subs
    }

    /// Finds a sub-document type by name.
    #[must_use]
    pub fn sub_index(&self, name: &str) -> Option<usize> {
        self.subs.iter().position(|s| s.name() == name)
    }

    /// Whether documents carry version numbers.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// Whether deletion sets a flag instead of removing the row.
    #[must_use]
    pub fn tracks_deletion(&self) -> bool {
        self.soft_delete
    }
}
