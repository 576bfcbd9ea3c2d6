//! Lifecycle hooks of document types.
//!
//! Hooks are registered per document type on the store builder and invoked
//! by the apply engine in two stages:
//!
//! 1. [`DocumentHooks::before_write`] for every inserted or edited document
//!    and sub-document row, after calculated columns were reset to null
//! 2. [`DocumentHooks::after_change`] once per written document, after the
//!    storage transaction committed

use crate::error::CoreResult;
use crate::row_values::{RowValues, RowValuesMut};
use crate::schema::TableDef;
use crate::types::{DocState, RowId};
use crate::value::Value;
use uuid::Uuid;

/// A row about to be written.
pub struct BeforeWriteContext<'a> {
    /// Document type name.
    pub doc_type: &'a str,
    /// Sub-document type name, when the row is a sub-document.
    pub sub_type: Option<&'a str>,
    /// Row identifier.
    pub id: RowId,
    /// [`DocState::Insert`] or [`DocState::Edit`].
    pub state: DocState,
    pub(crate) values: &'a mut dyn RowValuesMut,
}

impl BeforeWriteContext<'_> {
    /// Returns the row's values.
    #[must_use]
    pub fn values(&self) -> &dyn RowValuesMut {
        &*self.values
    }

    /// Reads a column by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist.
    pub fn get(&self, name: &str) -> CoreResult<&Value> {
        self.values.get(name)
    }

    /// Overwrites a column by name.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown column or a value of the wrong type.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let column = self.values.table().require_column(name)?;
        self.values.set_value(column, value.into())
    }

    /// Declaration of the row's table.
    #[must_use]
    pub fn table(&self) -> &TableDef {
        self.values.table()
    }
}

/// A document written by a committed apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Document type name.
    pub doc_type: String,
    /// Persisted identifier.
    pub id: i64,
    /// State the document was applied in.
    pub state: DocState,
    /// Whether the edit restored a soft-deleted document.
    pub restored: bool,
    /// Version after the write, for versioned types that keep the row.
    pub version: Option<u64>,
    /// User action that grouped the apply.
    pub user_action: Uuid,
}

/// Callbacks attached to a document type.
pub trait DocumentHooks: Send + Sync {
    /// Recomputes calculated columns; may overwrite any field.
    ///
    /// # Errors
    ///
    /// An error aborts the apply before anything is written.
    fn before_write(&self, ctx: &mut BeforeWriteContext<'_>) -> CoreResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Observes a document after its change was committed.
    fn after_change(&self, event: &ChangeEvent) {
        let _ = event;
    }
}
