//! Core type definitions for docset.

use docset_storage::TableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction-scoped placeholder for a row that has not been written yet.
///
/// Pending IDs are allocated by a working set when an item is inserted and
/// stay unique within that working set. They never reach storage: the apply
/// engine substitutes the generated row identifier everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PendingId(pub u64);

impl PendingId {
    /// Creates a new pending ID.
    #[must_use]
    pub const fn new(token: u64) -> Self {
        Self(token)
    }

    /// Returns the raw token.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending:{}", self.0)
    }
}

/// Identifier of a document or sub-document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowId {
    /// Newly inserted, not yet written.
    Pending(PendingId),
    /// Written; the positive identifier generated by storage.
    Persisted(i64),
}

impl RowId {
    /// Returns the persisted identifier, if any.
    #[must_use]
    pub const fn persisted(self) -> Option<i64> {
        match self {
            RowId::Persisted(id) => Some(id),
            RowId::Pending(_) => None,
        }
    }

    /// Returns the pending token, if any.
    #[must_use]
    pub const fn pending(self) -> Option<PendingId> {
        match self {
            RowId::Pending(p) => Some(p),
            RowId::Persisted(_) => None,
        }
    }

    /// Checks if the row has not been written yet.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, RowId::Pending(_))
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Persisted(id)
    }
}

impl From<PendingId> for RowId {
    fn from(id: PendingId) -> Self {
        RowId::Pending(id)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Pending(p) => write!(f, "{p}"),
            RowId::Persisted(id) => write!(f, "{id}"),
        }
    }
}

/// State of a working-set item, or of a group of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocState {
    /// Loaded read-only.
    View,
    /// Newly created.
    Insert,
    /// Loaded for modification.
    Edit,
    /// Marked for deletion.
    Delete,
    /// Items of a group disagree.
    Mixed,
}

impl DocState {
    /// Folds several states into the common one.
    ///
    /// Returns `None` for an empty sequence and [`DocState::Mixed`] when the
    /// states differ.
    pub fn combine(states: impl IntoIterator<Item = DocState>) -> Option<DocState> {
        let mut result = None;
        for state in states {
            result = match result {
                None => Some(state),
                Some(prev) if prev == state => Some(prev),
                Some(_) => return Some(DocState::Mixed),
            };
        }
        result
    }

    /// Checks if items in this state may be modified.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, DocState::Insert | DocState::Edit)
    }
}

impl fmt::Display for DocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocState::View => "view",
            DocState::Insert => "insert",
            DocState::Edit => "edit",
            DocState::Delete => "delete",
            DocState::Mixed => "mixed",
        };
        f.write_str(s)
    }
}

/// Identity of a persisted document: its table and row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocIdentity {
    /// Document table.
    pub table: TableId,
    /// Row identifier.
    pub id: i64,
}

impl DocIdentity {
    /// Creates a document identity.
    #[must_use]
    pub const fn new(table: TableId, id: i64) -> Self {
        Self { table, id }
    }
}

impl fmt::Display for DocIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}
