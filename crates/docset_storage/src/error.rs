//! Error types for storage operations.

use crate::datum::TableId;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The table does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(TableId),

    /// The row does not exist.
    #[error("row {id} not found in {table}")]
    RowNotFound {
        /// Table searched.
        table: TableId,
        /// Missing row identifier.
        id: i64,
    },

    /// The row references a column the table does not declare.
    #[error("unknown column '{column}' in {table}")]
    UnknownColumn {
        /// Table written.
        table: TableId,
        /// Offending column name.
        column: String,
    },

    /// The storage snapshot is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The backend could not be reached or reported a failure after the
    /// request was sent. The write may or may not have been applied.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupted(err.to_string())
    }
}
