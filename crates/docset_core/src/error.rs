//! Error types for docset core.

use crate::access::PermissionReason;
use crate::blob::BlobId;
use crate::locks::LockToken;
use crate::types::DocIdentity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The schema failed validation or is in the wrong lifecycle phase.
    SchemaValidation,
    /// A permission filter vetoed the action.
    AccessDenied,
    /// A reference is dangling, cyclic, incomplete or disallowed.
    ReferentialIntegrity,
    /// Another writer changed the data, or a long lock is held elsewhere.
    ConcurrencyConflict,
    /// The backend failed.
    Storage,
    /// The caller used the API incorrectly.
    InvalidRequest,
}

/// Kind of referential-integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityViolation {
    /// A pending identifier is referenced but no such row is being inserted.
    UnresolvedFictiveId,
    /// A referenced row does not exist.
    MissingTarget,
    /// A variable reference names a table outside its allow-list.
    DisallowedVariableTarget,
    /// Exactly one half of a variable reference is populated.
    IncompleteVariableReference,
    /// A tree reference would form a cycle.
    TreeCycle,
    /// A row being deleted is still referenced.
    ReferencedByOther,
    /// A required reference is null.
    RequiredReference,
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntegrityViolation::UnresolvedFictiveId => "unresolved fictive id",
            IntegrityViolation::MissingTarget => "missing target",
            IntegrityViolation::DisallowedVariableTarget => "disallowed variable target",
            IntegrityViolation::IncompleteVariableReference => "incomplete variable reference",
            IntegrityViolation::TreeCycle => "tree cycle",
            IntegrityViolation::ReferencedByOther => "referenced by other row",
            IntegrityViolation::RequiredReference => "required reference is null",
        };
        f.write_str(s)
    }
}

/// Why a document failed optimistic concurrency control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// The stored version differs from the one read.
    VersionMismatch {
        /// Version read when the item was opened.
        expected: u64,
        /// Version found at commit.
        found: u64,
    },
    /// The stored content of an unversioned document changed.
    ContentChanged,
    /// The document was removed by another writer.
    Missing,
}

/// A side change detected at commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Document type name.
    pub doc_type: String,
    /// Document identifier.
    pub id: i64,
    /// What changed.
    pub kind: ConflictKind,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictKind::VersionMismatch { expected, found } => write!(
                f,
                "{} {}: expected version {expected}, found {found}",
                self.doc_type, self.id
            ),
            ConflictKind::ContentChanged => {
                write!(f, "{} {}: changed by another writer", self.doc_type, self.id)
            }
            ConflictKind::Missing => {
                write!(f, "{} {}: removed by another writer", self.doc_type, self.id)
            }
        }
    }
}

fn join_conflicts(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in docset core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] docset_storage::StorageError),

    /// Encoding or decoding of an internal record failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The schema is inconsistent.
    #[error("schema validation failed for {type_name}{}: {message}", .column.as_ref().map(|c| format!(".{c}")).unwrap_or_default())]
    SchemaValidation {
        /// Offending document or sub-document type.
        type_name: String,
        /// Offending column, if the problem is column-specific.
        column: Option<String>,
        /// Description of the problem.
        message: String,
    },

    /// The schema is still mutable and cannot be used yet.
    #[error("schema is not frozen")]
    SchemaNotFrozen,

    /// The schema is frozen and cannot be changed.
    #[error("schema is frozen")]
    SchemaFrozen,

    /// The schema has not been bound to a storage handle.
    #[error("schema is not yet initialized: table identifiers are assigned when bound to storage")]
    SchemaNotInitialized,

    /// No document type with this name.
    #[error("unknown document type: {name}")]
    UnknownDocType {
        /// The requested name.
        name: String,
    },

    /// No column with this name.
    #[error("unknown column '{column}' in {table}")]
    UnknownColumn {
        /// Table searched.
        table: String,
        /// The requested column.
        column: String,
    },

    /// A permission filter vetoed an action.
    #[error("access denied ({reason}) on {doc_type} {id}: [{name}] {message}")]
    AccessDenied {
        /// The check that failed.
        reason: PermissionReason,
        /// Document type.
        doc_type: String,
        /// Document identifier (may be pending).
        id: String,
        /// Name of the recorded error.
        name: String,
        /// Message of the recorded error.
        message: String,
    },

    /// A reference is dangling, cyclic, incomplete or disallowed.
    #[error("referential integrity violation ({kind}) on {table} {id}: {message}")]
    ReferentialIntegrity {
        /// What went wrong.
        kind: IntegrityViolation,
        /// Table of the offending row.
        table: String,
        /// Offending row (may be pending).
        id: String,
        /// Description of the problem.
        message: String,
    },

    /// One or more documents were changed by another writer.
    #[error("concurrency conflict: {}", join_conflicts(.conflicts))]
    ConcurrencyConflict {
        /// Every conflict detected in the commit.
        conflicts: Vec<Conflict>,
    },

    /// A document is covered by a long lock held by someone else.
    #[error("{identity} is covered by long lock {holder}")]
    LockConflict {
        /// The locked document.
        identity: DocIdentity,
        /// Token of the holding lock.
        holder: LockToken,
    },

    /// The lock token is not held.
    #[error("unknown long lock token: {token}")]
    UnknownLockToken {
        /// The token presented.
        token: LockToken,
    },

    /// The requested document does not exist.
    #[error("document not found: {doc_type} {id}")]
    DocumentNotFound {
        /// Document type.
        doc_type: String,
        /// Requested identifier.
        id: i64,
    },

    /// The requested binary object does not exist.
    #[error("binary object not found: {id}")]
    BlobNotFound {
        /// Requested identifier.
        id: BlobId,
    },

    /// The operation is not valid in the current state.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },
}

impl CoreError {
    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Storage(_) | CoreError::Codec { .. } => ErrorCategory::Storage,
            CoreError::SchemaValidation { .. }
            | CoreError::SchemaNotFrozen
            | CoreError::SchemaFrozen
            | CoreError::SchemaNotInitialized => ErrorCategory::SchemaValidation,
            CoreError::AccessDenied { .. } => ErrorCategory::AccessDenied,
            CoreError::ReferentialIntegrity { .. } | CoreError::DocumentNotFound { .. } => {
                ErrorCategory::ReferentialIntegrity
            }
            CoreError::ConcurrencyConflict { .. } | CoreError::LockConflict { .. } => {
                ErrorCategory::ConcurrencyConflict
            }
            CoreError::UnknownDocType { .. }
            | CoreError::UnknownColumn { .. }
            | CoreError::UnknownLockToken { .. }
            | CoreError::BlobNotFound { .. }
            | CoreError::InvalidRequest { .. } => ErrorCategory::InvalidRequest,
        }
    }

    /// Creates a schema validation error.
    pub fn schema(
        type_name: impl Into<String>,
        column: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaValidation {
            type_name: type_name.into(),
            column: column.map(str::to_string),
            message: message.into(),
        }
    }

    /// Creates a referential integrity error.
    pub fn integrity(
        kind: IntegrityViolation,
        table: impl Into<String>,
        id: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        Self::ReferentialIntegrity {
            kind,
            table: table.into(),
            id: id.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns the integrity violation kind, if this is an integrity error.
    #[must_use]
    pub fn integrity_kind(&self) -> Option<IntegrityViolation> {
        match self {
            CoreError::ReferentialIntegrity { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
