//! # docset Core
//!
//! Document working sets and their transactional apply engine.
//!
//! This crate provides:
//! - Document type schemas with sub-documents, cross, tree and
//!   variable-type references, frozen before use
//! - Working sets that load, create, edit and delete documents in memory
//! - The apply engine, which writes a working set in one storage
//!   transaction with ordering, pending-id resolution, integrity checks,
//!   optimistic conflict detection, history and idempotent retry
//! - A long lock registry for advisory locks that outlive a transaction
//! - A content-addressed binary object store
//!
//! ## Example
//!
//! ```rust
//! use docset_core::{Column, DocType, DocumentStore, RowValuesMut, Schema};
//! use docset_storage::InMemoryRowStore;
//! use std::sync::Arc;
//!
//! let mut schema = Schema::new()
//!     .with_type(DocType::new("Note").column(Column::text("title", 80)).versioned())?;
//! schema.freeze()?;
//! let store = DocumentStore::open(schema, Arc::new(InMemoryRowStore::new()))?;
//!
//! let mut ws = store.working_set();
//! let note = ws.insert("Note")?;
//! ws.doc_mut("Note", note)?.set("title", "hello")?;
//! let report = ws.apply()?;
//!
//! let id = report.id_of(note).unwrap();
//! assert_eq!(store.version("Note", id)?, Some(1));
//! # Ok::<(), docset_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod apply;
pub mod blob;
pub mod codec;
mod config;
mod error;
pub mod history;
mod hooks;
mod locks;
mod row_values;
mod schema;
mod store;
mod types;
mod value;
mod working_set;

pub use access::{filter_fn, PermissionContext, PermissionErrors, PermissionFilter, PermissionReason};
pub use apply::{ApplyReport, DocKey, InsertedId, REQUESTS_TABLE};
pub use blob::{
    BlobId, BlobInfo, BlobIssue, BlobIssueKind, BlobLayout, BlobReport, BlobStore, BlobStoreConfig,
    ContentHash, HashPartitionRule, PartitionRule, Severity, BLOB_DATA_TABLE, BLOB_TABLE,
};
pub use config::{Config, ConflictPolicy};
pub use error::{
    Conflict, ConflictKind, CoreError, CoreResult, ErrorCategory, IntegrityViolation,
};
pub use history::{HistoryAction, HistoryEntry, HISTORY_TABLE};
pub use hooks::{BeforeWriteContext, ChangeEvent, DocumentHooks};
pub use locks::{LockToken, LongLock, LongLockRegistry};
pub use row_values::{decode_row, RowValues, RowValuesMut, ValueArray};
pub use schema::{
    Column, ColumnKind, DocType, OrderBy, Schema, TableDef, TableLoc, VarRefColumns, VarRefDecl,
    DELETED_COLUMN, PARENT_COLUMN, VERSION_COLUMN,
};
pub use store::{DocumentStore, StoreBuilder};
pub use types::{DocIdentity, DocState, PendingId, RowId};
pub use value::Value;
pub use working_set::{DocGroup, DocGroupMut, ItemValues, ItemValuesMut, WorkingSet};
