//! # docset Storage
//!
//! Row-store backend trait and implementations for docset.
//!
//! This crate is the lowest layer of the stack: a transactional store of
//! tables whose rows are keyed by auto-incrementing integer identifiers.
//! It knows nothing about documents, references or versions; the core
//! crate owns all of that interpretation.
//!
//! ## Design Principles
//!
//! - Tables hold named columns of untyped [`Datum`] cells
//! - Row identifiers are positive and generated by the store
//! - One write transaction at a time; readers see committed state only
//! - Must be `Send + Sync` so several working sets can share one store
//!
//! ## Available Backends
//!
//! - [`InMemoryRowStore`] - For testing and ephemeral stores, with JSON
//!   snapshot persistence
//!
//! ## Example
//!
//! ```rust
//! use docset_storage::{Datum, InMemoryRowStore, Row, RowStore, TableSpec};
//!
//! let store = InMemoryRowStore::new();
//! let table = store.create_table(&TableSpec::new("notes").column("title")).unwrap();
//!
//! let mut txn = store.begin_write().unwrap();
//! let id = txn.insert(table, Row::new().with("title", Datum::from("hello"))).unwrap();
//! txn.commit().unwrap();
//!
//! let row = store.select(table, id).unwrap().unwrap();
//! assert_eq!(row.get("title"), &Datum::from("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod datum;
mod error;
mod memory;
mod snapshot;

pub use backend::{RowStore, WriteTxn};
pub use datum::{Datum, Filter, Row, TableId, TableSpec};
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryRowStore;
