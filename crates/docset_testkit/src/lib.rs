//! # docset Testkit
//!
//! Test utilities for docset.
//!
//! This crate provides:
//! - Fixture schemas and ready-made document stores
//! - Permission filters that record or deny checks
//! - Lifecycle hooks that compute columns and record change events
//! - A fault-injecting row store for retry and rollback tests
//! - Property-based test generators using proptest
//!
//! The cross-crate integration suite lives in this crate's `tests/`
//! directory.
//!
//! ## Usage
//!
//! ```rust
//! use docset_testkit::prelude::*;
//!
//! let fixture = TestStore::new();
//! let mut ws = fixture.store.working_set();
//! let person = ws.insert(PERSON).unwrap();
//! ws.doc_mut(PERSON, person).unwrap().set("last", "Lovelace").unwrap();
//! ws.apply().unwrap();
//! assert_eq!(fixture.store.count(PERSON).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod filters;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::filters::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use docset_core::RowValues;
    pub use docset_core::RowValuesMut;
}

pub use faults::*;
pub use filters::*;
pub use fixtures::*;
pub use generators::*;
