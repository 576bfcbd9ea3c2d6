//! Fault injection for storage commits.
//!
//! [`FlakyStore`] wraps an [`InMemoryRowStore`] and fails the next commit
//! in one of two ways:
//!
//! 1. **Before commit** - the transaction is rolled back and the caller sees
//!    a transport error; nothing was written
//! 2. **Lost acknowledgement** - the transaction commits but the caller
//!    still sees a transport error, as if the connection dropped on the way
//!    back
//!
//! The second mode is what idempotent retry exists for.
//!
//! ## Usage
//!
//! ```rust
//! use docset_testkit::faults::{CommitFault, FlakyStore};
//!
//! let store = FlakyStore::new();
//! store.arm(CommitFault::LoseAck);
//! assert_eq!(store.armed(), Some(CommitFault::LoseAck));
//! ```

use docset_storage::{
    Filter, InMemoryRowStore, Row, RowStore, StorageError, StorageResult, TableId, TableSpec,
    WriteTxn,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// How the next commit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFault {
    /// Roll back, then report a transport error.
    BeforeCommit,
    /// Commit, then report a transport error.
    LoseAck,
}

/// A row store whose commits can be made to fail once.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryRowStore,
    armed: Mutex<Option<CommitFault>>,
    commits: AtomicUsize,
    faults: AtomicUsize,
}

impl FlakyStore {
    /// Creates an empty store with no fault armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing in-memory store.
    #[must_use]
    pub fn wrap(inner: InMemoryRowStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Makes the next commit fail.
    pub fn arm(&self, fault: CommitFault) {
        *self.armed.lock() = Some(fault);
    }

    /// Clears an armed fault.
    pub fn disarm(&self) {
        *self.armed.lock() = None;
    }

    /// Returns the fault waiting for the next commit.
    #[must_use]
    pub fn armed(&self) -> Option<CommitFault> {
        *self.armed.lock()
    }

    /// Number of commits that reached the inner store.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of faults injected so far.
    #[must_use]
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &InMemoryRowStore {
        &self.inner
    }
}

impl RowStore for FlakyStore {
    fn create_table(&self, spec: &TableSpec) -> StorageResult<TableId> {
        self.inner.create_table(spec)
    }

    fn table_id(&self, name: &str) -> Option<TableId> {
        self.inner.table_id(name)
    }

    fn tables(&self) -> Vec<(TableId, String)> {
        self.inner.tables()
    }

    fn select(&self, table: TableId, id: i64) -> StorageResult<Option<Row>> {
        self.inner.select(table, id)
    }

    fn select_where(&self, table: TableId, filter: &Filter) -> StorageResult<Vec<(i64, Row)>> {
        self.inner.select_where(table, filter)
    }

    fn count(&self, table: TableId) -> StorageResult<usize> {
        self.inner.count(table)
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        Ok(Box::new(FlakyTxn {
            store: self,
            inner: self.inner.begin_write()?,
        }))
    }
}

struct FlakyTxn<'a> {
    store: &'a FlakyStore,
    inner: Box<dyn WriteTxn + 'a>,
}

impl WriteTxn for FlakyTxn<'_> {
    fn insert(&mut self, table: TableId, row: Row) -> StorageResult<i64> {
        self.inner.insert(table, row)
    }

    fn update(&mut self, table: TableId, id: i64, row: Row) -> StorageResult<()> {
        self.inner.update(table, id, row)
    }

    fn delete(&mut self, table: TableId, id: i64) -> StorageResult<()> {
        self.inner.delete(table, id)
    }

    fn select(&self, table: TableId, id: i64) -> StorageResult<Option<Row>> {
        self.inner.select(table, id)
    }

    fn select_where(&self, table: TableId, filter: &Filter) -> StorageResult<Vec<(i64, Row)>> {
        self.inner.select_where(table, filter)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let FlakyTxn { store, inner } = *self;
        let fault = store.armed.lock().take();
        match fault {
            None => {
                inner.commit()?;
                store.commits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Some(CommitFault::BeforeCommit) => {
                inner.rollback()?;
                store.faults.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::Transport(
                    "connection reset before commit".into(),
                ))
            }
            Some(CommitFault::LoseAck) => {
                inner.commit()?;
                store.commits.fetch_add(1, Ordering::SeqCst);
                store.faults.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::Transport(
                    "connection reset after commit".into(),
                ))
            }
        }
    }

    fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.inner.rollback()
    }
}
