//! Row-store backend trait definitions.

use crate::datum::{Filter, Row, TableId, TableSpec};
use crate::error::StorageResult;

/// A transactional row store.
///
/// Row stores hold named tables of [`Row`]s keyed by positive integer
/// identifiers that the store generates on insert. Reads through the store
/// itself always observe committed state; writes happen inside a
/// [`WriteTxn`] obtained from [`RowStore::begin_write`].
///
/// # Invariants
///
/// - `insert` returns an identifier never used before in that table
/// - changes made in a write transaction become visible atomically on commit
/// - a write transaction dropped without commit leaves no trace
/// - at most one write transaction is open at a time
///
/// # Implementors
///
/// - [`super::InMemoryRowStore`] - For testing and snapshots
pub trait RowStore: Send + Sync {
    /// Creates a table, or adds the missing columns if it already exists.
    ///
    /// Returns the table's stable identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot alter its catalog.
    fn create_table(&self, spec: &TableSpec) -> StorageResult<TableId>;

    /// Looks up a table by name.
    fn table_id(&self, name: &str) -> Option<TableId>;

    /// Lists all tables with their names, ordered by identifier.
    fn tables(&self) -> Vec<(TableId, String)>;

    /// Reads one committed row.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn select(&self, table: TableId, id: i64) -> StorageResult<Option<Row>>;

    /// Reads all committed rows matching `filter`, ordered by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn select_where(&self, table: TableId, filter: &Filter) -> StorageResult<Vec<(i64, Row)>>;

    /// Returns the number of committed rows in a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn count(&self, table: TableId) -> StorageResult<usize>;

    /// Begins the single write transaction.
    ///
    /// Blocks while another write transaction is open.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>>;
}

/// An open physical write transaction.
///
/// Reads through the transaction observe its own uncommitted writes.
pub trait WriteTxn {
    /// Inserts a row and returns its generated identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or one of the row's columns is unknown.
    fn insert(&mut self, table: TableId, row: Row) -> StorageResult<i64>;

    /// Overwrites the cells present in `row`; other cells are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist or a column is unknown.
    fn update(&mut self, table: TableId, id: i64, row: Row) -> StorageResult<()>;

    /// Removes a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist.
    fn delete(&mut self, table: TableId, id: i64) -> StorageResult<()>;

    /// Reads one row as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn select(&self, table: TableId, id: i64) -> StorageResult<Option<Row>>;

    /// Reads all rows matching `filter` as seen by this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist.
    fn select_where(&self, table: TableId, filter: &Filter) -> StorageResult<Vec<(i64, Row)>>;

    /// Makes every write of this transaction visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails. Transport failures may be
    /// reported after the commit was durably applied.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards every write of this transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    fn rollback(self: Box<Self>) -> StorageResult<()>;
}
