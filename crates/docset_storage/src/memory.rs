//! In-memory row store.

use crate::backend::{RowStore, WriteTxn};
use crate::datum::{Filter, Row, TableId, TableSpec};
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One physical table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct TableData {
    pub(crate) id: TableId,
    pub(crate) name: String,
    pub(crate) columns: Vec<String>,
    pub(crate) next_id: i64,
    pub(crate) rows: BTreeMap<i64, Row>,
}

impl TableData {
    fn check_columns(&self, row: &Row) -> StorageResult<()> {
        for (column, _) in row.iter() {
            if !self.columns.iter().any(|c| c == column) {
                return Err(StorageError::UnknownColumn {
                    table: self.id,
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    fn select_where(&self, filter: &Filter) -> Vec<(i64, Row)> {
        self.rows
            .iter()
            .filter(|(_, row)| filter.matches(row))
            .map(|(id, row)| (*id, row.clone()))
            .collect()
    }
}

/// The whole catalog plus data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub(crate) tables: Vec<TableData>,
}

impl Tables {
    fn get(&self, table: TableId) -> StorageResult<&TableData> {
        self.tables
            .iter()
            .find(|t| t.id == table)
            .ok_or(StorageError::UnknownTable(table))
    }

    fn get_mut(&mut self, table: TableId) -> StorageResult<&mut TableData> {
        self.tables
            .iter_mut()
            .find(|t| t.id == table)
            .ok_or(StorageError::UnknownTable(table))
    }
}

/// An in-memory row store.
///
/// This store keeps all tables in memory and is suitable for:
/// - Unit and integration tests
/// - Ephemeral stores
/// - Tools working on a JSON snapshot (see [`InMemoryRowStore::save_snapshot`])
///
/// # Thread Safety
///
/// The store is `Send + Sync`. Write transactions are serialized through an
/// exclusive lock held for the transaction's lifetime; each transaction
/// works on a private copy of the tables that replaces the committed state
/// on commit.
///
/// # Example
///
/// ```rust
/// use docset_storage::{Datum, InMemoryRowStore, Row, RowStore, TableSpec};
///
/// let store = InMemoryRowStore::new();
/// let t = store.create_table(&TableSpec::new("t").column("x")).unwrap();
/// let mut txn = store.begin_write().unwrap();
/// let id = txn.insert(t, Row::new().with("x", 1i64)).unwrap();
/// assert_eq!(id, 1);
/// txn.rollback().unwrap();
/// assert_eq!(store.count(t).unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    state: RwLock<Tables>,
    write_lock: Mutex<()>,
}

impl InMemoryRowStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            state: RwLock::new(tables),
            write_lock: Mutex::new(()),
        }
    }

    pub(crate) fn tables_snapshot(&self) -> Tables {
        self.state.read().clone()
    }
}

impl RowStore for InMemoryRowStore {
    fn create_table(&self, spec: &TableSpec) -> StorageResult<TableId> {
        // Catalog changes must not race a working copy held by a writer.
        let _guard = self.write_lock.lock();
        let mut state = self.state.write();

        if let Some(existing) = state.tables.iter_mut().find(|t| t.name == spec.name) {
            for column in &spec.columns {
                if !existing.columns.contains(column) {
                    existing.columns.push(column.clone());
                }
            }
            return Ok(existing.id);
        }

        let next = state.tables.iter().map(|t| t.id.as_u32()).max().unwrap_or(0) + 1;
        let id = TableId::new(next);
        state.tables.push(TableData {
            id,
            name: spec.name.clone(),
            columns: spec.columns.clone(),
            next_id: 1,
            rows: BTreeMap::new(),
        });
        Ok(id)
    }

    fn table_id(&self, name: &str) -> Option<TableId> {
        self.state
            .read()
            .tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
    }

    fn tables(&self) -> Vec<(TableId, String)> {
        let mut list: Vec<_> = self
            .state
            .read()
            .tables
            .iter()
            .map(|t| (t.id, t.name.clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    fn select(&self, table: TableId, id: i64) -> StorageResult<Option<Row>> {
        Ok(self.state.read().get(table)?.rows.get(&id).cloned())
    }

    fn select_where(&self, table: TableId, filter: &Filter) -> StorageResult<Vec<(i64, Row)>> {
        Ok(self.state.read().get(table)?.select_where(filter))
    }

    fn count(&self, table: TableId) -> StorageResult<usize> {
        Ok(self.state.read().get(table)?.rows.len())
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTxn + '_>> {
        let guard = self.write_lock.lock();
        let working = self.state.read().clone();
        Ok(Box::new(MemoryWriteTxn {
            store: self,
            working,
            _guard: guard,
        }))
    }
}

/// Write transaction over a private copy of the tables.
struct MemoryWriteTxn<'a> {
    store: &'a InMemoryRowStore,
    working: Tables,
    _guard: MutexGuard<'a, ()>,
}

impl WriteTxn for MemoryWriteTxn<'_> {
    fn insert(&mut self, table: TableId, row: Row) -> StorageResult<i64> {
        let data = self.working.get_mut(table)?;
        data.check_columns(&row)?;
        let id = data.next_id;
        data.next_id += 1;
        data.rows.insert(id, row);
        Ok(id)
    }

    fn update(&mut self, table: TableId, id: i64, row: Row) -> StorageResult<()> {
        let data = self.working.get_mut(table)?;
        data.check_columns(&row)?;
        let existing = data
            .rows
            .get_mut(&id)
            .ok_or(StorageError::RowNotFound { table, id })?;
        existing.merge(row);
        Ok(())
    }

    fn delete(&mut self, table: TableId, id: i64) -> StorageResult<()> {
        self.working
            .get_mut(table)?
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StorageError::RowNotFound { table, id })
    }

    fn select(&self, table: TableId, id: i64) -> StorageResult<Option<Row>> {
        Ok(self.working.get(table)?.rows.get(&id).cloned())
    }

    fn select_where(&self, table: TableId, filter: &Filter) -> StorageResult<Vec<(i64, Row)>> {
        Ok(self.working.get(table)?.select_where(filter))
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        *this.store.state.write() = this.working;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StorageResult<()> {
        // The working copy is simply discarded.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Datum;

    fn store_with_table() -> (InMemoryRowStore, TableId) {
        let store = InMemoryRowStore::new();
        let table = store
            .create_table(&TableSpec::new("people").column("name").column("age"))
            .unwrap();
        (store, table)
    }

    #[test]
    fn insert_generates_sequential_ids() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        let a = txn.insert(table, Row::new().with("name", "a")).unwrap();
        let b = txn.insert(table, Row::new().with("name", "b")).unwrap();
        txn.commit().unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(store.count(table).unwrap(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        let a = txn.insert(table, Row::new()).unwrap();
        txn.delete(table, a).unwrap();
        let b = txn.insert(table, Row::new()).unwrap();
        txn.commit().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn uncommitted_writes_are_invisible() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        let id = txn.insert(table, Row::new().with("name", "x")).unwrap();

        assert!(txn.select(table, id).unwrap().is_some());
        drop(txn);

        assert!(store.select(table, id).unwrap().is_none());
    }

    #[test]
    fn update_merges_cells() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        let id = txn
            .insert(table, Row::new().with("name", "x").with("age", 3i64))
            .unwrap();
        txn.update(table, id, Row::new().with("age", 4i64)).unwrap();
        txn.commit().unwrap();

        let row = store.select(table, id).unwrap().unwrap();
        assert_eq!(row.get("name"), &Datum::from("x"));
        assert_eq!(row.get("age"), &Datum::Int(4));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        let result = txn.insert(table, Row::new().with("nope", 1i64));
        assert!(matches!(result, Err(StorageError::UnknownColumn { .. })));
    }

    #[test]
    fn update_missing_row_fails() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        let result = txn.update(table, 99, Row::new());
        assert!(matches!(result, Err(StorageError::RowNotFound { id: 99, .. })));
    }

    #[test]
    fn create_table_alters_existing() {
        let (store, table) = store_with_table();
        let again = store
            .create_table(&TableSpec::new("people").column("email"))
            .unwrap();
        assert_eq!(table, again);

        let mut txn = store.begin_write().unwrap();
        assert!(txn.insert(table, Row::new().with("email", "e")).is_ok());
    }

    #[test]
    fn select_where_filters_committed_rows() {
        let (store, table) = store_with_table();
        let mut txn = store.begin_write().unwrap();
        txn.insert(table, Row::new().with("age", 1i64)).unwrap();
        txn.insert(table, Row::new().with("age", 2i64)).unwrap();
        txn.insert(table, Row::new().with("age", 1i64)).unwrap();
        txn.commit().unwrap();

        let rows = store.select_where(table, &Filter::eq("age", 1i64)).unwrap();
        let ids: Vec<_> = rows.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn unknown_table_fails() {
        let store = InMemoryRowStore::new();
        assert!(matches!(
            store.select(TableId::new(9), 1),
            Err(StorageError::UnknownTable(_))
        ));
    }

    #[test]
    fn tables_are_listed_in_id_order() {
        let store = InMemoryRowStore::new();
        store.create_table(&TableSpec::new("b")).unwrap();
        store.create_table(&TableSpec::new("a")).unwrap();
        let names: Vec<_> = store.tables().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(store.table_id("a"), Some(TableId::new(2)));
    }

    proptest::proptest! {
        #[test]
        fn committed_count_tracks_inserts_and_deletes(
            ops in proptest::collection::vec(proptest::bool::ANY, 1..40),
            commit in proptest::bool::ANY,
        ) {
            let (store, table) = store_with_table();
            let mut txn = store.begin_write().unwrap();
            let mut live = Vec::new();
            for insert in ops {
                if insert || live.is_empty() {
                    live.push(txn.insert(table, Row::new().with("age", 1i64)).unwrap());
                } else if let Some(id) = live.pop() {
                    txn.delete(table, id).unwrap();
                }
            }
            if commit {
                txn.commit().unwrap();
                proptest::prop_assert_eq!(store.count(table).unwrap(), live.len());
            } else {
                txn.rollback().unwrap();
                proptest::prop_assert_eq!(store.count(table).unwrap(), 0);
            }
        }
    }
}
