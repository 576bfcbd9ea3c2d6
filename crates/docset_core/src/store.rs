//! Document store facade.

use crate::access::{PermissionChain, PermissionFilter, PermissionReason};
use crate::blob::{BlobStore, BlobStoreConfig};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::history::{self, HistoryEntry};
use crate::hooks::DocumentHooks;
use crate::locks::LongLockRegistry;
use crate::apply::requests;
use crate::row_values::{decode_row, ValueArray};
use crate::schema::{Schema, TableDef, TableLoc, DELETED_COLUMN, VERSION_COLUMN};
use crate::types::RowId;
use crate::value::Value;
use crate::working_set::WorkingSet;
use docset_storage::{Datum, Filter, Row, RowStore, TableId};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Builder for a [`DocumentStore`].
pub struct StoreBuilder {
    schema: Schema,
    backend: Arc<dyn RowStore>,
    config: Config,
    locks: Option<Arc<LongLockRegistry>>,
    blob_config: BlobStoreConfig,
    blobs: Option<Arc<BlobStore>>,
    permissions: PermissionChain,
    hooks: Vec<(String, Arc<dyn DocumentHooks>)>,
}

impl StoreBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Shares a long lock registry with other stores.
    #[must_use]
    pub fn long_locks(mut self, registry: Arc<LongLockRegistry>) -> Self {
        self.locks = Some(registry);
        self
    }

    /// Configures the blob store opened over the backend.
    #[must_use]
    pub fn blob_config(mut self, config: BlobStoreConfig) -> Self {
        self.blob_config = config;
        self
    }

    /// Shares an already opened blob store.
    #[must_use]
    pub fn blob_store(mut self, blobs: Arc<BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Registers a permission filter. Filters run in registration order.
    #[must_use]
    pub fn permission_filter(mut self, filter: Arc<dyn PermissionFilter>) -> Self {
        self.permissions.push(filter);
        self
    }

    /// Registers lifecycle hooks for a document type.
    #[must_use]
    pub fn hooks(mut self, doc_type: impl Into<String>, hooks: Arc<dyn DocumentHooks>) -> Self {
        self.hooks.push((doc_type.into(), hooks));
        self
    }

    /// Binds the schema to the backend and opens the store.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaNotFrozen`] for a mutable schema,
    /// [`CoreError::UnknownDocType`] for hooks of an unknown type, or a
    /// storage error.
    pub fn open(self) -> CoreResult<DocumentStore> {
        let mut schema = self.schema;
        schema.ensure_frozen()?;
        schema.bind(self.backend.as_ref())?;

        let mut hooks = vec![Vec::new(); schema.doc_types().len()];
        for (name, hook) in self.hooks {
            hooks[schema.doc_type_index(&name)?].push(hook);
        }

        let blobs = match self.blobs {
            Some(blobs) => blobs,
            None => Arc::new(BlobStore::open(Arc::clone(&self.backend), self.blob_config)?),
        };
        let history_table = self.backend.create_table(&history::table_spec())?;
        let requests_table = self.backend.create_table(&requests::table_spec())?;

        info!(types = schema.doc_types().len(), "document store opened");
        Ok(DocumentStore {
            schema,
            backend: self.backend,
            config: self.config,
            locks: self.locks.unwrap_or_default(),
            blobs,
            permissions: self.permissions,
            hooks,
            history_table,
            requests_table,
        })
    }
}

/// A schema bound to a row store, with its shared collaborators.
///
/// Working sets borrow the store; any number of them may be open at once.
pub struct DocumentStore {
    schema: Schema,
    backend: Arc<dyn RowStore>,
    config: Config,
    locks: Arc<LongLockRegistry>,
    blobs: Arc<BlobStore>,
    permissions: PermissionChain,
    hooks: Vec<Vec<Arc<dyn DocumentHooks>>>,
    history_table: TableId,
    requests_table: TableId,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("types", &self.schema.doc_types().len())
            .field("config", &self.config)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Version of the docset core crate.
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Starts building a store over a frozen schema.
    pub fn builder(schema: Schema, backend: Arc<dyn RowStore>) -> StoreBuilder {
        StoreBuilder {
            schema,
            backend,
            config: Config::default(),
            locks: None,
            blob_config: BlobStoreConfig::default(),
            blobs: None,
            permissions: PermissionChain::default(),
            hooks: Vec::new(),
        }
    }

    /// Opens a store with default settings.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::open`].
    pub fn open(schema: Schema, backend: Arc<dyn RowStore>) -> CoreResult<Self> {
        Self::builder(schema, backend).open()
    }

    /// Starts an empty working set.
    #[must_use]
    pub fn working_set(&self) -> WorkingSet<'_> {
        WorkingSet::new(self)
    }

    /// Returns the bound schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn RowStore> {
        &self.backend
    }

    /// Returns the long lock registry.
    #[must_use]
    pub fn long_locks(&self) -> &Arc<LongLockRegistry> {
        &self.locks
    }

    /// Returns the blob store.
    #[must_use]
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    pub(crate) fn permissions(&self) -> &PermissionChain {
        &self.permissions
    }

    pub(crate) fn hooks(&self, doc: usize) -> &[Arc<dyn DocumentHooks>] {
        &self.hooks[doc]
    }

    pub(crate) fn history_table(&self) -> TableId {
        self.history_table
    }

    pub(crate) fn requests_table(&self) -> TableId {
        self.requests_table
    }

    /// Reads a committed document row.
    pub(crate) fn load_row(&self, doc: usize, id: i64) -> CoreResult<Option<Row>> {
        let table = self.schema.table_id(TableLoc::doc(doc))?;
        Ok(self.backend.select(table, id)?)
    }

    /// Reads the committed sub-document rows of a document in table order.
    pub(crate) fn load_sub_rows(
        &self,
        doc: usize,
        sub: usize,
        parent: i64,
    ) -> CoreResult<Vec<(i64, Row)>> {
        let loc = TableLoc::sub(doc, sub);
        let table = self.schema.table_id(loc)?;
        let mut rows = self
            .backend
            .select_where(table, &Filter::eq(crate::schema::PARENT_COLUMN, parent))?;
        sort_rows(self.schema.table_def(loc), &mut rows);
        Ok(rows)
    }

    /// Lists the identifiers of committed documents, in the type's order.
    ///
    /// Soft-deleted documents are included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`] or a storage error.
    pub fn ids(&self, doc_type: &str) -> CoreResult<Vec<i64>> {
        let doc = self.schema.doc_type_index(doc_type)?;
        let loc = TableLoc::doc(doc);
        let mut rows = self
            .backend
            .select_where(self.schema.table_id(loc)?, &Filter::All)?;
        sort_rows(self.schema.table_def(loc), &mut rows);
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    /// Returns the number of committed documents of a type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`] or a storage error.
    pub fn count(&self, doc_type: &str) -> CoreResult<usize> {
        let table = self.schema.resolve_table_id(doc_type)?;
        Ok(self.backend.count(table)?)
    }

    /// Reads the committed values of a document, without permission checks.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`] or a storage error.
    pub fn read(&self, doc_type: &str, id: i64) -> CoreResult<Option<Vec<Value>>> {
        let doc = self.schema.doc_type_index(doc_type)?;
        let def = self.schema.doc_types()[doc].table();
        Ok(self.load_row(doc, id)?.map(|row| decode_row(def, &row)))
    }

    /// Returns the committed version of a versioned document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`] or a storage error.
    pub fn version(&self, doc_type: &str, id: i64) -> CoreResult<Option<u64>> {
        let doc = self.schema.doc_type_index(doc_type)?;
        Ok(self
            .load_row(doc, id)?
            .and_then(|row| stored_version(&row)))
    }

    /// Checks if a document is soft-deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if no row exists.
    pub fn is_deleted(&self, doc_type: &str, id: i64) -> CoreResult<bool> {
        let doc = self.schema.doc_type_index(doc_type)?;
        let row = self
            .load_row(doc, id)?
            .ok_or_else(|| CoreError::DocumentNotFound {
                doc_type: doc_type.to_string(),
                id,
            })?;
        Ok(stored_deleted(&row))
    }

    /// Reads the history of a document, oldest first.
    ///
    /// Permission filters are consulted with [`PermissionReason::ViewHistory`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AccessDenied`] if a filter vetoes, or a storage
    /// error.
    pub fn history(&self, doc_type: &str, id: i64) -> CoreResult<Vec<HistoryEntry>> {
        let doc = self.schema.doc_type_index(doc_type)?;
        let table = self.schema.table_id(TableLoc::doc(doc))?;
        let entries = history::read_history(self.backend.as_ref(), table, id)?;

        let def = self.schema.doc_types()[doc].table();
        let row = match self.load_row(doc, id)? {
            Some(row) => Some(row),
            None => match entries.last() {
                Some(last) => history::read_values(self.backend.as_ref(), table, id, last.version)?,
                None => None,
            },
        };
        let values = row.map_or_else(|| def.empty_values(), |r| decode_row(def, &r));
        self.permissions.check(
            PermissionReason::ViewHistory,
            doc_type,
            RowId::Persisted(id),
            &ValueArray::new(def, values),
        )?;
        Ok(entries)
    }

    /// Reads the values a document had at a version.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AccessDenied`] if a filter vetoes, or a storage
    /// error.
    pub fn history_values(
        &self,
        doc_type: &str,
        id: i64,
        version: u64,
    ) -> CoreResult<Option<Vec<Value>>> {
        let doc = self.schema.doc_type_index(doc_type)?;
        let table = self.schema.table_id(TableLoc::doc(doc))?;
        let def = self.schema.doc_types()[doc].table();
        let Some(row) = history::read_values(self.backend.as_ref(), table, id, version)? else {
            return Ok(None);
        };
        let values = ValueArray::from_row(def, &row);
        self.permissions.check(
            PermissionReason::ViewHistory,
            doc_type,
            RowId::Persisted(id),
            &values,
        )?;
        Ok(Some(values.into_values()))
    }

    fn tree_table(&self, doc_type: &str) -> CoreResult<(TableId, String)> {
        let doc = self.schema.doc_type_index(doc_type)?;
        let def = self.schema.doc_types()[doc].table();
        let column = def.tree_column().ok_or_else(|| {
            CoreError::invalid_request(format!("{doc_type} has no tree reference"))
        })?;
        Ok((
            self.schema.table_id(TableLoc::doc(doc))?,
            def.columns()[column].name.clone(),
        ))
    }

    /// Lists the live documents whose tree reference points at `id`.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the type has no tree reference.
    pub fn tree_children(&self, doc_type: &str, id: i64) -> CoreResult<Vec<i64>> {
        let (table, column) = self.tree_table(doc_type)?;
        Ok(self
            .backend
            .select_where(table, &Filter::eq(column, id))?
            .into_iter()
            .filter(|(_, row)| !stored_deleted(row))
            .map(|(child, _)| child)
            .collect())
    }

    /// Lists every live document below `id` in breadth-first order.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the type has no tree reference.
    pub fn tree_descendants(&self, doc_type: &str, id: i64) -> CoreResult<Vec<i64>> {
        let (table, column) = self.tree_table(doc_type)?;
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut result = Vec::new();
        while let Some(parent) = queue.pop_front() {
            for (child, row) in self
                .backend
                .select_where(table, &Filter::eq(column.as_str(), parent))?
            {
                if !stored_deleted(&row) && seen.insert(child) {
                    result.push(child);
                    queue.push_back(child);
                }
            }
        }
        Ok(result)
    }
}

/// Version stored in a document row.
pub(crate) fn stored_version(row: &Row) -> Option<u64> {
    row.get(VERSION_COLUMN)
        .as_int()
        .and_then(|v| u64::try_from(v).ok())
}

/// Deletion flag stored in a document row.
pub(crate) fn stored_deleted(row: &Row) -> bool {
    matches!(row.get(DELETED_COLUMN), Datum::Bool(true))
}

/// Sorts rows by a table's ordering specification, then by identifier.
pub(crate) fn sort_rows(table: &TableDef, rows: &mut [(i64, Row)]) {
    let keys: Vec<_> = table
        .ordering()
        .iter()
        .filter_map(|key| {
            let index = table.column_index(&key.column)?;
            Some((&table.columns()[index], key.descending))
        })
        .collect();
    if keys.is_empty() {
        rows.sort_by_key(|(id, _)| *id);
        return;
    }
    rows.sort_by(|(a_id, a), (b_id, b)| {
        for (column, descending) in &keys {
            let ord = column
                .decode(a.get(&column.name))
                .cmp_for_order(&column.decode(b.get(&column.name)));
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a_id.cmp(b_id)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, DocType};
    use docset_storage::InMemoryRowStore;

    fn store() -> DocumentStore {
        let mut schema = Schema::new()
            .with_type(
                DocType::new("Folder")
                    .column(Column::text("name", 20))
                    .column(Column::tree_ref("parent"))
                    .order_by("name", false)
                    .soft_delete(),
            )
            .unwrap();
        schema.freeze().unwrap();
        DocumentStore::open(schema, Arc::new(InMemoryRowStore::new())).unwrap()
    }

    fn insert(store: &DocumentStore, name: &str, parent: Option<i64>) -> i64 {
        let table = store.schema().resolve_table_id("Folder").unwrap();
        let mut txn = store.backend().begin_write().unwrap();
        let id = txn
            .insert(
                table,
                Row::new()
                    .with("name", name)
                    .with("parent", parent)
                    .with(DELETED_COLUMN, false),
            )
            .unwrap();
        txn.commit().unwrap();
        id
    }

    #[test]
    fn open_requires_frozen_schema() {
        let schema = Schema::new().with_type(DocType::new("Doc")).unwrap();
        let err = DocumentStore::open(schema, Arc::new(InMemoryRowStore::new())).unwrap_err();
        assert!(matches!(err, CoreError::SchemaNotFrozen));
    }

    #[test]
    fn hooks_for_unknown_type_are_rejected() {
        struct Nothing;
        impl DocumentHooks for Nothing {}

        let mut schema = Schema::new().with_type(DocType::new("Doc")).unwrap();
        schema.freeze().unwrap();
        let err = DocumentStore::builder(schema, Arc::new(InMemoryRowStore::new()))
            .hooks("Other", Arc::new(Nothing))
            .open()
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownDocType { .. }));
    }

    #[test]
    fn ids_follow_ordering() {
        let store = store();
        let b = insert(&store, "b", None);
        let a = insert(&store, "a", None);
        assert_eq!(store.ids("Folder").unwrap(), vec![a, b]);
        assert_eq!(store.count("Folder").unwrap(), 2);
    }

    #[test]
    fn tree_navigation() {
        let store = store();
        let root = insert(&store, "root", None);
        let child = insert(&store, "child", Some(root));
        let grandchild = insert(&store, "grandchild", Some(child));
        let other = insert(&store, "other", Some(root));

        assert_eq!(store.tree_children("Folder", root).unwrap(), vec![child, other]);
        assert_eq!(
            store.tree_descendants("Folder", root).unwrap(),
            vec![child, other, grandchild]
        );
        assert!(store.tree_descendants("Folder", grandchild).unwrap().is_empty());
    }

    #[test]
    fn read_and_deleted_flag() {
        let store = store();
        let id = insert(&store, "x", None);
        let values = store.read("Folder", id).unwrap().unwrap();
        assert_eq!(values[0], Value::from("x"));
        assert!(!store.is_deleted("Folder", id).unwrap());
        assert!(store.is_deleted("Folder", 99).is_err());
        assert_eq!(store.version("Folder", id).unwrap(), None);
    }
}
