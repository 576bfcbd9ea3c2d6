//! Fixture schema and document stores.
//!
//! The fixture schema has two document types:
//!
//! - `Person`: versioned, soft-deleted, with a tree reference (`manager`),
//!   a cross reference to `Company` (`employer`), a variable reference
//!   (`owner`) to either type, a calculated `full_name`, a blob `photo`
//!   and a `Phones` sub-document type referenced by `primary_phone`
//! - `Company`: unversioned and hard-deleted
//!
//! [`TestStore`] opens the schema over an in-memory backend with a
//! [`RecordingFilter`] and [`PersonHooks`] attached.

use crate::filters::RecordingFilter;
use docset_core::{
    BeforeWriteContext, BlobStoreConfig, ChangeEvent, Column, Config, CoreResult, DocType,
    DocumentHooks, DocumentStore, LongLockRegistry, PermissionFilter, RowId, RowValues,
    RowValuesMut, Schema, TableDef, Value, VarRefDecl,
};
use docset_storage::{InMemoryRowStore, RowStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Versioned, soft-deleted document type.
pub const PERSON: &str = "Person";
/// Sub-document type of [`PERSON`].
pub const PHONES: &str = "Phones";
/// Unversioned, hard-deleted document type.
pub const COMPANY: &str = "Company";

/// Builds and freezes the fixture schema.
///
/// # Panics
///
/// Panics if the schema fails validation.
#[must_use]
pub fn people_schema() -> Schema {
    let person = DocType::new(PERSON)
        .column(Column::text("first", 40))
        .column(Column::text("last", 40).required())
        .column(Column::tree_ref("manager"))
        .column(Column::doc_ref("employer", COMPANY))
        .column(Column::int("owner_table"))
        .column(Column::row_id("owner_row"))
        .column(Column::blob("photo"))
        .column(Column::sub_ref("primary_phone", PERSON, PHONES))
        .calculated(Column::text("full_name", 81))
        .var_ref(
            VarRefDecl::new("owner", "owner_table", "owner_row")
                .target(PERSON)
                .target(COMPANY),
        )
        .order_by("last", false)
        .sub(
            TableDef::new(PHONES)
                .column(Column::text("number", 20).required())
                .column(Column::text("kind", 10)),
        )
        .versioned()
        .soft_delete();

    let company = DocType::new(COMPANY)
        .column(Column::text("name", 40).required())
        .column(Column::text("city", 40))
        .order_by("name", false);

    let mut schema = Schema::new()
        .with_type(person)
        .and_then(|s| s.with_type(company))
        .expect("fixture schema is valid");
    schema.freeze().expect("fixture schema freezes");
    schema
}

/// Lifecycle hooks of [`PERSON`].
///
/// `before_write` fills `full_name` from `first` and `last`;
/// `after_change` records every event.
#[derive(Debug, Default)]
pub struct PersonHooks {
    events: Mutex<Vec<ChangeEvent>>,
    before_writes: AtomicUsize,
}

impl PersonHooks {
    /// Creates hooks with nothing recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded change events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    /// Number of `before_write` calls, sub-document rows included.
    #[must_use]
    pub fn before_writes(&self) -> usize {
        self.before_writes.load(Ordering::SeqCst)
    }

    /// Forgets recorded events and calls.
    pub fn clear(&self) {
        self.events.lock().clear();
        self.before_writes.store(0, Ordering::SeqCst);
    }
}

impl DocumentHooks for PersonHooks {
    fn before_write(&self, ctx: &mut BeforeWriteContext<'_>) -> CoreResult<()> {
        self.before_writes.fetch_add(1, Ordering::SeqCst);
        if ctx.sub_type.is_some() {
            return Ok(());
        }
        let first = ctx.get("first")?.as_text().unwrap_or_default().to_string();
        let last = ctx.get("last")?.as_text().unwrap_or_default().to_string();
        let full = format!("{first} {last}").trim().to_string();
        ctx.set("full_name", full)
    }

    fn after_change(&self, event: &ChangeEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Options for opening a [`TestStore`].
#[derive(Default)]
pub struct TestStoreBuilder {
    config: Config,
    backend: Option<Arc<dyn RowStore>>,
    locks: Option<Arc<LongLockRegistry>>,
    blob_config: BlobStoreConfig,
    filters: Vec<Arc<dyn PermissionFilter>>,
}

impl TestStoreBuilder {
    /// Sets the store configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Opens over an existing backend instead of a fresh in-memory one.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn RowStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Shares a long lock registry.
    #[must_use]
    pub fn long_locks(mut self, locks: Arc<LongLockRegistry>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Configures the blob store.
    #[must_use]
    pub fn blob_config(mut self, config: BlobStoreConfig) -> Self {
        self.blob_config = config;
        self
    }

    /// Adds a permission filter after the recording one.
    #[must_use]
    pub fn filter(mut self, filter: Arc<dyn PermissionFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Opens the store.
    ///
    /// # Panics
    ///
    /// Panics if the store cannot be opened.
    #[must_use]
    pub fn open(self) -> TestStore {
        let backend: Arc<dyn RowStore> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(InMemoryRowStore::new()),
        };
        let filter = Arc::new(RecordingFilter::new());
        let hooks = Arc::new(PersonHooks::new());

        let mut builder = DocumentStore::builder(people_schema(), Arc::clone(&backend))
            .config(self.config)
            .blob_config(self.blob_config)
            .permission_filter(filter.clone())
            .hooks(PERSON, hooks.clone());
        for extra in self.filters {
            builder = builder.permission_filter(extra);
        }
        if let Some(locks) = self.locks {
            builder = builder.long_locks(locks);
        }

        TestStore {
            store: builder.open().expect("Failed to open test store"),
            backend,
            filter,
            hooks,
        }
    }
}

/// A document store over the fixture schema.
pub struct TestStore {
    /// The store.
    pub store: DocumentStore,
    /// The backend the store writes to.
    pub backend: Arc<dyn RowStore>,
    /// Records every permission check.
    pub filter: Arc<RecordingFilter>,
    /// Hooks registered for [`PERSON`].
    pub hooks: Arc<PersonHooks>,
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStore {
    /// Opens a store with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().open()
    }

    /// Opens a store with a custom configuration.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::builder().config(config).open()
    }

    /// Starts building a store.
    #[must_use]
    pub fn builder() -> TestStoreBuilder {
        TestStoreBuilder::default()
    }

    /// Commits a new person and returns its identifier.
    ///
    /// # Panics
    ///
    /// Panics if the apply fails.
    pub fn add_person(&self, first: &str, last: &str) -> i64 {
        let mut ws = self.store.working_set();
        let id = ws.insert(PERSON).expect("insert person");
        {
            let mut doc = ws.doc_mut(PERSON, id).expect("new person is writable");
            doc.set("first", first).expect("set first");
            doc.set("last", last).expect("set last");
        }
        let report = ws.apply().expect("apply person");
        report.id_of(id).expect("person was inserted")
    }

    /// Commits a new company and returns its identifier.
    ///
    /// # Panics
    ///
    /// Panics if the apply fails.
    pub fn add_company(&self, name: &str) -> i64 {
        let mut ws = self.store.working_set();
        let id = ws.insert(COMPANY).expect("insert company");
        ws.doc_mut(COMPANY, id)
            .expect("new company is writable")
            .set("name", name)
            .expect("set name");
        let report = ws.apply().expect("apply company");
        report.id_of(id).expect("company was inserted")
    }

    /// Reads one committed column.
    ///
    /// # Panics
    ///
    /// Panics if the document or column does not exist.
    #[must_use]
    pub fn value(&self, doc_type: &str, id: i64, column: &str) -> Value {
        let def = self
            .store
            .schema()
            .doc_type(doc_type)
            .expect("known document type")
            .table();
        let index = def.require_column(column).expect("known column");
        let mut values = self
            .store
            .read(doc_type, id)
            .expect("read document")
            .expect("document exists");
        values.swap_remove(index)
    }

    /// Reads one committed text column.
    ///
    /// # Panics
    ///
    /// See [`TestStore::value`].
    #[must_use]
    pub fn text(&self, doc_type: &str, id: i64, column: &str) -> Option<String> {
        self.value(doc_type, id, column).as_text().map(str::to_string)
    }

    /// Reads one committed reference column.
    ///
    /// # Panics
    ///
    /// See [`TestStore::value`].
    #[must_use]
    pub fn reference(&self, doc_type: &str, id: i64, column: &str) -> Option<RowId> {
        self.value(doc_type, id, column).as_id()
    }
}

impl std::ops::Deref for TestStore {
    type Target = DocumentStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Values of a working-set document as an owned vector, for comparisons.
pub fn snapshot_values(values: &dyn RowValues) -> Vec<Value> {
    (0..values.table().columns().len())
        .map(|c| values.value(c).clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docset_core::DocState;

    #[test]
    fn fixture_schema_freezes() {
        let schema = people_schema();
        assert!(schema.is_frozen());
        let person = schema.doc_type(PERSON).unwrap();
        assert!(person.is_versioned());
        assert!(person.tracks_deletion());
        assert!(!schema.doc_type(COMPANY).unwrap().is_versioned());
    }

    #[test]
    fn hooks_fill_full_name() {
        let fixture = TestStore::new();
        let id = fixture.add_person("Ada", "Lovelace");
        assert_eq!(
            fixture.text(PERSON, id, "full_name").as_deref(),
            Some("Ada Lovelace")
        );
        let events = fixture.hooks.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, DocState::Insert);
        assert_eq!(events[0].version, Some(1));
    }

    #[test]
    fn company_helper_commits() {
        let fixture = TestStore::new();
        let id = fixture.add_company("Analytical Engines");
        assert_eq!(fixture.count(COMPANY).unwrap(), 1);
        assert_eq!(
            fixture.text(COMPANY, id, "name").as_deref(),
            Some("Analytical Engines")
        );
    }
}
