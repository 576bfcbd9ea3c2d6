//! Document type schema.
//!
//! A [`Schema`] is assembled from [`DocType`] declarations, frozen (which
//! cross-validates it once) and then bound to a row store, which creates the
//! physical tables and assigns their identifiers.

mod table;
mod validate;

pub use table::{Column, ColumnKind, DocType, OrderBy, TableDef, VarRefColumns, VarRefDecl};

use crate::error::{CoreError, CoreResult};
use docset_storage::{RowStore, TableId, TableSpec};
use std::collections::HashMap;
use tracing::debug;

/// Version number column of versioned document tables.
pub const VERSION_COLUMN: &str = "_version";

/// Deletion flag column of soft-delete document tables.
pub const DELETED_COLUMN: &str = "_deleted";

/// Parent document column of sub-document tables.
pub const PARENT_COLUMN: &str = "_doc_id";

/// Position of a table inside the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableLoc {
    /// Index of the document type.
    pub doc: usize,
    /// Index of the sub-document type, `None` for the main table.
    pub sub: Option<usize>,
}

impl TableLoc {
    /// Location of a document type's main table.
    #[must_use]
    pub const fn doc(doc: usize) -> Self {
        Self { doc, sub: None }
    }

    /// Location of a sub-document table.
    #[must_use]
    pub const fn sub(doc: usize, sub: usize) -> Self {
        Self { doc, sub: Some(sub) }
    }
}

#[derive(Debug, Default)]
struct Binding {
    ids: HashMap<TableLoc, TableId>,
    locs: HashMap<TableId, TableLoc>,
}

/// A set of document types.
#[derive(Debug, Default)]
pub struct Schema {
    types: Vec<DocType>,
    frozen: bool,
    binding: Option<Binding>,
}

impl Schema {
    /// Creates an empty, mutable schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaFrozen`] once the schema is frozen.
    pub fn add_type(&mut self, doc_type: DocType) -> CoreResult<()> {
        if self.frozen {
            return Err(CoreError::SchemaFrozen);
        }
        self.types.push(doc_type);
        Ok(())
    }

    /// Builder form of [`Schema::add_type`] for mutable schemas.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaFrozen`] once the schema is frozen.
    pub fn with_type(mut self, doc_type: DocType) -> CoreResult<Self> {
        self.add_type(doc_type)?;
        Ok(self)
    }

    /// Validates the schema and makes it read-only.
    ///
    /// Validation runs on the first call only; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaValidation`] naming the offending type and
    /// column. The schema stays mutable in that case.
    pub fn freeze(&mut self) -> CoreResult<()> {
        if self.frozen {
            return Ok(());
        }
        validate::validate(&self.types)?;
        self.frozen = true;
        debug!(types = self.types.len(), "schema frozen");
        Ok(())
    }

    /// Checks if the schema is frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Fails unless the schema is frozen.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaNotFrozen`].
    pub fn ensure_frozen(&self) -> CoreResult<()> {
        if self.frozen {
            Ok(())
        } else {
            Err(CoreError::SchemaNotFrozen)
        }
    }

    /// Returns all document types in declaration order.
    #[must_use]
    pub fn doc_types(&self) -> &[DocType] {
        &self.types
    }

    /// Finds a document type by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`].
    pub fn doc_type_index(&self, name: &str) -> CoreResult<usize> {
        self.types
            .iter()
            .position(|d| d.name() == name)
            .ok_or_else(|| CoreError::UnknownDocType {
                name: name.to_string(),
            })
    }

    /// Returns a document type by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`].
    pub fn doc_type(&self, name: &str) -> CoreResult<&DocType> {
        Ok(&self.types[self.doc_type_index(name)?])
    }

    /// Finds the location of a document or sub-document table by name.
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<TableLoc> {
        self.types.iter().enumerate().find_map(|(doc, d)| {
            if d.name() == name {
                Some(TableLoc::doc(doc))
            } else {
                d.sub_index(name).map(|sub| TableLoc::sub(doc, sub))
            }
        })
    }

    /// Returns the declaration at a location.
    ///
    /// # Panics
    ///
    /// Panics if the location does not come from this schema.
    #[must_use]
    pub fn table_def(&self, loc: TableLoc) -> &TableDef {
        let doc = &self.types[loc.doc];
        match loc.sub {
            Some(sub) => &doc.subs()[sub],
            None => doc.table(),
        }
    }

    /// Physical layout of the table at a location.
    #[must_use]
    pub fn table_spec(&self, loc: TableLoc) -> TableSpec {
        let def = self.table_def(loc);
        let mut spec = TableSpec::new(def.name());
        if loc.sub.is_some() {
            spec = spec.column(PARENT_COLUMN);
        }
        for column in def.columns() {
            spec = spec.column(column.name.clone());
        }
        if loc.sub.is_none() {
            let doc = &self.types[loc.doc];
            if doc.is_versioned() {
                spec = spec.column(VERSION_COLUMN);
            }
            if doc.tracks_deletion() {
                spec = spec.column(DELETED_COLUMN);
            }
        }
        spec
    }

    /// Creates (or alters) the physical tables and records their
    /// identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaNotFrozen`] for a mutable schema, or a
    /// storage error.
    pub fn bind(&mut self, store: &dyn RowStore) -> CoreResult<()> {
        self.ensure_frozen()?;
        let mut binding = Binding::default();
        for (doc, d) in self.types.iter().enumerate() {
            let locs = std::iter::once(TableLoc::doc(doc))
                .chain((0..d.subs().len()).map(|sub| TableLoc::sub(doc, sub)));
            for loc in locs {
                let id = store.create_table(&self.table_spec(loc))?;
                binding.ids.insert(loc, id);
                binding.locs.insert(id, loc);
            }
        }
        debug!(tables = binding.ids.len(), "schema bound to storage");
        self.binding = Some(binding);
        Ok(())
    }

    /// Checks if the schema has been bound to storage.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    fn binding(&self) -> CoreResult<&Binding> {
        self.binding.as_ref().ok_or(CoreError::SchemaNotInitialized)
    }

    /// Returns the storage identifier of a location.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaNotInitialized`] before binding.
    pub fn table_id(&self, loc: TableLoc) -> CoreResult<TableId> {
        self.binding()?
            .ids
            .get(&loc)
            .copied()
            .ok_or_else(|| CoreError::invalid_request("table location outside the schema"))
    }

    /// Returns the storage identifier of a document or sub-document table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaNotInitialized`] before binding, or
    /// [`CoreError::UnknownDocType`] for an unknown name.
    pub fn resolve_table_id(&self, name: &str) -> CoreResult<TableId> {
        let binding = self.binding()?;
        let loc = self.locate(name).ok_or_else(|| CoreError::UnknownDocType {
            name: name.to_string(),
        })?;
        Ok(binding.ids[&loc])
    }

    /// Returns the location of a table identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaNotInitialized`] before binding, or an
    /// invalid request error for a foreign identifier.
    pub fn resolve_location(&self, id: TableId) -> CoreResult<TableLoc> {
        self.binding()?
            .locs
            .get(&id)
            .copied()
            .ok_or_else(|| CoreError::invalid_request(format!("{id} is not part of the schema")))
    }

    /// Returns the declaration of the table with this identifier.
    ///
    /// # Errors
    ///
    /// See [`Schema::resolve_location`].
    pub fn resolve_type_by_table_id(&self, id: TableId) -> CoreResult<&TableDef> {
        Ok(self.table_def(self.resolve_location(id)?))
    }
}
