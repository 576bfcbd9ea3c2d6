//! Document working sets.
//!
//! A [`WorkingSet`] is the in-memory batch of documents under edit. Items
//! enter it through [`WorkingSet::insert`], [`WorkingSet::view`],
//! [`WorkingSet::edit`] and [`WorkingSet::delete`]; each entry consults the
//! permission filters before the working set changes. Nothing reaches
//! storage until [`WorkingSet::apply`].
//!
//! A working set is used from one thread at a time. Any number of working
//! sets may share a [`DocumentStore`].

mod group;
mod item;

pub use group::{DocGroup, DocGroupMut};
pub use item::{ItemValues, ItemValuesMut};
pub(crate) use item::{DocItem, SubItem};

use crate::access::PermissionReason;
use crate::apply::reference_target;
use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::locks::LockToken;
use crate::row_values::{decode_row, RowValuesMut};
use crate::schema::{DocType, Schema, TableLoc};
use crate::store::{stored_deleted, stored_version, DocumentStore};
use crate::types::{DocIdentity, DocState, PendingId, RowId};
use crate::value::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// The in-memory batch of documents under edit.
pub struct WorkingSet<'s> {
    pub(crate) store: &'s DocumentStore,
    /// One collection per document type, in schema order.
    pub(crate) sets: Vec<Vec<DocItem>>,
    next_pending: u64,
    /// Idempotency key of the next apply.
    pub(crate) request_id: Uuid,
    pub(crate) lock_tokens: Vec<LockToken>,
}

impl std::fmt::Debug for WorkingSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingSet")
            .field("items", &self.len())
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

enum Staged {
    Existing(usize),
    Loaded(Box<DocItem>),
}

impl<'s> WorkingSet<'s> {
    pub(crate) fn new(store: &'s DocumentStore) -> Self {
        Self {
            store,
            sets: vec![Vec::new(); store.schema().doc_types().len()],
            next_pending: 1,
            request_id: Uuid::new_v4(),
            lock_tokens: Vec::new(),
        }
    }

    /// Returns the store this working set belongs to.
    #[must_use]
    pub fn store(&self) -> &'s DocumentStore {
        self.store
    }

    /// Idempotency key the next apply will record.
    ///
    /// The key changes only after an apply succeeds, so retrying a failed
    /// apply reuses it.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Number of documents in the working set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }

    /// Checks if the working set holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(Vec::is_empty)
    }

    fn doc_index(&self, doc_type: &str) -> CoreResult<usize> {
        self.store.schema().doc_type_index(doc_type)
    }

    fn doc_type_def(&self, doc: usize) -> &'s DocType {
        let store = self.store;
        &store.schema().doc_types()[doc]
    }

    pub(crate) fn position(&self, doc: usize, id: RowId) -> Option<usize> {
        self.sets[doc].iter().position(|item| item.id == id)
    }

    fn require(&self, doc: usize, id: RowId) -> CoreResult<usize> {
        self.position(doc, id).ok_or_else(|| {
            CoreError::invalid_request(format!(
                "{} {id} is not in the working set",
                self.doc_type_def(doc).name()
            ))
        })
    }

    fn allocate(&mut self) -> RowId {
        let id = PendingId::new(self.next_pending);
        self.next_pending += 1;
        RowId::Pending(id)
    }

    fn check_permission(
        &self,
        reason: PermissionReason,
        doc: usize,
        id: RowId,
        values: &[Value],
    ) -> CoreResult<()> {
        let def = self.doc_type_def(doc);
        self.store.permissions().check(
            reason,
            def.name(),
            id,
            &ItemValues::new(def.table(), values, reason.is_read_only()),
        )
    }

    fn check_locks(&self, doc: usize, ids: impl IntoIterator<Item = i64>) -> CoreResult<()> {
        if !self.store.config().check_long_locks {
            return Ok(());
        }
        let table = self.store.schema().table_id(TableLoc::doc(doc))?;
        let identities: Vec<_> = ids
            .into_iter()
            .map(|id| DocIdentity::new(table, id))
            .collect();
        self.store
            .long_locks()
            .check(&identities, &self.lock_tokens)
    }

    /// Loads a committed document with its sub-documents, in View state.
    pub(crate) fn load(&self, doc: usize, id: i64) -> CoreResult<DocItem> {
        let def = self.doc_type_def(doc);
        let row = self
            .store
            .load_row(doc, id)?
            .ok_or_else(|| CoreError::DocumentNotFound {
                doc_type: def.name().to_string(),
                id,
            })?;
        let values = decode_row(def.table(), &row);

        let mut item = DocItem::new_insert(RowId::Persisted(id), values.clone(), def.subs().len());
        item.state = DocState::View;
        item.original = Some(values);
        item.version = stored_version(&row);
        item.fingerprint = Some(codec::fingerprint(&row)?);
        item.soft_deleted = stored_deleted(&row);

        for (sub, sub_def) in def.subs().iter().enumerate() {
            for (sub_id, sub_row) in self.store.load_sub_rows(doc, sub, id)? {
                let values = decode_row(sub_def, &sub_row);
                item.subs[sub].rows.push(SubItem {
                    id: RowId::Persisted(sub_id),
                    values: values.clone(),
                    original: Some(values),
                });
            }
        }
        Ok(item)
    }

    /// Creates a new document and returns its pending identifier.
    ///
    /// Fires [`PermissionReason::BeforeInsert`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`] or [`CoreError::AccessDenied`].
    pub fn insert(&mut self, doc_type: &str) -> CoreResult<RowId> {
        let doc = self.doc_index(doc_type)?;
        let def = self.doc_type_def(doc);
        let id = self.allocate();
        let item = DocItem::new_insert(id, def.table().empty_values(), def.subs().len());
        self.check_permission(PermissionReason::BeforeInsert, doc, id, &item.values)?;
        debug!(doc_type, %id, "document inserted");
        self.sets[doc].push(item);
        Ok(id)
    }

    /// Loads documents read-only.
    ///
    /// Fires [`PermissionReason::View`] for every document not yet in the
    /// working set. Nothing is added unless every document passes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] or [`CoreError::AccessDenied`].
    pub fn view(&mut self, doc_type: &str, ids: &[i64]) -> CoreResult<()> {
        let doc = self.doc_index(doc_type)?;
        let mut staged: Vec<DocItem> = Vec::new();
        for &id in ids {
            let row_id = RowId::Persisted(id);
            if self.position(doc, row_id).is_some() || staged.iter().any(|i| i.id == row_id) {
                continue;
            }
            let item = self.load(doc, id)?;
            self.check_permission(PermissionReason::View, doc, row_id, &item.values)?;
            staged.push(item);
        }
        debug!(doc_type, count = staged.len(), "documents viewed");
        self.sets[doc].extend(staged);
        Ok(())
    }

    fn fire_edit(&self, doc: usize, item: &DocItem) -> CoreResult<()> {
        if item.soft_deleted {
            self.check_permission(PermissionReason::BeforeRestore, doc, item.id, &item.values)?;
        }
        self.check_permission(PermissionReason::BeforeEdit, doc, item.id, &item.values)
    }

    /// Opens documents for modification.
    ///
    /// Per document, in order: [`PermissionReason::View`] if it is not yet
    /// in the working set, [`PermissionReason::BeforeRestore`] if it is
    /// soft-deleted, then [`PermissionReason::BeforeEdit`]. Nothing changes
    /// unless every document passes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockConflict`] if another long lock covers a
    /// document, [`CoreError::AccessDenied`], or an invalid request error
    /// for a document marked for deletion.
    pub fn edit(&mut self, doc_type: &str, ids: &[i64]) -> CoreResult<()> {
        let doc = self.doc_index(doc_type)?;
        self.check_locks(doc, ids.iter().copied())?;

        let mut staged = Vec::new();
        let mut seen = Vec::new();
        for &id in ids {
            let row_id = RowId::Persisted(id);
            if seen.contains(&row_id) {
                continue;
            }
            seen.push(row_id);
            match self.position(doc, row_id) {
                Some(pos) => {
                    let item = &self.sets[doc][pos];
                    match item.state {
                        DocState::Edit => {}
                        DocState::View => {
                            self.fire_edit(doc, item)?;
                            staged.push(Staged::Existing(pos));
                        }
                        state => {
                            return Err(CoreError::invalid_request(format!(
                                "{doc_type} {id} is in {state} state"
                            )))
                        }
                    }
                }
                None => {
                    let item = self.load(doc, id)?;
                    self.check_permission(PermissionReason::View, doc, row_id, &item.values)?;
                    self.fire_edit(doc, &item)?;
                    staged.push(Staged::Loaded(Box::new(item)));
                }
            }
        }

        for target in staged {
            match target {
                Staged::Existing(pos) => self.sets[doc][pos].state = DocState::Edit,
                Staged::Loaded(mut item) => {
                    item.state = DocState::Edit;
                    self.sets[doc].push(*item);
                }
            }
        }
        debug!(doc_type, count = ids.len(), "documents opened for edit");
        Ok(())
    }

    /// Marks documents for deletion.
    ///
    /// Pending documents are simply dropped from the working set. For
    /// persisted documents [`PermissionReason::View`] fires if the document
    /// is not yet loaded, then [`PermissionReason::BeforeDelete`]. Pending
    /// edits of a deleted document are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockConflict`], [`CoreError::AccessDenied`], or
    /// an invalid request error for a document already soft-deleted.
    pub fn delete(&mut self, doc_type: &str, ids: &[RowId]) -> CoreResult<()> {
        let doc = self.doc_index(doc_type)?;
        self.check_locks(doc, ids.iter().filter_map(|id| id.persisted()))?;

        let mut staged = Vec::new();
        let mut dropped = Vec::new();
        let mut seen = Vec::new();
        for &id in ids {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            let already_deleted = || {
                CoreError::invalid_request(format!("{doc_type} {id} is already deleted"))
            };
            match (id, self.position(doc, id)) {
                (RowId::Pending(_), Some(_)) => dropped.push(id),
                (RowId::Pending(_), None) => {
                    self.require(doc, id)?;
                }
                (RowId::Persisted(_), Some(pos)) => {
                    let item = &self.sets[doc][pos];
                    if item.state == DocState::Delete {
                        continue;
                    }
                    if item.soft_deleted {
                        return Err(already_deleted());
                    }
                    let original = item.original.as_deref().unwrap_or(&item.values);
                    self.check_permission(PermissionReason::BeforeDelete, doc, id, original)?;
                    staged.push(Staged::Existing(pos));
                }
                (RowId::Persisted(raw), None) => {
                    let item = self.load(doc, raw)?;
                    if item.soft_deleted {
                        return Err(already_deleted());
                    }
                    self.check_permission(PermissionReason::View, doc, id, &item.values)?;
                    self.check_permission(PermissionReason::BeforeDelete, doc, id, &item.values)?;
                    staged.push(Staged::Loaded(Box::new(item)));
                }
            }
        }

        for target in staged {
            match target {
                Staged::Existing(pos) => {
                    let item = &mut self.sets[doc][pos];
                    item.state = DocState::Delete;
                    if let Some(original) = &item.original {
                        item.values.clone_from(original);
                    }
                }
                Staged::Loaded(mut item) => {
                    item.state = DocState::Delete;
                    self.sets[doc].push(*item);
                }
            }
        }
        self.sets[doc].retain(|item| !dropped.contains(&item.id));
        debug!(doc_type, count = ids.len(), "documents marked for deletion");
        Ok(())
    }

    /// Switches documents already in the working set to another state.
    ///
    /// [`DocState::Edit`] and [`DocState::Delete`] behave like
    /// [`WorkingSet::edit`] and [`WorkingSet::delete`]. [`DocState::View`]
    /// discards pending changes by reloading the documents.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error for documents not in the working
    /// set, for pending documents, or for an unsupported target state.
    pub fn change_state(&mut self, doc_type: &str, ids: &[RowId], state: DocState) -> CoreResult<()> {
        let doc = self.doc_index(doc_type)?;
        let mut persisted = Vec::with_capacity(ids.len());
        for &id in ids {
            self.require(doc, id)?;
            persisted.push(id.persisted().ok_or_else(|| {
                CoreError::invalid_request(format!("{doc_type} {id} is not persisted yet"))
            })?);
        }

        match state {
            DocState::Edit => self.edit(doc_type, &persisted),
            DocState::Delete => self.delete(doc_type, ids),
            DocState::View => {
                let mut fresh = Vec::with_capacity(persisted.len());
                for &id in &persisted {
                    fresh.push(self.load(doc, id)?);
                }
                for item in fresh {
                    if let Some(pos) = self.position(doc, item.id) {
                        self.sets[doc][pos] = item;
                    }
                }
                Ok(())
            }
            DocState::Insert | DocState::Mixed => Err(CoreError::invalid_request(format!(
                "cannot switch documents to {state} state"
            ))),
        }
    }

    /// Duplicates documents of the working set, with their sub-documents,
    /// into new pending documents.
    ///
    /// References from a copied document to its own sub-documents are
    /// redirected to the copies. Fires [`PermissionReason::BeforeInsert`]
    /// per copy; nothing is added unless every copy passes.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error for documents not in the working set
    /// or marked for deletion, or [`CoreError::AccessDenied`].
    pub fn insert_copy(&mut self, doc_type: &str, ids: &[RowId]) -> CoreResult<Vec<RowId>> {
        let doc = self.doc_index(doc_type)?;
        let mut copies = Vec::with_capacity(ids.len());
        for &id in ids {
            let pos = self.require(doc, id)?;
            let source = self.sets[doc][pos].clone();
            if source.state == DocState::Delete {
                return Err(CoreError::invalid_request(format!(
                    "{doc_type} {id} is marked for deletion"
                )));
            }

            let new_id = self.allocate();
            let mut item = DocItem::new_insert(new_id, source.values, source.subs.len());
            let mut remap = HashMap::new();
            for (sub, set) in source.subs.into_iter().enumerate() {
                for row in set.rows {
                    let row_id = self.allocate();
                    remap.insert((TableLoc::sub(doc, sub), row.id), row_id);
                    item.subs[sub].rows.push(SubItem {
                        id: row_id,
                        values: row.values,
                        original: None,
                    });
                }
            }
            let schema = self.store.schema();
            remap_copied_refs(schema, TableLoc::doc(doc), &mut item.values, &remap);
            for (sub, set) in item.subs.iter_mut().enumerate() {
                for row in &mut set.rows {
                    remap_copied_refs(schema, TableLoc::sub(doc, sub), &mut row.values, &remap);
                }
            }
            self.check_permission(PermissionReason::BeforeInsert, doc, new_id, &item.values)?;
            copies.push(item);
        }

        let new_ids = copies.iter().map(|item| item.id).collect();
        self.sets[doc].extend(copies);
        Ok(new_ids)
    }

    /// Discards every document without touching storage.
    pub fn clear(&mut self) {
        for set in &mut self.sets {
            set.clear();
        }
    }

    /// Discards the documents in View state.
    pub fn clear_view(&mut self) {
        for set in &mut self.sets {
            set.retain(|item| item.state != DocState::View);
        }
    }

    /// Identifiers of the documents of a type, in working-set order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`].
    pub fn ids(&self, doc_type: &str) -> CoreResult<Vec<RowId>> {
        let doc = self.doc_index(doc_type)?;
        Ok(self.sets[doc].iter().map(|item| item.id).collect())
    }

    /// State of one document, `None` if it is not in the working set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`].
    pub fn item_state(&self, doc_type: &str, id: RowId) -> CoreResult<Option<DocState>> {
        let doc = self.doc_index(doc_type)?;
        Ok(self.position(doc, id).map(|pos| self.sets[doc][pos].state))
    }

    /// Common state of the documents of a type, or [`DocState::Mixed`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`].
    pub fn doc_state(&self, doc_type: &str) -> CoreResult<Option<DocState>> {
        let doc = self.doc_index(doc_type)?;
        Ok(DocState::combine(self.sets[doc].iter().map(|i| i.state)))
    }

    /// Like [`WorkingSet::doc_state`], ignoring documents in View state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownDocType`].
    pub fn doc_state_no_view(&self, doc_type: &str) -> CoreResult<Option<DocState>> {
        let doc = self.doc_index(doc_type)?;
        Ok(DocState::combine(
            self.sets[doc]
                .iter()
                .map(|i| i.state)
                .filter(|s| *s != DocState::View),
        ))
    }

    /// Common state of a group of documents, or [`DocState::Mixed`].
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if a document is not in the
    /// working set.
    pub fn group_state(&self, doc_type: &str, ids: &[RowId]) -> CoreResult<Option<DocState>> {
        let doc = self.doc_index(doc_type)?;
        let states = ids
            .iter()
            .map(|id| Ok(self.sets[doc][self.require(doc, *id)?].state))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(DocState::combine(states))
    }

    /// Common state of every document in the working set.
    #[must_use]
    pub fn state(&self) -> Option<DocState> {
        DocState::combine(self.sets.iter().flatten().map(|i| i.state))
    }

    /// Like [`WorkingSet::state`], ignoring documents in View state.
    #[must_use]
    pub fn state_no_view(&self) -> Option<DocState> {
        DocState::combine(
            self.sets
                .iter()
                .flatten()
                .map(|i| i.state)
                .filter(|s| *s != DocState::View),
        )
    }

    /// Reads a document.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if it is not in the working set.
    pub fn doc(&self, doc_type: &str, id: RowId) -> CoreResult<ItemValues<'_>> {
        let doc = self.doc_index(doc_type)?;
        let item = &self.sets[doc][self.require(doc, id)?];
        Ok(ItemValues::new(
            self.doc_type_def(doc).table(),
            &item.values,
            !item.state.is_writable(),
        ))
    }

    /// Modifies a document in Insert or Edit state.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if it is not in the working set or
    /// in another state.
    pub fn doc_mut(&mut self, doc_type: &str, id: RowId) -> CoreResult<ItemValuesMut<'_>> {
        let doc = self.doc_index(doc_type)?;
        let pos = self.require(doc, id)?;
        let table = self.doc_type_def(doc).table();
        let item = &mut self.sets[doc][pos];
        if !item.state.is_writable() {
            return Err(CoreError::invalid_request(format!(
                "{doc_type} {id} is in {} state",
                item.state
            )));
        }
        Ok(ItemValuesMut::new(table, &mut item.values))
    }

    /// Reads several documents as one group.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error for an empty group or a document
    /// not in the working set.
    pub fn group(&self, doc_type: &str, ids: &[RowId]) -> CoreResult<DocGroup<'_>> {
        let doc = self.doc_index(doc_type)?;
        if ids.is_empty() {
            return Err(CoreError::invalid_request("a group needs at least one document"));
        }
        let mut rows = Vec::with_capacity(ids.len());
        let mut read_only = false;
        for id in ids {
            let item = &self.sets[doc][self.require(doc, *id)?];
            read_only |= !item.state.is_writable();
            rows.push(item.values.as_slice());
        }
        Ok(DocGroup::new(self.doc_type_def(doc).table(), rows, read_only))
    }

    /// Modifies several documents in Insert or Edit state as one group.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error for an empty group or a document
    /// not in the working set or in another state.
    pub fn group_mut(&mut self, doc_type: &str, ids: &[RowId]) -> CoreResult<DocGroupMut<'_>> {
        let doc = self.doc_index(doc_type)?;
        if ids.is_empty() {
            return Err(CoreError::invalid_request("a group needs at least one document"));
        }
        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            let pos = self.require(doc, *id)?;
            let state = self.sets[doc][pos].state;
            if !state.is_writable() {
                return Err(CoreError::invalid_request(format!(
                    "{doc_type} {id} is in {state} state"
                )));
            }
            positions.push(pos);
        }
        let table = self.doc_type_def(doc).table();
        let mut slots: Vec<Option<&mut DocItem>> = self.sets[doc].iter_mut().map(Some).collect();
        let rows = positions
            .into_iter()
            .filter_map(|pos| slots[pos].take())
            .map(|item| &mut item.values)
            .collect();
        Ok(DocGroupMut::new(table, rows))
    }

    fn sub_location(&self, doc_type: &str, id: RowId, sub: &str) -> CoreResult<(usize, usize, usize)> {
        let doc = self.doc_index(doc_type)?;
        let sub_index = self.doc_type_def(doc).sub_index(sub).ok_or_else(|| {
            CoreError::UnknownDocType {
                name: format!("{doc_type}.{sub}"),
            }
        })?;
        Ok((doc, self.require(doc, id)?, sub_index))
    }

    fn writable_parent(&self, doc: usize, pos: usize) -> CoreResult<()> {
        let item = &self.sets[doc][pos];
        if item.state.is_writable() {
            Ok(())
        } else {
            Err(CoreError::invalid_request(format!(
                "sub-documents of {} {} cannot change in {} state",
                self.doc_type_def(doc).name(),
                item.id,
                item.state
            )))
        }
    }

    /// Identifiers of a document's sub-documents of one type.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown sub-document type or a document not
    /// in the working set.
    pub fn sub_ids(&self, doc_type: &str, id: RowId, sub: &str) -> CoreResult<Vec<RowId>> {
        let (doc, pos, sub) = self.sub_location(doc_type, id, sub)?;
        Ok(self.sets[doc][pos].subs[sub].rows.iter().map(|r| r.id).collect())
    }

    /// Adds a sub-document to a document in Insert or Edit state.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the document is in another
    /// state.
    pub fn sub_insert(&mut self, doc_type: &str, id: RowId, sub: &str) -> CoreResult<RowId> {
        let (doc, pos, sub) = self.sub_location(doc_type, id, sub)?;
        self.writable_parent(doc, pos)?;
        let values = self.doc_type_def(doc).subs()[sub].empty_values();
        let row_id = self.allocate();
        self.sets[doc][pos].subs[sub].rows.push(SubItem {
            id: row_id,
            values,
            original: None,
        });
        Ok(row_id)
    }

    /// Removes a sub-document from a document in Insert or Edit state.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the document is in another state
    /// or the row does not belong to it.
    pub fn sub_delete(&mut self, doc_type: &str, id: RowId, sub: &str, row: RowId) -> CoreResult<()> {
        let (doc, pos, sub) = self.sub_location(doc_type, id, sub)?;
        self.writable_parent(doc, pos)?;
        let set = &mut self.sets[doc][pos].subs[sub];
        let index = set.position(row).ok_or_else(|| {
            CoreError::invalid_request(format!("{row} is not a sub-document of {doc_type} {id}"))
        })?;
        set.rows.remove(index);
        if let RowId::Persisted(raw) = row {
            set.removed.push(raw);
        }
        Ok(())
    }

    /// Reads a sub-document.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the row does not belong to the
    /// document.
    pub fn sub_row(&self, doc_type: &str, id: RowId, sub: &str, row: RowId) -> CoreResult<ItemValues<'_>> {
        let (doc, pos, sub) = self.sub_location(doc_type, id, sub)?;
        let item = &self.sets[doc][pos];
        let set = &item.subs[sub];
        let index = set.position(row).ok_or_else(|| {
            CoreError::invalid_request(format!("{row} is not a sub-document of {doc_type} {id}"))
        })?;
        Ok(ItemValues::new(
            &self.doc_type_def(doc).subs()[sub],
            &set.rows[index].values,
            !item.state.is_writable(),
        ))
    }

    /// Modifies a sub-document of a document in Insert or Edit state.
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if the document is in another state
    /// or the row does not belong to it.
    pub fn sub_row_mut(
        &mut self,
        doc_type: &str,
        id: RowId,
        sub: &str,
        row: RowId,
    ) -> CoreResult<ItemValuesMut<'_>> {
        let (doc, pos, sub) = self.sub_location(doc_type, id, sub)?;
        self.writable_parent(doc, pos)?;
        let table = &self.doc_type_def(doc).subs()[sub];
        let set = &mut self.sets[doc][pos].subs[sub];
        let index = set.position(row).ok_or_else(|| {
            CoreError::invalid_request(format!("{row} is not a sub-document of {doc_type} {id}"))
        })?;
        Ok(ItemValuesMut::new(table, &mut set.rows[index].values))
    }

    /// Points a variable reference of a document at a target, or clears it.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown reference or target type, or if the
    /// document is not writable.
    pub fn set_var_ref(
        &mut self,
        doc_type: &str,
        id: RowId,
        name: &str,
        target: Option<(&str, RowId)>,
    ) -> CoreResult<()> {
        let doc = self.doc_index(doc_type)?;
        let table = self.doc_type_def(doc).table();
        let columns = table
            .var_ref_columns()
            .into_iter()
            .find(|c| c.decl.name == name)
            .ok_or_else(|| CoreError::UnknownColumn {
                table: doc_type.to_string(),
                column: name.to_string(),
            })?;
        let (table_value, row_value) = match target {
            None => (Value::Null, Value::Null),
            Some((target_type, row)) => {
                let table_id = self.store.schema().resolve_table_id(target_type)?;
                (Value::Int(i64::from(table_id.as_u32())), Value::Id(row))
            }
        };
        let mut item = self.doc_mut(doc_type, id)?;
        item.set_value(columns.table_column, table_value)?;
        item.set_value(columns.row_column, row_value)
    }

    /// Acquires a long lock over documents and remembers its token.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockConflict`] if another lock covers one of
    /// the documents.
    pub fn acquire_long_lock(&mut self, doc_type: &str, ids: &[i64]) -> CoreResult<LockToken> {
        let table = self.store.schema().resolve_table_id(doc_type)?;
        let token = self
            .store
            .long_locks()
            .acquire(ids.iter().map(|id| DocIdentity::new(table, *id)))?;
        self.lock_tokens.push(token);
        Ok(token)
    }

    /// Releases a long lock acquired by this working set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownLockToken`] for a token this working set
    /// does not hold.
    pub fn release_long_lock(&mut self, token: LockToken) -> CoreResult<()> {
        let index = self
            .lock_tokens
            .iter()
            .position(|t| *t == token)
            .ok_or(CoreError::UnknownLockToken { token })?;
        self.store.long_locks().release(token)?;
        self.lock_tokens.remove(index);
        Ok(())
    }

    /// Tokens of the long locks held by this working set.
    #[must_use]
    pub fn lock_tokens(&self) -> &[LockToken] {
        &self.lock_tokens
    }
}

/// Redirects references into copied sub-document rows to their copies.
///
/// Only columns whose target table is one of the copied sub-document tables
/// are touched; references into other tables keep their value even when the
/// raw identifier coincides with a copied row.
fn remap_copied_refs(
    schema: &Schema,
    own: TableLoc,
    values: &mut [Value],
    map: &HashMap<(TableLoc, RowId), RowId>,
) {
    for column in 0..values.len() {
        let Value::Id(id) = values[column] else {
            continue;
        };
        let Some(target) = reference_target(schema, own, values, column) else {
            continue;
        };
        if let Some(new_id) = map.get(&(target, id)) {
            values[column] = Value::Id(*new_id);
        }
    }
}

/// Replaces row references found in `map`.
pub(crate) fn remap_values(values: &mut [Value], map: &HashMap<RowId, RowId>) {
    for value in values {
        if let Value::Id(id) = value {
            if let Some(new_id) = map.get(&*id) {
                *id = *new_id;
            }
        }
    }
}
