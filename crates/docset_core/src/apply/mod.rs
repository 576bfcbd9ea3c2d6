//! Change application.
//!
//! [`WorkingSet::apply`] turns the pending edits of a working set into one
//! storage transaction. The stages run in a fixed order:
//!
//! 1. `before_write` hooks recompute calculated columns
//! 2. staged blob payloads are stored and replaced by their identifiers
//! 3. value checks that need no storage access (required columns, variable
//!    reference pairs)
//! 4. inside the transaction: idempotency lookup, long-lock check, conflict
//!    detection, the Apply* permission pass, write ordering, referential
//!    integrity, the writes themselves and the history records
//! 5. after commit: pending identifiers are substituted in the working set,
//!    written documents are reloaded and `after_change` hooks fire
//!
//! Any failure before the commit rolls the transaction back and leaves the
//! working set as it was, so the apply can be retried. A retry that finds its
//! request identifier already committed replays the recorded outcome instead
//! of writing again.

mod conflicts;
mod integrity;
mod order;
mod prepare;
pub(crate) mod requests;
mod write;

pub use requests::REQUESTS_TABLE;

use crate::access::PermissionReason;
use crate::config::ConflictPolicy;
use crate::error::{Conflict, CoreError, CoreResult};
use crate::hooks::ChangeEvent;
use crate::schema::{ColumnKind, Schema, TableLoc};
use crate::types::{DocIdentity, DocState, PendingId, RowId};
use crate::value::Value;
use crate::working_set::{remap_values, ItemValues, WorkingSet};
use chrono::Utc;
use docset_storage::{TableId, WriteTxn};
use requests::RequestRecord;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;
use write::Substitution;

/// Position of a row inside a working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ItemRef {
    pub doc: usize,
    pub item: usize,
    /// Sub-document type and row position, `None` for the document itself.
    pub sub: Option<(usize, usize)>,
}

impl ItemRef {
    pub(crate) const fn doc(doc: usize, item: usize) -> Self {
        Self {
            doc,
            item,
            sub: None,
        }
    }

    pub(crate) const fn sub(doc: usize, item: usize, sub: usize, row: usize) -> Self {
        Self {
            doc,
            item,
            sub: Some((sub, row)),
        }
    }

    pub(crate) const fn loc(self) -> TableLoc {
        match self.sub {
            Some((sub, _)) => TableLoc::sub(self.doc, sub),
            None => TableLoc::doc(self.doc),
        }
    }
}

/// What an apply does to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Insert,
    Edit { restore: bool },
    Delete,
}

/// A document the apply writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub doc: usize,
    pub item: usize,
    pub action: Action,
}

/// A committed document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey {
    /// Document type name.
    pub doc_type: String,
    /// Row identifier.
    pub id: i64,
}

/// Identifier assigned to a row that was pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedId {
    /// Document type name.
    pub doc_type: String,
    /// Sub-document type, for sub-document rows.
    pub sub_type: Option<String>,
    /// Identifier the working set used before the apply.
    pub pending: PendingId,
    /// Identifier generated by storage.
    pub id: i64,
}

/// Outcome of [`WorkingSet::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Groups the history records of this apply; `None` if nothing was
    /// written.
    pub user_action: Option<Uuid>,
    /// Idempotency key the apply was committed under.
    pub request_id: Uuid,
    /// Rows that were inserted.
    pub inserted: Vec<InsertedId>,
    /// Documents that were updated, restores included.
    pub updated: Vec<DocKey>,
    /// Documents that were deleted.
    pub deleted: Vec<DocKey>,
    /// Documents whose deletion flag was cleared.
    pub restored: Vec<DocKey>,
    /// Documents left unwritten under [`ConflictPolicy::SkipConflicting`].
    pub conflicts: Vec<Conflict>,
    /// Whether the outcome was replayed from an earlier commit of the same
    /// request.
    pub replayed: bool,
}

impl ApplyReport {
    /// Returns the identifier assigned to a pending row.
    #[must_use]
    pub fn id_of(&self, id: RowId) -> Option<i64> {
        match id {
            RowId::Persisted(id) => Some(id),
            RowId::Pending(p) => self.inserted.iter().find(|i| i.pending == p).map(|i| i.id),
        }
    }

    /// Checks if the apply wrote nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// A document write, as seen after the commit.
#[derive(Debug, Clone, Copy)]
struct Written {
    target: Target,
    id: i64,
}

struct Committed {
    user_action: Option<Uuid>,
    targets: Vec<Target>,
    substitution: Substitution,
    written: Vec<Written>,
    skipped: HashSet<(usize, i64)>,
    conflicts: Vec<Conflict>,
}

enum Outcome {
    Committed(Committed),
    Replay(RequestRecord),
}

impl WorkingSet<'_> {
    /// Values of a row.
    pub(crate) fn values_at(&self, at: ItemRef) -> &[Value] {
        let item = &self.sets[at.doc][at.item];
        match at.sub {
            Some((sub, row)) => &item.subs[sub].rows[row].values,
            None => &item.values,
        }
    }

    /// Identifier of a row.
    pub(crate) fn id_at(&self, at: ItemRef) -> RowId {
        let item = &self.sets[at.doc][at.item];
        match at.sub {
            Some((sub, row)) => item.subs[sub].rows[row].id,
            None => item.id,
        }
    }

    /// Documents the apply would write, in working-set order.
    pub(crate) fn targets(&self) -> Vec<Target> {
        let write_unchanged = self.store.config().write_if_not_changed;
        let mut targets = Vec::new();
        for (doc, set) in self.sets.iter().enumerate() {
            for (index, item) in set.iter().enumerate() {
                let action = match item.state {
                    DocState::Insert => Action::Insert,
                    DocState::Edit if item.is_restore() => Action::Edit { restore: true },
                    DocState::Edit if write_unchanged || item.is_changed() => {
                        Action::Edit { restore: false }
                    }
                    DocState::Delete => Action::Delete,
                    _ => continue,
                };
                targets.push(Target {
                    doc,
                    item: index,
                    action,
                });
            }
        }
        targets
    }

    /// Writes every pending change in one storage transaction.
    ///
    /// On success the working set reflects storage: inserted rows carry their
    /// generated identifiers, written documents are reloaded in View state
    /// and deleted documents are gone. Documents skipped because of a
    /// conflict keep their state.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AccessDenied`] if an Apply* check fails,
    /// [`CoreError::ReferentialIntegrity`] for a broken reference,
    /// [`CoreError::ConcurrencyConflict`] under
    /// [`ConflictPolicy::FailAll`], [`CoreError::LockConflict`] if another
    /// long lock covers an edited document, or a storage error. Nothing is
    /// written and the working set is unchanged, except for hook-computed
    /// values and stored blob payloads.
    pub fn apply(&mut self) -> CoreResult<ApplyReport> {
        prepare::run_hooks(self)?;
        prepare::stage_blobs(self)?;
        prepare::check_values(self)?;

        let store = self.store;
        let mut txn = store.backend().begin_write()?;
        match self.commit_changes(txn.as_mut()) {
            Ok(Outcome::Committed(committed)) => {
                txn.commit()?;
                info!(
                    request_id = %self.request_id,
                    documents = committed.written.len(),
                    skipped = committed.skipped.len(),
                    "changes applied"
                );
                Ok(self.finish(committed, false))
            }
            Ok(Outcome::Replay(record)) => {
                txn.rollback()?;
                info!(request_id = %self.request_id, "request already committed, replaying");
                let committed = self.replay(record)?;
                Ok(self.finish(committed, true))
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                debug!(error = %err, "apply aborted");
                Err(err)
            }
        }
    }

    fn commit_changes(&self, txn: &mut dyn WriteTxn) -> CoreResult<Outcome> {
        let store = self.store;
        if let Some(record) = requests::lookup(&*txn, store.requests_table(), self.request_id)? {
            return Ok(Outcome::Replay(record));
        }

        let targets = self.targets();
        self.check_target_locks(&targets)?;

        let conflicts = conflicts::detect(self, &*txn, &targets)?;
        if !conflicts.is_empty() && store.config().conflict_policy == ConflictPolicy::FailAll {
            return Err(CoreError::ConcurrencyConflict {
                conflicts: conflicts.into_iter().map(|(_, c)| c).collect(),
            });
        }
        let skipped: HashSet<(usize, i64)> = conflicts
            .iter()
            .map(|(t, c)| (targets[*t].doc, c.id))
            .collect();
        let conflicts: Vec<Conflict> = conflicts.into_iter().map(|(_, c)| c).collect();
        let targets: Vec<Target> = targets
            .into_iter()
            .filter(|t| !self.is_skipped(&skipped, *t))
            .collect();

        self.check_apply_permissions(&targets)?;

        let pending = order::pending_rows(self, &targets);
        let plan = order::plan(self, &targets, &pending);
        integrity::check(self, &*txn, &targets, &pending)?;

        if targets.is_empty() {
            return Ok(Outcome::Committed(Committed {
                user_action: None,
                targets,
                substitution: Substitution::default(),
                written: Vec::new(),
                skipped,
                conflicts,
            }));
        }

        let user_action = Uuid::new_v4();
        let now = Utc::now();
        let (substitution, written) = write::run(self, txn, &targets, &plan, user_action, now)?;

        let mut skipped_ids = Vec::with_capacity(skipped.len());
        for (doc, id) in &skipped {
            let table = store.schema().table_id(TableLoc::doc(*doc))?;
            skipped_ids.push((table.as_u32(), *id));
        }
        requests::record(
            txn,
            store.requests_table(),
            self.request_id,
            &RequestRecord {
                mapping: substitution.mapping(),
                skipped: skipped_ids,
                conflicts: conflicts.clone(),
                user_action: Some(user_action),
            },
            now,
        )?;
        if let Some(retention) = store.config().request_retention {
            let pruned = requests::prune(txn, store.requests_table(), now - retention)?;
            if pruned > 0 {
                debug!(pruned, "expired request records pruned");
            }
        }

        Ok(Outcome::Committed(Committed {
            user_action: Some(user_action),
            targets,
            substitution,
            written,
            skipped,
            conflicts,
        }))
    }

    /// Rebuilds the outcome of an apply committed by an earlier attempt.
    fn replay(&self, record: RequestRecord) -> CoreResult<Committed> {
        let schema = self.store.schema();
        let mut skipped = HashSet::new();
        for (table, id) in &record.skipped {
            let loc = schema.resolve_location(TableId::new(*table))?;
            skipped.insert((loc.doc, *id));
        }
        let substitution = Substitution::from_mapping(&record.mapping);
        let targets: Vec<Target> = self
            .targets()
            .into_iter()
            .filter(|t| !self.is_skipped(&skipped, *t))
            .collect();

        let mut written = Vec::with_capacity(targets.len());
        for target in &targets {
            let id = self.sets[target.doc][target.item].id;
            let id = substitution.resolve(id, self.doc_name(target.doc))?;
            written.push(Written {
                target: *target,
                id,
            });
        }
        Ok(Committed {
            user_action: record.user_action,
            targets,
            substitution,
            written,
            skipped,
            conflicts: record.conflicts,
        })
    }

    fn is_skipped(&self, skipped: &HashSet<(usize, i64)>, target: Target) -> bool {
        self.sets[target.doc][target.item]
            .id
            .persisted()
            .is_some_and(|id| skipped.contains(&(target.doc, id)))
    }

    fn doc_name(&self, doc: usize) -> &str {
        self.store.schema().doc_types()[doc].name()
    }

    fn check_target_locks(&self, targets: &[Target]) -> CoreResult<()> {
        let store = self.store;
        if !store.config().check_long_locks {
            return Ok(());
        }
        let mut identities = Vec::new();
        for target in targets {
            if target.action == Action::Insert {
                continue;
            }
            if let Some(id) = self.sets[target.doc][target.item].id.persisted() {
                let table = store.schema().table_id(TableLoc::doc(target.doc))?;
                identities.push(DocIdentity::new(table, id));
            }
        }
        store.long_locks().check(&identities, &self.lock_tokens)
    }

    /// Runs the Apply* permission checks for every target.
    fn check_apply_permissions(&self, targets: &[Target]) -> CoreResult<()> {
        let store = self.store;
        for target in targets {
            let def = &store.schema().doc_types()[target.doc];
            let item = &self.sets[target.doc][target.item];
            let check = |reason: PermissionReason, values: &[Value]| {
                store.permissions().check(
                    reason,
                    def.name(),
                    item.id,
                    &ItemValues::new(def.table(), values, reason.is_read_only()),
                )
            };
            let original = item.original.as_deref().unwrap_or(&item.values);
            match target.action {
                Action::Insert => check(PermissionReason::ApplyNew, &item.values)?,
                Action::Edit { restore: true } => {
                    check(PermissionReason::ApplyRestore, &item.values)?;
                    check(PermissionReason::ApplyEditNew, &item.values)?;
                }
                Action::Edit { restore: false } => {
                    check(PermissionReason::ApplyEditOrg, original)?;
                    check(PermissionReason::ApplyEditNew, &item.values)?;
                }
                Action::Delete => check(PermissionReason::ApplyDelete, original)?,
            }
        }
        Ok(())
    }

    /// Brings the working set in line with storage after a commit.
    fn finish(&mut self, committed: Committed, replayed: bool) -> ApplyReport {
        let store = self.store;
        let schema = store.schema();

        let mut inserted = Vec::new();
        for (pending, at) in order::pending_rows(self, &committed.targets) {
            if let Some(id) = committed.substitution.get(pending) {
                let def = &schema.doc_types()[at.doc];
                inserted.push(InsertedId {
                    doc_type: def.name().to_string(),
                    sub_type: at.sub.map(|(sub, _)| def.subs()[sub].name().to_string()),
                    pending,
                    id,
                });
            }
        }
        inserted.sort_by_key(|i| i.id);

        let map = committed.substitution.row_map();
        for set in &mut self.sets {
            for item in set.iter_mut() {
                if let Some(id) = map.get(&item.id) {
                    item.id = *id;
                }
                remap_values(&mut item.values, &map);
                for sub in &mut item.subs {
                    for row in &mut sub.rows {
                        if let Some(id) = map.get(&row.id) {
                            row.id = *id;
                        }
                        remap_values(&mut row.values, &map);
                    }
                }
            }
        }

        let mut report = ApplyReport {
            user_action: committed.user_action,
            request_id: self.request_id,
            inserted,
            updated: Vec::new(),
            deleted: Vec::new(),
            restored: Vec::new(),
            conflicts: committed.conflicts,
            replayed,
        };
        let mut removed = HashSet::new();
        let mut events = Vec::new();
        for written in &committed.written {
            let Target { doc, item, action } = written.target;
            let key = DocKey {
                doc_type: self.doc_name(doc).to_string(),
                id: written.id,
            };
            match action {
                Action::Delete => {
                    removed.insert((doc, item));
                    report.deleted.push(key);
                    events.push((doc, DocState::Delete, written.id, false, None));
                    continue;
                }
                Action::Insert => {}
                Action::Edit { restore } => {
                    if restore {
                        report.restored.push(key.clone());
                    }
                    report.updated.push(key);
                }
            }
            let version = self.reload(doc, item, written.id);
            let (state, restored) = match action {
                Action::Insert => (DocState::Insert, false),
                Action::Edit { restore } => (DocState::Edit, restore),
                Action::Delete => (DocState::Delete, false),
            };
            events.push((doc, state, written.id, restored, version));
        }

        for (doc, set) in self.sets.iter_mut().enumerate() {
            let mut index = 0;
            set.retain(|_| {
                let keep = !removed.contains(&(doc, index));
                index += 1;
                keep
            });
            for item in set.iter_mut() {
                let skipped = item
                    .id
                    .persisted()
                    .is_some_and(|id| committed.skipped.contains(&(doc, id)));
                if item.state == DocState::Edit && !skipped {
                    item.state = DocState::View;
                }
            }
        }

        if let Some(user_action) = committed.user_action {
            for (doc, state, id, restored, version) in events {
                let hooks = store.hooks(doc);
                if hooks.is_empty() {
                    continue;
                }
                let event = ChangeEvent {
                    doc_type: schema.doc_types()[doc].name().to_string(),
                    id,
                    state,
                    restored,
                    version,
                    user_action,
                };
                for hook in hooks {
                    hook.after_change(&event);
                }
            }
        }

        self.request_id = Uuid::new_v4();
        report
    }

    /// Replaces a written item by its committed state and returns the
    /// stored version.
    fn reload(&mut self, doc: usize, item: usize, id: i64) -> Option<u64> {
        match self.load(doc, id) {
            Ok(fresh) => {
                let version = fresh.version;
                self.sets[doc][item] = fresh;
                version
            }
            Err(err) => {
                warn!(doc_type = self.doc_name(doc), id, error = %err, "reload after apply failed");
                let stale = &mut self.sets[doc][item];
                stale.state = DocState::View;
                stale.original = Some(stale.values.clone());
                for sub in &mut stale.subs {
                    sub.removed.clear();
                    for row in &mut sub.rows {
                        row.original = Some(row.values.clone());
                    }
                }
                stale.version
            }
        }
    }
}

/// Pending rows keyed by token.
pub(crate) type PendingIndex = HashMap<PendingId, ItemRef>;

/// Table a reference column of a row points into.
///
/// For the row half of a variable reference the table comes from the
/// row's own table half; `None` if that half is empty or foreign.
pub(crate) fn reference_target(
    schema: &Schema,
    own: TableLoc,
    values: &[Value],
    column: usize,
) -> Option<TableLoc> {
    let def = schema.table_def(own);
    match &def.columns().get(column)?.kind {
        ColumnKind::DocRef(name) => schema.doc_type_index(name).ok().map(TableLoc::doc),
        ColumnKind::SubRef { document, sub } => {
            let doc = schema.doc_type_index(document).ok()?;
            let sub = schema.doc_types()[doc].sub_index(sub)?;
            Some(TableLoc::sub(doc, sub))
        }
        ColumnKind::TreeRef => Some(own),
        ColumnKind::RowId => {
            let pair = def
                .var_ref_columns()
                .into_iter()
                .find(|c| c.row_column == column)?;
            let table = u32::try_from(values.get(pair.table_column)?.as_int()?).ok()?;
            schema.resolve_location(TableId::new(table)).ok()
        }
        _ => None,
    }
}
