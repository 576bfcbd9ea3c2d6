//! Referential integrity of the state an apply would commit.
//!
//! Every written row is checked against the final state: pending references
//! must name a row of this apply, persisted references must name a row that
//! still exists afterwards, blob columns must name a stored object and tree
//! references must not loop. A deleted row must not stay referenced by a
//! row that survives the apply.

use super::{reference_target, Action, ItemRef, PendingIndex, Target};
use crate::blob::BlobId;
use crate::error::{CoreError, CoreResult, IntegrityViolation};
use crate::schema::{ColumnKind, Schema, TableLoc, PARENT_COLUMN};
use crate::store::stored_deleted;
use crate::types::RowId;
use crate::value::Value;
use crate::working_set::WorkingSet;
use docset_storage::{Filter, WriteTxn};
use std::collections::{HashMap, HashSet};

/// The rows an apply touches, as they will be after the commit.
struct FinalState<'w> {
    /// Rows whose values are written, with the values.
    written: Vec<(TableLoc, RowId, &'w [Value])>,
    /// Persisted rows rewritten by the apply.
    rewritten: HashMap<(TableLoc, i64), &'w [Value]>,
    /// Persisted rows removed or soft-deleted by the apply.
    deleted: HashSet<(TableLoc, i64)>,
    /// Documents whose deletion flag is cleared.
    restored: HashSet<(usize, i64)>,
}

impl<'w> FinalState<'w> {
    fn build(ws: &'w WorkingSet<'_>, txn: &dyn WriteTxn, targets: &[Target]) -> CoreResult<Self> {
        let schema = ws.store.schema();
        let mut state = FinalState {
            written: Vec::new(),
            rewritten: HashMap::new(),
            deleted: HashSet::new(),
            restored: HashSet::new(),
        };
        for target in targets {
            let item = &ws.sets[target.doc][target.item];
            let doc_loc = TableLoc::doc(target.doc);
            match target.action {
                Action::Delete => {
                    let Some(id) = item.id.persisted() else { continue };
                    state.deleted.insert((doc_loc, id));
                    if !schema.doc_types()[target.doc].tracks_deletion() {
                        for sub in 0..item.subs.len() {
                            let loc = TableLoc::sub(target.doc, sub);
                            let table = schema.table_id(loc)?;
                            for (sub_id, _) in
                                txn.select_where(table, &Filter::eq(PARENT_COLUMN, id))?
                            {
                                state.deleted.insert((loc, sub_id));
                            }
                        }
                    }
                }
                Action::Insert | Action::Edit { .. } => {
                    if let Action::Edit { restore: true } = target.action {
                        if let Some(id) = item.id.persisted() {
                            state.restored.insert((target.doc, id));
                        }
                    }
                    state.add_written(doc_loc, item.id, &item.values);
                    for (sub, set) in item.subs.iter().enumerate() {
                        let loc = TableLoc::sub(target.doc, sub);
                        for removed in &set.removed {
                            state.deleted.insert((loc, *removed));
                        }
                        for row in &set.rows {
                            if row.id.is_pending() || row.is_changed() {
                                state.add_written(loc, row.id, &row.values);
                            }
                        }
                    }
                }
            }
        }
        Ok(state)
    }

    fn add_written(&mut self, loc: TableLoc, id: RowId, values: &'w [Value]) {
        self.written.push((loc, id, values));
        if let Some(id) = id.persisted() {
            self.rewritten.insert((loc, id), values);
        }
    }

    /// Whether a persisted row exists once the apply commits.
    fn exists(&self, schema: &Schema, txn: &dyn WriteTxn, loc: TableLoc, id: i64) -> CoreResult<bool> {
        if self.deleted.contains(&(loc, id)) {
            return Ok(false);
        }
        if loc.sub.is_none() && self.restored.contains(&(loc.doc, id)) {
            return Ok(true);
        }
        let Some(row) = txn.select(schema.table_id(loc)?, id)? else {
            return Ok(false);
        };
        Ok(loc.sub.is_some() || !stored_deleted(&row))
    }
}

/// Runs every integrity check.
pub(crate) fn check(
    ws: &WorkingSet<'_>,
    txn: &dyn WriteTxn,
    targets: &[Target],
    pending: &PendingIndex,
) -> CoreResult<()> {
    let state = FinalState::build(ws, txn, targets)?;
    for (loc, id, values) in &state.written {
        check_references(ws, txn, &state, pending, *loc, *id, values)?;
    }
    for (loc, id, values) in &state.written {
        check_tree(ws, txn, &state, pending, *loc, *id, values)?;
    }
    check_deletions(ws, txn, &state)
}

fn check_references(
    ws: &WorkingSet<'_>,
    txn: &dyn WriteTxn,
    state: &FinalState<'_>,
    pending: &PendingIndex,
    loc: TableLoc,
    id: RowId,
    values: &[Value],
) -> CoreResult<()> {
    let store = ws.store;
    let schema = store.schema();
    let def = schema.table_def(loc);
    for (column, value) in values.iter().enumerate() {
        let declared = &def.columns()[column];
        if declared.kind == ColumnKind::Blob {
            if let Value::Int(blob) = value {
                if !store.blobs().contains(BlobId::new(*blob))? {
                    return Err(CoreError::integrity(
                        IntegrityViolation::MissingTarget,
                        def.name(),
                        id,
                        format!("column '{}' names unknown binary object {blob}", declared.name),
                    ));
                }
            }
            continue;
        }
        let Value::Id(target) = value else { continue };
        let Some(target_loc) = reference_target(schema, loc, values, column) else {
            continue;
        };
        let target_name = schema.table_def(target_loc).name();
        match target {
            RowId::Pending(p) => match pending.get(p) {
                Some(row) if row.loc() == target_loc => {}
                Some(_) => {
                    return Err(CoreError::integrity(
                        IntegrityViolation::MissingTarget,
                        def.name(),
                        id,
                        format!("column '{}': {p} is not a {target_name} row", declared.name),
                    ))
                }
                None => {
                    return Err(CoreError::integrity(
                        IntegrityViolation::UnresolvedFictiveId,
                        def.name(),
                        id,
                        format!("column '{}': {p} is not inserted by this apply", declared.name),
                    ))
                }
            },
            RowId::Persisted(target_id) => {
                if !state.exists(schema, txn, target_loc, *target_id)? {
                    return Err(CoreError::integrity(
                        IntegrityViolation::MissingTarget,
                        def.name(),
                        id,
                        format!(
                            "column '{}': {target_name} {target_id} does not exist",
                            declared.name
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Walks the parent chain of a written row.
///
/// Sub-document tables with a tree reference are walked within their own
/// table, like document tables.
fn check_tree(
    ws: &WorkingSet<'_>,
    txn: &dyn WriteTxn,
    state: &FinalState<'_>,
    pending: &PendingIndex,
    loc: TableLoc,
    id: RowId,
    values: &[Value],
) -> CoreResult<()> {
    let schema = ws.store.schema();
    let def = schema.table_def(loc);
    let Some(column) = def.tree_column() else {
        return Ok(());
    };
    let table = schema.table_id(loc)?;

    let mut seen = HashSet::from([id]);
    let mut current = values[column].as_id();
    while let Some(parent) = current {
        if !seen.insert(parent) {
            return Err(CoreError::integrity(
                IntegrityViolation::TreeCycle,
                def.name(),
                id,
                format!("parent chain through {parent} loops"),
            ));
        }
        current = match parent {
            RowId::Pending(p) => pending
                .get(&p)
                .filter(|row: &&ItemRef| row.loc() == loc)
                .and_then(|row| ws.values_at(*row)[column].as_id()),
            RowId::Persisted(parent_id) => match state.rewritten.get(&(loc, parent_id)) {
                Some(values) => values[column].as_id(),
                None => txn
                    .select(table, parent_id)?
                    .and_then(|row| def.columns()[column].decode(row.get(&def.columns()[column].name)).as_id()),
            },
        };
    }
    Ok(())
}

/// Ensures no surviving row references a deleted one.
fn check_deletions(ws: &WorkingSet<'_>, txn: &dyn WriteTxn, state: &FinalState<'_>) -> CoreResult<()> {
    let schema = ws.store.schema();
    let mut locations = Vec::new();
    for (doc, def) in schema.doc_types().iter().enumerate() {
        locations.push(TableLoc::doc(doc));
        locations.extend((0..def.subs().len()).map(|sub| TableLoc::sub(doc, sub)));
    }

    for (deleted_loc, deleted_id) in &state.deleted {
        let deleted_table = schema.table_id(*deleted_loc)?;
        for &loc in &locations {
            let def = schema.table_def(loc);
            let table = schema.table_id(loc)?;
            for (column, declared) in def.columns().iter().enumerate() {
                let filter = match &declared.kind {
                    ColumnKind::RowId => {
                        let Some(pair) = def
                            .var_ref_columns()
                            .into_iter()
                            .find(|c| c.row_column == column)
                        else {
                            continue;
                        };
                        Filter::And(vec![
                            Filter::eq(declared.name.clone(), *deleted_id),
                            Filter::eq(
                                def.columns()[pair.table_column].name.clone(),
                                i64::from(deleted_table.as_u32()),
                            ),
                        ])
                    }
                    ColumnKind::DocRef(_) | ColumnKind::SubRef { .. } | ColumnKind::TreeRef => {
                        if reference_target(schema, loc, &[], column) != Some(*deleted_loc) {
                            continue;
                        }
                        Filter::eq(declared.name.clone(), *deleted_id)
                    }
                    _ => continue,
                };

                for (referrer, row) in txn.select_where(table, &filter)? {
                    if state.deleted.contains(&(loc, referrer))
                        || state.rewritten.contains_key(&(loc, referrer))
                    {
                        continue;
                    }
                    let owner = match loc.sub {
                        None => Some((loc.doc, referrer, row)),
                        Some(_) => match row.get(PARENT_COLUMN).as_int() {
                            Some(parent) => {
                                let doc_loc = TableLoc::doc(loc.doc);
                                if state.deleted.contains(&(doc_loc, parent)) {
                                    continue;
                                }
                                txn.select(schema.table_id(doc_loc)?, parent)?
                                    .map(|parent_row| (loc.doc, parent, parent_row))
                            }
                            None => None,
                        },
                    };
                    if let Some((doc, owner_id, owner_row)) = owner {
                        if stored_deleted(&owner_row) && !state.restored.contains(&(doc, owner_id)) {
                            continue;
                        }
                    }
                    return Err(CoreError::integrity(
                        IntegrityViolation::ReferencedByOther,
                        schema.table_def(*deleted_loc).name(),
                        deleted_id,
                        format!("still referenced by {} {referrer}", def.name()),
                    ));
                }
            }
        }
    }
    Ok(())
}
