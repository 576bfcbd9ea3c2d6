//! Physical writes of an apply.

use super::order::Plan;
use super::{Action, ItemRef, Target, Written};
use crate::error::{CoreError, CoreResult, IntegrityViolation};
use crate::history::{self, HistoryAction, HistoryRecord};
use crate::schema::{TableDef, TableLoc, DELETED_COLUMN, PARENT_COLUMN, VERSION_COLUMN};
use crate::types::{PendingId, RowId};
use crate::value::Value;
use crate::working_set::WorkingSet;
use chrono::{DateTime, Utc};
use docset_storage::{Datum, Filter, Row, TableId, WriteTxn};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Identifiers generated for pending rows.
#[derive(Debug, Clone, Default)]
pub(crate) struct Substitution {
    ids: HashMap<PendingId, i64>,
}

impl Substitution {
    pub(crate) fn from_mapping(mapping: &[(u64, i64)]) -> Self {
        Self {
            ids: mapping
                .iter()
                .map(|(token, id)| (PendingId::new(*token), *id))
                .collect(),
        }
    }

    pub(crate) fn get(&self, pending: PendingId) -> Option<i64> {
        self.ids.get(&pending).copied()
    }

    fn insert(&mut self, pending: PendingId, id: i64) {
        self.ids.insert(pending, id);
    }

    /// Resolves an identifier; fails for a pending row not yet written.
    pub(crate) fn resolve(&self, id: RowId, table: &str) -> CoreResult<i64> {
        match id {
            RowId::Persisted(id) => Ok(id),
            RowId::Pending(p) => self.get(p).ok_or_else(|| {
                CoreError::integrity(
                    IntegrityViolation::UnresolvedFictiveId,
                    table,
                    p,
                    "no identifier was generated for this row",
                )
            }),
        }
    }

    /// Converts values to a storage row, skipping `deferred` columns.
    fn row(&self, table: &TableDef, values: &[Value], deferred: &[usize]) -> CoreResult<Row> {
        let mut row = Row::new();
        for (column, (declared, value)) in table.columns().iter().zip(values).enumerate() {
            let datum = if deferred.contains(&column) {
                Datum::Null
            } else {
                match value.to_datum() {
                    Ok(datum) => datum,
                    Err(p) => Datum::Int(self.resolve(RowId::Pending(p), table.name())?),
                }
            };
            row.set(declared.name.clone(), datum);
        }
        Ok(row)
    }

    /// Assignment in a form the request log can store.
    pub(crate) fn mapping(&self) -> Vec<(u64, i64)> {
        let mut mapping: Vec<_> = self.ids.iter().map(|(p, id)| (p.as_u64(), *id)).collect();
        mapping.sort_unstable();
        mapping
    }

    /// Assignment as a row identifier map.
    pub(crate) fn row_map(&self) -> HashMap<RowId, RowId> {
        self.ids
            .iter()
            .map(|(p, id)| (RowId::Pending(*p), RowId::Persisted(*id)))
            .collect()
    }
}

struct Writer<'a, 'w> {
    ws: &'a WorkingSet<'w>,
    txn: &'a mut dyn WriteTxn,
    substitution: Substitution,
}

impl Writer<'_, '_> {
    fn table_id(&self, loc: TableLoc) -> CoreResult<TableId> {
        self.ws.store.schema().table_id(loc)
    }

    fn insert(&mut self, at: ItemRef, deferred: &[usize]) -> CoreResult<()> {
        let schema = self.ws.store.schema();
        let loc = at.loc();
        let def = schema.table_def(loc);
        let mut row = self.substitution.row(def, self.ws.values_at(at), deferred)?;
        match at.sub {
            Some(_) => {
                let parent = self.ws.sets[at.doc][at.item].id;
                let parent = self
                    .substitution
                    .resolve(parent, schema.doc_types()[at.doc].name())?;
                row.set(PARENT_COLUMN, parent);
            }
            None => {
                let doc = &schema.doc_types()[at.doc];
                if doc.is_versioned() {
                    row.set(VERSION_COLUMN, 1i64);
                }
                if doc.tracks_deletion() {
                    row.set(DELETED_COLUMN, false);
                }
            }
        }
        let table = self.table_id(loc)?;
        let id = self.txn.insert(table, row)?;
        let pending = self.ws.id_at(at);
        if let RowId::Pending(p) = pending {
            self.substitution.insert(p, id);
        }
        debug!(table = def.name(), %pending, id, "row inserted");
        Ok(())
    }

    fn set_deferred(&mut self, at: ItemRef, columns: &[usize]) -> CoreResult<()> {
        let schema = self.ws.store.schema();
        let loc = at.loc();
        let def = schema.table_def(loc);
        let values = self.ws.values_at(at);
        let mut row = Row::new();
        for &column in columns {
            let id = match values[column] {
                Value::Id(id) => self.substitution.resolve(id, def.name())?,
                _ => continue,
            };
            row.set(def.columns()[column].name.clone(), id);
        }
        let id = self.substitution.resolve(self.ws.id_at(at), def.name())?;
        let table = self.table_id(loc)?;
        self.txn.update(table, id, row)?;
        Ok(())
    }

    fn edit(&mut self, target: Target, restore: bool) -> CoreResult<i64> {
        let schema = self.ws.store.schema();
        let doc = &schema.doc_types()[target.doc];
        let item = &self.ws.sets[target.doc][target.item];
        let id = self.substitution.resolve(item.id, doc.name())?;

        for (sub, set) in item.subs.iter().enumerate() {
            let loc = TableLoc::sub(target.doc, sub);
            let table = self.table_id(loc)?;
            for removed in &set.removed {
                self.txn.delete(table, *removed)?;
            }
            for row in &set.rows {
                let RowId::Persisted(row_id) = row.id else { continue };
                if row.is_changed() {
                    let values = self.substitution.row(schema.table_def(loc), &row.values, &[])?;
                    self.txn.update(table, row_id, values)?;
                }
            }
        }

        let mut row = self.substitution.row(doc.table(), &item.values, &[])?;
        if doc.is_versioned() {
            row.set(VERSION_COLUMN, next_version(item.version));
        }
        if restore {
            row.set(DELETED_COLUMN, false);
        }
        let table = self.table_id(TableLoc::doc(target.doc))?;
        self.txn.update(table, id, row)?;
        debug!(doc_type = doc.name(), id, restore, "document updated");
        Ok(id)
    }

    /// Deletes a document; returns the row as it was for hard deletes.
    fn delete(&mut self, target: Target) -> CoreResult<(i64, Option<Row>)> {
        let schema = self.ws.store.schema();
        let doc = &schema.doc_types()[target.doc];
        let item = &self.ws.sets[target.doc][target.item];
        let id = self.substitution.resolve(item.id, doc.name())?;
        let table = self.table_id(TableLoc::doc(target.doc))?;

        if doc.tracks_deletion() {
            let mut row = Row::new().with(DELETED_COLUMN, true);
            if doc.is_versioned() {
                row.set(VERSION_COLUMN, next_version(item.version));
            }
            self.txn.update(table, id, row)?;
            debug!(doc_type = doc.name(), id, "document soft-deleted");
            return Ok((id, None));
        }

        let before = self.txn.select(table, id)?;
        for sub in 0..doc.subs().len() {
            let sub_table = self.table_id(TableLoc::sub(target.doc, sub))?;
            for (sub_id, _) in self
                .txn
                .select_where(sub_table, &Filter::eq(PARENT_COLUMN, id))?
            {
                self.txn.delete(sub_table, sub_id)?;
            }
        }
        self.txn.delete(table, id)?;
        debug!(doc_type = doc.name(), id, "document deleted");
        Ok((id, before))
    }
}

fn next_version(read: Option<u64>) -> i64 {
    read.map_or(1, |v| v as i64 + 1)
}

/// Writes the targets in plan order and records their history.
pub(crate) fn run(
    ws: &WorkingSet<'_>,
    txn: &mut dyn WriteTxn,
    targets: &[Target],
    plan: &Plan,
    user_action: Uuid,
    timestamp: DateTime<Utc>,
) -> CoreResult<(Substitution, Vec<Written>)> {
    let store = ws.store;
    let schema = store.schema();
    let mut writer = Writer {
        ws,
        txn,
        substitution: Substitution::default(),
    };

    let mut deferred: HashMap<ItemRef, Vec<usize>> = HashMap::new();
    for (at, column) in &plan.deferred {
        deferred.entry(*at).or_default().push(*column);
    }
    for at in &plan.inserts {
        let columns = deferred.get(at).map_or(&[][..], Vec::as_slice);
        writer.insert(*at, columns)?;
    }
    let mut deferred: Vec<_> = deferred.into_iter().collect();
    deferred.sort_by_key(|(at, _)| (at.doc, at.item, at.sub));
    for (at, columns) in &deferred {
        writer.set_deferred(*at, columns)?;
    }

    let mut written = Vec::with_capacity(targets.len());
    let mut removed_rows = HashMap::new();
    for target in targets {
        let id = match target.action {
            Action::Insert => writer
                .substitution
                .resolve(ws.sets[target.doc][target.item].id, schema.doc_types()[target.doc].name())?,
            Action::Edit { restore } => writer.edit(*target, restore)?,
            Action::Delete => continue,
        };
        written.push(Written {
            target: *target,
            id,
        });
    }
    for &index in &plan.deletes {
        let target = targets[index];
        let (id, before) = writer.delete(target)?;
        if let Some(row) = before {
            removed_rows.insert((target.doc, id), row);
        }
        written.push(Written { target, id });
    }

    let Writer {
        txn, substitution, ..
    } = writer;

    if store.config().track_history {
        for entry in &written {
            let doc = &schema.doc_types()[entry.target.doc];
            let table = schema.table_id(TableLoc::doc(entry.target.doc))?;
            let item = &ws.sets[entry.target.doc][entry.target.item];
            let payload = match removed_rows.remove(&(entry.target.doc, entry.id)) {
                Some(row) => row,
                None => txn.select(table, entry.id)?.unwrap_or_default(),
            };
            let action = match entry.target.action {
                Action::Insert => HistoryAction::Insert,
                Action::Edit { restore: true } => HistoryAction::Restore,
                Action::Edit { restore: false } => HistoryAction::Edit,
                Action::Delete => HistoryAction::Delete,
            };
            let version = if doc.is_versioned() {
                Some(match entry.target.action {
                    Action::Insert => 1,
                    Action::Delete if !doc.tracks_deletion() => item.version.unwrap_or(0),
                    _ => item.version.map_or(1, |v| v + 1),
                })
            } else {
                None
            };
            history::append(
                txn,
                store.history_table(),
                &HistoryRecord {
                    table,
                    doc_id: entry.id,
                    version,
                    action,
                    user_action,
                    timestamp,
                    payload: &payload,
                },
            )?;
        }
    }
    Ok((substitution, written))
}
