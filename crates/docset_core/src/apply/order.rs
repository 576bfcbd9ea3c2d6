//! Write ordering.
//!
//! Pending rows are inserted so that every pending row a row references is
//! written first. Where references form a cycle (mutual cross references),
//! the cycle is broken by writing one reference as null and setting it once
//! every row of the apply has an identifier. A sub-document always follows
//! its pending parent. Deletions run in reverse reference order.

use super::{reference_target, Action, ItemRef, PendingIndex, Target};
use crate::schema::TableLoc;
use crate::types::RowId;
use crate::value::Value;
use crate::working_set::WorkingSet;
use std::collections::HashMap;

/// Order of the physical writes of one apply.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    /// Pending rows in insertion order.
    pub inserts: Vec<ItemRef>,
    /// Columns written as null on insert and set afterwards.
    pub deferred: Vec<(ItemRef, usize)>,
    /// Deleted documents in deletion order, as indices into the targets.
    pub deletes: Vec<usize>,
}

impl Plan {
    pub(crate) fn is_deferred(&self, row: ItemRef, column: usize) -> bool {
        self.deferred.contains(&(row, column))
    }
}

/// Pending rows of the targets, keyed by token.
pub(crate) fn pending_rows(ws: &WorkingSet<'_>, targets: &[Target]) -> PendingIndex {
    let mut rows = PendingIndex::new();
    for target in targets {
        let item = &ws.sets[target.doc][target.item];
        match target.action {
            Action::Delete => continue,
            Action::Insert => {
                if let RowId::Pending(p) = item.id {
                    rows.insert(p, ItemRef::doc(target.doc, target.item));
                }
            }
            Action::Edit { .. } => {}
        }
        for (sub, set) in item.subs.iter().enumerate() {
            for (row, sub_item) in set.rows.iter().enumerate() {
                if let RowId::Pending(p) = sub_item.id {
                    rows.insert(p, ItemRef::sub(target.doc, target.item, sub, row));
                }
            }
        }
    }
    rows
}

struct Edge {
    to: usize,
    /// Referencing column; `None` for the parent link of a sub-document.
    column: Option<usize>,
}

/// Computes the write order.
pub(crate) fn plan(
    ws: &WorkingSet<'_>,
    targets: &[Target],
    pending: &PendingIndex,
) -> Plan {
    let mut nodes: Vec<ItemRef> = pending.values().copied().collect();
    nodes.sort_by_key(|r| (r.doc, r.item, r.sub));
    let index: HashMap<ItemRef, usize> = nodes.iter().enumerate().map(|(i, r)| (*r, i)).collect();

    let mut edges: Vec<Vec<Edge>> = Vec::with_capacity(nodes.len());
    for node in &nodes {
        let mut out = Vec::new();
        if node.sub.is_some() {
            if let Some(&parent) = index.get(&ItemRef::doc(node.doc, node.item)) {
                out.push(Edge {
                    to: parent,
                    column: None,
                });
            }
        }
        for (column, value) in ws.values_at(*node).iter().enumerate() {
            if let Some(&to) = value.pending().and_then(|p| pending.get(&p)).and_then(|r| index.get(r)) {
                out.push(Edge {
                    to,
                    column: Some(column),
                });
            }
        }
        edges.push(out);
    }

    let mut plan = Plan::default();
    let mut done = vec![false; nodes.len()];
    let mut dropped: Vec<Vec<bool>> = edges.iter().map(|e| vec![false; e.len()]).collect();

    while plan.inserts.len() < nodes.len() {
        let ready = (0..nodes.len()).find(|&i| {
            !done[i]
                && edges[i]
                    .iter()
                    .zip(&dropped[i])
                    .all(|(e, gone)| *gone || (e.to != i && done[e.to]))
        });
        let next = match ready {
            Some(i) => i,
            None => {
                // Break the cycle at the first row whose parent is written.
                let Some(i) = (0..nodes.len()).find(|&i| {
                    !done[i]
                        && edges[i]
                            .iter()
                            .all(|e| e.column.is_some() || done[e.to])
                }) else {
                    break;
                };
                for (k, edge) in edges[i].iter().enumerate() {
                    if let Some(column) = edge.column {
                        if !dropped[i][k] && (edge.to == i || !done[edge.to]) {
                            dropped[i][k] = true;
                            plan.deferred.push((nodes[i], column));
                        }
                    }
                }
                i
            }
        };
        done[next] = true;
        plan.inserts.push(nodes[next]);
    }

    plan.deletes = delete_order(ws, targets);
    plan
}

/// Orders deleted documents so that a document referencing another deleted
/// document goes first.
fn delete_order(ws: &WorkingSet<'_>, targets: &[Target]) -> Vec<usize> {
    let schema = ws.store.schema();
    let deleted: Vec<usize> = (0..targets.len())
        .filter(|&t| targets[t].action == Action::Delete)
        .collect();
    let keys: Vec<(TableLoc, RowId)> = deleted
        .iter()
        .map(|&t| {
            let target = targets[t];
            (TableLoc::doc(target.doc), ws.sets[target.doc][target.item].id)
        })
        .collect();

    // referenced_by[j]: deleted documents whose values point at document j.
    let mut referenced_by = vec![Vec::new(); deleted.len()];
    for (i, &t) in deleted.iter().enumerate() {
        let target = targets[t];
        let own = TableLoc::doc(target.doc);
        let values = &ws.sets[target.doc][target.item].values;
        for (column, value) in values.iter().enumerate() {
            let Value::Id(id) = value else { continue };
            let Some(loc) = reference_target(schema, own, values, column) else {
                continue;
            };
            for (j, key) in keys.iter().enumerate() {
                if i != j && *key == (loc, *id) {
                    referenced_by[j].push(i);
                }
            }
        }
    }

    let mut order = Vec::with_capacity(deleted.len());
    let mut done = vec![false; deleted.len()];
    while order.len() < deleted.len() {
        let next = (0..deleted.len())
            .find(|&j| !done[j] && referenced_by[j].iter().all(|&i| done[i]))
            .or_else(|| (0..deleted.len()).find(|&j| !done[j]));
        let Some(j) = next else { break };
        done[j] = true;
        order.push(deleted[j]);
    }
    order
}
