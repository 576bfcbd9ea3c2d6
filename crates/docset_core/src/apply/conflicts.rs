//! Optimistic side-change detection.

use super::{Action, Target};
use crate::codec;
use crate::error::{Conflict, ConflictKind, CoreResult};
use crate::schema::TableLoc;
use crate::store::stored_version;
use crate::working_set::WorkingSet;
use docset_storage::WriteTxn;
use tracing::warn;

/// Compares every edited or deleted document with its stored row.
///
/// Versioned types compare the version read when the item was loaded;
/// other types compare the fingerprint of the whole row. Returns the
/// conflicts with the index of their target.
pub(crate) fn detect(
    ws: &WorkingSet<'_>,
    txn: &dyn WriteTxn,
    targets: &[Target],
) -> CoreResult<Vec<(usize, Conflict)>> {
    let schema = ws.store.schema();
    let mut conflicts = Vec::new();
    for (index, target) in targets.iter().enumerate() {
        if target.action == Action::Insert {
            continue;
        }
        let item = &ws.sets[target.doc][target.item];
        let Some(id) = item.id.persisted() else {
            continue;
        };
        let def = &schema.doc_types()[target.doc];
        let table = schema.table_id(TableLoc::doc(target.doc))?;

        let kind = match txn.select(table, id)? {
            None => Some(ConflictKind::Missing),
            Some(row) if def.is_versioned() => {
                let expected = item.version.unwrap_or(0);
                let found = stored_version(&row).unwrap_or(0);
                (expected != found).then_some(ConflictKind::VersionMismatch { expected, found })
            }
            Some(row) => {
                let current = codec::fingerprint(&row)?;
                (item.fingerprint != Some(current)).then_some(ConflictKind::ContentChanged)
            }
        };
        if let Some(kind) = kind {
            let conflict = Conflict {
                doc_type: def.name().to_string(),
                id,
                kind,
            };
            warn!(%conflict, "side change detected");
            conflicts.push((index, conflict));
        }
    }
    Ok(conflicts)
}
