//! Idempotency records.
//!
//! Every successful apply records its request identifier together with the
//! identifiers it assigned to pending rows. A retried apply that finds its
//! request already recorded writes nothing and replays the recorded
//! assignment instead.
//!
//! Records older than the configured retention are pruned by later applies,
//! after which a retry of the old request is treated as new.

use crate::codec;
use crate::error::{Conflict, CoreResult};
use chrono::{DateTime, Utc};
use docset_storage::{Filter, Row, TableId, TableSpec, WriteTxn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request table name.
pub const REQUESTS_TABLE: &str = "_requests";

const REQUEST_COLUMN: &str = "request_id";
const USER_ACTION_COLUMN: &str = "user_action";
const RECORD_COLUMN: &str = "record";
const TIMESTAMP_COLUMN: &str = "timestamp";

pub(crate) fn table_spec() -> TableSpec {
    TableSpec::new(REQUESTS_TABLE)
        .column(REQUEST_COLUMN)
        .column(USER_ACTION_COLUMN)
        .column(RECORD_COLUMN)
        .column(TIMESTAMP_COLUMN)
}

/// What a committed apply did, as far as a replay needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RequestRecord {
    /// Pending token to assigned row identifier.
    pub mapping: Vec<(u64, i64)>,
    /// Documents left unwritten because of conflicts, as (table, id).
    pub skipped: Vec<(u32, i64)>,
    /// Conflicts reported for the skipped documents.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    pub user_action: Option<Uuid>,
}

pub(crate) fn lookup(
    txn: &dyn WriteTxn,
    table: TableId,
    request_id: Uuid,
) -> CoreResult<Option<RequestRecord>> {
    let rows = txn.select_where(table, &Filter::eq(REQUEST_COLUMN, request_id.to_string()))?;
    match rows.first() {
        None => Ok(None),
        Some((_, row)) => {
            let bytes = row.get(RECORD_COLUMN).as_bytes().unwrap_or_default();
            codec::decode(bytes).map(Some)
        }
    }
}

pub(crate) fn record(
    txn: &mut dyn WriteTxn,
    table: TableId,
    request_id: Uuid,
    record: &RequestRecord,
    timestamp: DateTime<Utc>,
) -> CoreResult<()> {
    let user_action = record.user_action.map(|u| u.to_string());
    txn.insert(
        table,
        Row::new()
            .with(REQUEST_COLUMN, request_id.to_string())
            .with(USER_ACTION_COLUMN, user_action)
            .with(RECORD_COLUMN, codec::encode(record)?)
            .with(TIMESTAMP_COLUMN, timestamp.to_rfc3339()),
    )?;
    Ok(())
}

/// Deletes records written before `cutoff` and returns how many went.
pub(crate) fn prune(
    txn: &mut dyn WriteTxn,
    table: TableId,
    cutoff: DateTime<Utc>,
) -> CoreResult<usize> {
    let rows = txn.select_where(table, &Filter::All)?;
    let mut pruned = 0;
    for (id, row) in rows {
        let written = row
            .get(TIMESTAMP_COLUMN)
            .as_text()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok());
        if written.is_some_and(|t| t.with_timezone(&Utc) < cutoff) {
            txn.delete(table, id)?;
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConflictKind;
    use chrono::Duration;
    use docset_storage::{InMemoryRowStore, RowStore};

    #[test]
    fn recorded_request_is_found() {
        let store = InMemoryRowStore::new();
        let table = store.create_table(&table_spec()).unwrap();
        let request = Uuid::new_v4();
        let rec = RequestRecord {
            mapping: vec![(1, 10), (2, 11)],
            skipped: vec![(3, 4)],
            conflicts: vec![Conflict {
                doc_type: "Person".into(),
                id: 4,
                kind: ConflictKind::VersionMismatch {
                    expected: 1,
                    found: 2,
                },
            }],
            user_action: Some(Uuid::new_v4()),
        };

        let mut txn = store.begin_write().unwrap();
        assert!(lookup(txn.as_ref(), table, request).unwrap().is_none());
        record(txn.as_mut(), table, request, &rec, Utc::now()).unwrap();
        assert_eq!(lookup(txn.as_ref(), table, request).unwrap(), Some(rec));
        txn.commit().unwrap();

        let txn = store.begin_write().unwrap();
        assert!(lookup(txn.as_ref(), table, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn prune_drops_only_old_records() {
        let store = InMemoryRowStore::new();
        let table = store.create_table(&table_spec()).unwrap();
        let now = Utc::now();
        let (old, recent) = (Uuid::new_v4(), Uuid::new_v4());

        let mut txn = store.begin_write().unwrap();
        let rec = RequestRecord::default();
        record(txn.as_mut(), table, old, &rec, now - Duration::days(40)).unwrap();
        record(txn.as_mut(), table, recent, &rec, now - Duration::hours(1)).unwrap();
        assert_eq!(prune(txn.as_mut(), table, now - Duration::days(30)).unwrap(), 1);
        txn.commit().unwrap();

        let mut txn = store.begin_write().unwrap();
        assert!(lookup(txn.as_ref(), table, old).unwrap().is_none());
        assert!(lookup(txn.as_ref(), table, recent).unwrap().is_some());
        assert_eq!(prune(txn.as_mut(), table, now - Duration::days(30)).unwrap(), 0);
    }
}
