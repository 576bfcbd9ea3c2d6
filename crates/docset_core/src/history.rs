//! Append-only document history.
//!
//! Every write of a document appends one record to the `_history` table:
//! the document's version, the action, the user action that grouped the
//! apply, a timestamp and the CBOR-encoded row as written (or, for a
//! physical delete, as it was before removal).

use crate::codec;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use docset_storage::{Filter, Row, RowStore, TableId, TableSpec, WriteTxn};
use std::fmt;
use uuid::Uuid;

/// History table name.
pub const HISTORY_TABLE: &str = "_history";

const TABLE_COLUMN: &str = "table_id";
const DOC_COLUMN: &str = "doc_id";
const VERSION_COLUMN: &str = "version";
const ACTION_COLUMN: &str = "action";
const USER_ACTION_COLUMN: &str = "user_action";
const TIMESTAMP_COLUMN: &str = "timestamp";
const PAYLOAD_COLUMN: &str = "payload";

/// Physical layout of the history table.
pub(crate) fn table_spec() -> TableSpec {
    TableSpec::new(HISTORY_TABLE)
        .column(TABLE_COLUMN)
        .column(DOC_COLUMN)
        .column(VERSION_COLUMN)
        .column(ACTION_COLUMN)
        .column(USER_ACTION_COLUMN)
        .column(TIMESTAMP_COLUMN)
        .column(PAYLOAD_COLUMN)
}

/// What a history record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryAction {
    /// The document was created.
    Insert,
    /// The document was modified.
    Edit,
    /// The document was deleted.
    Delete,
    /// A soft-deleted document was modified and thereby restored.
    Restore,
}

impl HistoryAction {
    /// Stored name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HistoryAction::Insert => "insert",
            HistoryAction::Edit => "edit",
            HistoryAction::Delete => "delete",
            HistoryAction::Restore => "restore",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text {
            "insert" => Some(HistoryAction::Insert),
            "edit" => Some(HistoryAction::Edit),
            "delete" => Some(HistoryAction::Delete),
            "restore" => Some(HistoryAction::Restore),
            _ => None,
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a document's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Document version after the action. Unversioned types number their
    /// records sequentially from 1.
    pub version: u64,
    /// The action.
    pub action: HistoryAction,
    /// User action grouping every document written by the same apply.
    pub user_action: Uuid,
    /// When the apply ran.
    pub timestamp: DateTime<Utc>,
}

/// A record about to be appended.
pub(crate) struct HistoryRecord<'a> {
    pub table: TableId,
    pub doc_id: i64,
    /// `None` numbers the record after the existing ones.
    pub version: Option<u64>,
    pub action: HistoryAction,
    pub user_action: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: &'a Row,
}

fn doc_filter(table: TableId, doc_id: i64) -> Filter {
    Filter::And(vec![
        Filter::eq(TABLE_COLUMN, i64::from(table.as_u32())),
        Filter::eq(DOC_COLUMN, doc_id),
    ])
}

/// Appends a record inside an open write transaction.
pub(crate) fn append(
    txn: &mut dyn WriteTxn,
    history: TableId,
    record: &HistoryRecord<'_>,
) -> CoreResult<()> {
    let version = match record.version {
        Some(v) => v,
        None => txn.select_where(history, &doc_filter(record.table, record.doc_id))?.len() as u64 + 1,
    };
    let row = Row::new()
        .with(TABLE_COLUMN, i64::from(record.table.as_u32()))
        .with(DOC_COLUMN, record.doc_id)
        .with(VERSION_COLUMN, version as i64)
        .with(ACTION_COLUMN, record.action.as_str())
        .with(USER_ACTION_COLUMN, record.user_action.to_string())
        .with(TIMESTAMP_COLUMN, record.timestamp.to_rfc3339())
        .with(PAYLOAD_COLUMN, codec::encode(record.payload)?);
    txn.insert(history, row)?;
    Ok(())
}

fn corrupted(message: impl Into<String>) -> CoreError {
    CoreError::codec(message)
}

fn parse_entry(row: &Row) -> CoreResult<HistoryEntry> {
    let version = row
        .get(VERSION_COLUMN)
        .as_int()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| corrupted("history record without version"))?;
    let action = row
        .get(ACTION_COLUMN)
        .as_text()
        .and_then(HistoryAction::parse)
        .ok_or_else(|| corrupted("history record with unknown action"))?;
    let user_action = row
        .get(USER_ACTION_COLUMN)
        .as_text()
        .and_then(|t| Uuid::parse_str(t).ok())
        .ok_or_else(|| corrupted("history record with malformed user action"))?;
    let timestamp = row
        .get(TIMESTAMP_COLUMN)
        .as_text()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .ok_or_else(|| corrupted("history record with malformed timestamp"))?
        .with_timezone(&Utc);
    Ok(HistoryEntry {
        version,
        action,
        user_action,
        timestamp,
    })
}

/// Reads the history of a document, oldest first.
///
/// # Errors
///
/// Returns a storage error, or a codec error for a malformed record.
pub fn read_history(store: &dyn RowStore, doc_table: TableId, doc_id: i64) -> CoreResult<Vec<HistoryEntry>> {
    let Some(history) = store.table_id(HISTORY_TABLE) else {
        return Ok(Vec::new());
    };
    store
        .select_where(history, &doc_filter(doc_table, doc_id))?
        .iter()
        .map(|(_, row)| parse_entry(row))
        .collect()
}

/// Reads the row recorded for a document version.
///
/// When several records share a version (a delete of an unversioned
/// document) the latest wins.
///
/// # Errors
///
/// Returns a storage error, or a codec error for a malformed payload.
pub fn read_values(
    store: &dyn RowStore,
    doc_table: TableId,
    doc_id: i64,
    version: u64,
) -> CoreResult<Option<Row>> {
    let Some(history) = store.table_id(HISTORY_TABLE) else {
        return Ok(None);
    };
    let rows = store.select_where(history, &doc_filter(doc_table, doc_id))?;
    let Some((_, row)) = rows
        .iter()
        .rev()
        .find(|(_, row)| row.get(VERSION_COLUMN).as_int() == Some(version as i64))
    else {
        return Ok(None);
    };
    let payload = row
        .get(PAYLOAD_COLUMN)
        .as_bytes()
        .ok_or_else(|| corrupted("history record without payload"))?;
    codec::decode(payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docset_storage::InMemoryRowStore;

    fn record(store: &InMemoryRowStore, doc_id: i64, version: Option<u64>, action: HistoryAction, payload: &Row) {
        let history = store.create_table(&table_spec()).unwrap();
        let mut txn = store.begin_write().unwrap();
        append(
            txn.as_mut(),
            history,
            &HistoryRecord {
                table: TableId::new(1),
                doc_id,
                version,
                action,
                user_action: Uuid::new_v4(),
                timestamp: Utc::now(),
                payload,
            },
        )
        .unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn history_is_ordered_and_per_document() {
        let store = InMemoryRowStore::new();
        let row = Row::new().with("name", "a");
        record(&store, 1, Some(1), HistoryAction::Insert, &row);
        record(&store, 2, Some(1), HistoryAction::Insert, &row);
        record(&store, 1, Some(2), HistoryAction::Edit, &row);

        let entries = read_history(&store, TableId::new(1), 1).unwrap();
        let summary: Vec<_> = entries.iter().map(|e| (e.version, e.action)).collect();
        assert_eq!(
            summary,
            vec![(1, HistoryAction::Insert), (2, HistoryAction::Edit)]
        );
        assert_ne!(entries[0].user_action, entries[1].user_action);
    }

    #[test]
    fn unversioned_records_are_numbered() {
        let store = InMemoryRowStore::new();
        let row = Row::new();
        record(&store, 5, None, HistoryAction::Insert, &row);
        record(&store, 5, None, HistoryAction::Edit, &row);
        let versions: Vec<_> = read_history(&store, TableId::new(1), 5)
            .unwrap()
            .iter()
            .map(|e| e.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn values_of_a_version() {
        let store = InMemoryRowStore::new();
        record(&store, 1, Some(1), HistoryAction::Insert, &Row::new().with("n", 1i64));
        record(&store, 1, Some(2), HistoryAction::Edit, &Row::new().with("n", 2i64));
        let row = read_values(&store, TableId::new(1), 1, 1).unwrap().unwrap();
        assert_eq!(row.get("n").as_int(), Some(1));
        assert!(read_values(&store, TableId::new(1), 1, 3).unwrap().is_none());
    }

    #[test]
    fn missing_table_reads_empty() {
        let store = InMemoryRowStore::new();
        assert!(read_history(&store, TableId::new(1), 1).unwrap().is_empty());
    }
}
