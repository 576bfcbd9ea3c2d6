//! History command implementation.

use docset_core::history::read_history;
use docset_core::HistoryEntry;
use docset_storage::RowStore;
use serde::Serialize;
use std::path::Path;

/// One history record in printable form.
#[derive(Debug, Serialize)]
pub struct HistoryLine {
    /// Version the record belongs to.
    pub version: u64,
    /// Recorded action.
    pub action: String,
    /// User action that grouped the change.
    pub user_action: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl From<&HistoryEntry> for HistoryLine {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            version: entry.version,
            action: entry.action.to_string(),
            user_action: entry.user_action.to_string(),
            timestamp: entry.timestamp.to_rfc3339(),
        }
    }
}

/// Runs the history command.
pub fn run(path: &Path, table: &str, id: i64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open(path)?;
    let lines = history(&store, table, id)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
        _ => {
            println!("History of {table} {id}");
            if lines.is_empty() {
                println!("  (no records)");
            }
            for line in &lines {
                println!(
                    "  v{:<4} {:<8} {} {}",
                    line.version, line.action, line.timestamp, line.user_action
                );
            }
        }
    }

    Ok(())
}

/// Reads the history of one document.
pub fn history(
    store: &dyn RowStore,
    table: &str,
    id: i64,
) -> Result<Vec<HistoryLine>, Box<dyn std::error::Error>> {
    let table_id = store
        .table_id(table)
        .ok_or_else(|| format!("No table named '{table}'"))?;
    let entries = read_history(store, table_id, id)?;
    Ok(entries.iter().map(HistoryLine::from).collect())
}
