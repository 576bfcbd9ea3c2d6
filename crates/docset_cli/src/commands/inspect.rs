//! Inspect command implementation.

use docset_storage::RowStore;
use serde::Serialize;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Total number of rows.
    pub row_count: usize,
    /// Table statistics.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table ID.
    pub id: u32,
    /// Table name.
    pub name: String,
    /// Number of rows.
    pub row_count: usize,
    /// Columns populated in at least one row (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_columns: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open(path)?;
    let result = inspect(&store, path, show_columns)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects table statistics.
pub fn inspect(
    store: &dyn RowStore,
    path: &Path,
    show_columns: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut tables = Vec::new();
    for (id, name) in store.tables() {
        let row_count = store.count(id)?;
        let columns = if show_columns {
            let mut names: Vec<String> = Vec::new();
            for (_, row) in store.select_where(id, &docset_storage::Filter::All)? {
                for (column, _) in row.iter() {
                    if !names.iter().any(|n| n == column) {
                        names.push(column.to_string());
                    }
                }
            }
            names.sort();
            Some(names)
        } else {
            None
        };
        tables.push(TableStats {
            id: id.as_u32(),
            name,
            row_count,
            columns,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        row_count: tables.iter().map(|t| t.row_count).sum(),
        tables,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("docset Snapshot Inspection");
    println!("==========================");
    println!();
    println!("Path: {}", result.path);
    println!("Tables: {}", result.tables.len());
    println!("Rows: {}", result.row_count);
    println!();

    for table in &result.tables {
        println!("  [{}] {} - {} rows", table.id, table.name, table.row_count);
        if let Some(columns) = &table.columns {
            println!("      columns: {}", columns.join(", "));
        }
    }
}
