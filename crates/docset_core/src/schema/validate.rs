//! Cross-validation performed once when a schema is frozen.

use super::table::{ColumnKind, DocType, TableDef};
use crate::error::{CoreError, CoreResult};
use std::collections::{HashMap, HashSet};

/// Validates a complete set of document types.
pub(super) fn validate(types: &[DocType]) -> CoreResult<()> {
    let mut table_names = HashSet::new();
    for doc in types {
        for table in std::iter::once(doc.table()).chain(doc.subs()) {
            check_name(table.name(), None, table.name())?;
            if !table_names.insert(table.name()) {
                return Err(CoreError::schema(
                    table.name(),
                    None,
                    "table name declared more than once",
                ));
            }
        }
    }

    check_calculated_names(types)?;
    for doc in types {
        validate_table(doc.table(), types)?;
        for sub in doc.subs() {
            validate_table(sub, types)?;
        }
    }
    Ok(())
}

fn check_name(table: &str, column: Option<&str>, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::schema(table, column, "name must not be empty"));
    }
    if name.starts_with('_') {
        return Err(CoreError::schema(
            table,
            column,
            "names starting with '_' are reserved",
        ));
    }
    Ok(())
}

/// Rejects calculated column names that any table of the set declares as a
/// source column.
fn check_calculated_names(types: &[DocType]) -> CoreResult<()> {
    let tables = || types.iter().flat_map(|d| std::iter::once(d.table()).chain(d.subs()));
    let mut sources: HashMap<&str, &str> = HashMap::new();
    for table in tables() {
        for column in table.columns().iter().filter(|c| !c.calculated) {
            sources.entry(column.name.as_str()).or_insert(table.name());
        }
    }

    for table in tables() {
        for column in table.columns().iter().filter(|c| c.calculated) {
            if let Some(owner) = sources.get(column.name.as_str()) {
                return Err(CoreError::schema(
                    table.name(),
                    Some(&column.name),
                    format!("calculated column collides with a source column of {owner}"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_table(table: &TableDef, types: &[DocType]) -> CoreResult<()> {
    let name = table.name();
    let mut sources = HashSet::new();
    let mut calculated = HashSet::new();

    for column in table.columns() {
        check_name(name, Some(&column.name), &column.name)?;
        let seen = if column.calculated {
            &mut calculated
        } else {
            &mut sources
        };
        if !seen.insert(column.name.as_str()) {
            return Err(CoreError::schema(
                name,
                Some(&column.name),
                "column declared more than once",
            ));
        }
    }

    let mut trees = 0;
    for column in table.columns() {
        match &column.kind {
            ColumnKind::DocRef(target) => {
                if !types.iter().any(|d| d.name() == target) {
                    return Err(CoreError::schema(
                        name,
                        Some(&column.name),
                        format!("reference to unknown document type '{target}'"),
                    ));
                }
            }
            ColumnKind::SubRef { document, sub } => {
                let found = types
                    .iter()
                    .find(|d| d.name() == document)
                    .and_then(|d| d.sub_index(sub));
                if found.is_none() {
                    return Err(CoreError::schema(
                        name,
                        Some(&column.name),
                        format!("reference to unknown sub-document type '{document}.{sub}'"),
                    ));
                }
            }
            ColumnKind::TreeRef => trees += 1,
            _ => {}
        }
    }
    if trees > 1 {
        return Err(CoreError::schema(
            name,
            None,
            "at most one tree reference column is allowed",
        ));
    }

    validate_var_refs(table, types)?;

    for key in table.ordering() {
        if table.column_index(&key.column).is_none() {
            return Err(CoreError::schema(
                name,
                Some(&key.column),
                "ordering names neither a source nor a calculated column",
            ));
        }
    }
    Ok(())
}

fn validate_var_refs(table: &TableDef, types: &[DocType]) -> CoreResult<()> {
    let name = table.name();
    let mut claimed: HashMap<&str, &str> = HashMap::new();

    for decl in table.var_refs() {
        for (column, expected) in [
            (&decl.table_column, ColumnKind::Int),
            (&decl.row_column, ColumnKind::RowId),
        ] {
            if let Some(owner) = claimed.insert(column.as_str(), decl.name.as_str()) {
                return Err(CoreError::schema(
                    name,
                    Some(column),
                    format!("column already claimed by variable reference '{owner}'"),
                ));
            }
            let index = table.column_index(column).ok_or_else(|| {
                CoreError::schema(
                    name,
                    Some(column),
                    format!("variable reference '{}' names an unknown column", decl.name),
                )
            })?;
            let declared = &table.columns()[index];
            if declared.kind != expected || declared.calculated {
                return Err(CoreError::schema(
                    name,
                    Some(column),
                    format!(
                        "variable reference '{}' needs a {expected} source column",
                        decl.name
                    ),
                ));
            }
        }

        if decl.targets.is_empty() {
            return Err(CoreError::schema(
                name,
                Some(&decl.name),
                "variable reference has no allowed targets",
            ));
        }
        for target in &decl.targets {
            if !types.iter().any(|d| d.name() == target) {
                return Err(CoreError::schema(
                    name,
                    Some(&decl.name),
                    format!("unknown target document type '{target}'"),
                ));
            }
        }
    }
    Ok(())
}
