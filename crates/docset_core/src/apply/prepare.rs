//! Stages that run before the storage transaction opens.

use super::{Action, Target};
use crate::blob::{BlobId, BlobStore};
use crate::error::{CoreError, CoreResult, IntegrityViolation};
use crate::hooks::BeforeWriteContext;
use crate::schema::{ColumnKind, Schema, TableDef};
use crate::types::{DocState, RowId};
use crate::value::Value;
use crate::working_set::{ItemValuesMut, WorkingSet};
use tracing::debug;

fn writes_values(target: &Target) -> bool {
    matches!(target.action, Action::Insert | Action::Edit { .. })
}

/// Resets calculated columns and runs `before_write` hooks.
pub(crate) fn run_hooks(ws: &mut WorkingSet<'_>) -> CoreResult<()> {
    let store = ws.store;
    for target in ws.targets().iter().filter(|t| writes_values(t)) {
        let hooks = store.hooks(target.doc);
        if hooks.is_empty() {
            continue;
        }
        let def = &store.schema().doc_types()[target.doc];
        let item = &mut ws.sets[target.doc][target.item];
        let state = if target.action == Action::Insert {
            DocState::Insert
        } else {
            DocState::Edit
        };

        reset_calculated(def.table(), &mut item.values);
        for hook in hooks {
            let mut values = ItemValuesMut::new(def.table(), &mut item.values);
            hook.before_write(&mut BeforeWriteContext {
                doc_type: def.name(),
                sub_type: None,
                id: item.id,
                state,
                values: &mut values,
            })?;
        }

        for (sub_def, set) in def.subs().iter().zip(item.subs.iter_mut()) {
            for row in &mut set.rows {
                reset_calculated(sub_def, &mut row.values);
                for hook in hooks {
                    let mut values = ItemValuesMut::new(sub_def, &mut row.values);
                    hook.before_write(&mut BeforeWriteContext {
                        doc_type: def.name(),
                        sub_type: Some(sub_def.name()),
                        id: row.id,
                        state,
                        values: &mut values,
                    })?;
                }
            }
        }
        debug!(doc_type = def.name(), id = %item.id, "before_write hooks ran");
    }
    Ok(())
}

fn reset_calculated(table: &TableDef, values: &mut [Value]) {
    for column in table.calculated_columns() {
        values[column] = Value::Null;
    }
}

/// Stores payloads assigned to blob columns and replaces them by their
/// identifiers.
pub(crate) fn stage_blobs(ws: &mut WorkingSet<'_>) -> CoreResult<()> {
    let store = ws.store;
    for target in ws.targets().iter().filter(|t| writes_values(t)) {
        let def = &store.schema().doc_types()[target.doc];
        let item = &mut ws.sets[target.doc][target.item];
        stage_row(store.blobs(), def.table(), &mut item.values)?;
        for (sub_def, set) in def.subs().iter().zip(item.subs.iter_mut()) {
            for row in &mut set.rows {
                stage_row(store.blobs(), sub_def, &mut row.values)?;
            }
        }
    }
    Ok(())
}

fn stage_row(blobs: &BlobStore, table: &TableDef, values: &mut [Value]) -> CoreResult<()> {
    for (column, declared) in table.columns().iter().enumerate() {
        if declared.kind != ColumnKind::Blob {
            continue;
        }
        if let Value::Bytes(bytes) = &values[column] {
            let id: BlobId = blobs.put(bytes)?;
            values[column] = Value::Int(id.as_i64());
        }
    }
    Ok(())
}

/// Checks required columns and variable reference pairs.
pub(crate) fn check_values(ws: &WorkingSet<'_>) -> CoreResult<()> {
    let schema = ws.store.schema();
    for target in ws.targets().iter().filter(|t| writes_values(t)) {
        let def = &schema.doc_types()[target.doc];
        let item = &ws.sets[target.doc][target.item];
        check_row(schema, def.table(), item.id, &item.values)?;
        for (sub_def, set) in def.subs().iter().zip(&item.subs) {
            for row in &set.rows {
                check_row(schema, sub_def, row.id, &row.values)?;
            }
        }
    }
    Ok(())
}

fn check_row(schema: &Schema, table: &TableDef, id: RowId, values: &[Value]) -> CoreResult<()> {
    for (declared, value) in table.columns().iter().zip(values) {
        if declared.nullable || declared.calculated || !value.is_null() {
            continue;
        }
        return Err(if declared.kind.is_reference() {
            CoreError::integrity(
                IntegrityViolation::RequiredReference,
                table.name(),
                id,
                format!("column '{}' must reference a row", declared.name),
            )
        } else {
            CoreError::invalid_request(format!(
                "column '{}' of {} {id} is required",
                declared.name,
                table.name()
            ))
        });
    }

    for pair in table.var_ref_columns() {
        let table_half = &values[pair.table_column];
        let row_half = &values[pair.row_column];
        if table_half.is_null() != row_half.is_null() {
            return Err(CoreError::integrity(
                IntegrityViolation::IncompleteVariableReference,
                table.name(),
                id,
                format!("variable reference '{}' is half populated", pair.decl.name),
            ));
        }
        let Some(target) = table_half.as_int() else {
            continue;
        };
        let mut allowed = false;
        for name in &pair.decl.targets {
            if i64::from(schema.resolve_table_id(name)?.as_u32()) == target {
                allowed = true;
                break;
            }
        }
        if !allowed {
            return Err(CoreError::integrity(
                IntegrityViolation::DisallowedVariableTarget,
                table.name(),
                id,
                format!(
                    "variable reference '{}' may not point into table {target}",
                    pair.decl.name
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, DocType, VarRefDecl};
    use crate::types::PendingId;

    fn schema() -> Schema {
        let mut schema = Schema::new()
            .with_type(
                DocType::new("Task")
                    .column(Column::text("title", 40).required())
                    .column(Column::doc_ref("owner", "Person").required())
                    .column(Column::int("owner_table"))
                    .column(Column::row_id("owner_row"))
                    .var_ref(
                        VarRefDecl::new("assignee", "owner_table", "owner_row").target("Person"),
                    ),
            )
            .unwrap()
            .with_type(DocType::new("Person").column(Column::text("name", 40)))
            .unwrap();
        schema.freeze().unwrap();
        schema
            .bind(&docset_storage::InMemoryRowStore::new())
            .unwrap();
        schema
    }

    fn task(schema: &Schema, title: Option<&str>, owner: Option<i64>, var: (Value, Value)) -> Vec<Value> {
        let table = schema.doc_type("Task").unwrap().table();
        let mut values = table.empty_values();
        values[0] = title.into();
        values[1] = owner.map_or(Value::Null, |o| Value::Id(RowId::Persisted(o)));
        values[2] = var.0;
        values[3] = var.1;
        values
    }

    fn check(schema: &Schema, values: &[Value]) -> CoreResult<()> {
        let table = schema.doc_type("Task").unwrap().table();
        check_row(schema, table, RowId::Pending(PendingId::new(1)), values)
    }

    #[test]
    fn complete_row_passes() {
        let schema = schema();
        let person = i64::from(schema.resolve_table_id("Person").unwrap().as_u32());
        let values = task(
            &schema,
            Some("write docs"),
            Some(3),
            (Value::Int(person), Value::Id(RowId::Persisted(3))),
        );
        check(&schema, &values).unwrap();
    }

    #[test]
    fn missing_required_reference_is_an_integrity_error() {
        let schema = schema();
        let values = task(&schema, Some("x"), None, (Value::Null, Value::Null));
        let err = check(&schema, &values).unwrap_err();
        assert_eq!(err.integrity_kind(), Some(IntegrityViolation::RequiredReference));
    }

    #[test]
    fn missing_required_text_is_invalid() {
        let schema = schema();
        let values = task(&schema, None, Some(1), (Value::Null, Value::Null));
        let err = check(&schema, &values).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[test]
    fn half_populated_pair_is_rejected() {
        let schema = schema();
        let values = task(
            &schema,
            Some("x"),
            Some(1),
            (Value::Null, Value::Id(RowId::Persisted(3))),
        );
        let err = check(&schema, &values).unwrap_err();
        assert_eq!(
            err.integrity_kind(),
            Some(IntegrityViolation::IncompleteVariableReference)
        );
    }

    #[test]
    fn table_outside_allow_list_is_rejected() {
        let schema = schema();
        let task_table = i64::from(schema.resolve_table_id("Task").unwrap().as_u32());
        let values = task(
            &schema,
            Some("x"),
            Some(1),
            (Value::Int(task_table), Value::Id(RowId::Persisted(3))),
        );
        let err = check(&schema, &values).unwrap_err();
        assert_eq!(
            err.integrity_kind(),
            Some(IntegrityViolation::DisallowedVariableTarget)
        );
    }
}
