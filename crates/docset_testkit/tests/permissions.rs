//! Permission checks fired by working sets, apply and history reads.

use docset_core::{DocState, ErrorCategory, PermissionReason as Reason, RowId, Value};
use docset_testkit::prelude::*;
use std::sync::Arc;

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

#[test]
fn edit_fires_view_then_before_edit() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    fixture.filter.clear();

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a]).unwrap();
    assert_eq!(
        fixture.filter.reasons(),
        vec![Reason::View, Reason::BeforeEdit]
    );

    let calls = fixture.filter.calls();
    assert!(calls[0].read_only);
    assert!(!calls[1].read_only);
    assert!(calls.iter().all(|c| c.id == RowId::from(a)));
}

#[test]
fn editing_a_viewed_document_skips_view() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    fixture.filter.clear();

    ws.edit(PERSON, &[a]).unwrap();
    assert_eq!(fixture.filter.reasons(), vec![Reason::BeforeEdit]);
}

#[test]
fn commit_checks_original_and_new_values() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a]).unwrap();
    ws.doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    fixture.filter.clear();

    ws.apply().unwrap();

    let calls = fixture.filter.calls();
    let org: Vec<_> = calls.iter().filter(|c| c.reason == Reason::ApplyEditOrg).collect();
    let new: Vec<_> = calls.iter().filter(|c| c.reason == Reason::ApplyEditNew).collect();
    assert_eq!(org.len(), 1);
    assert_eq!(new.len(), 1);
    assert!(org[0].read_only);
    assert!(!new[0].read_only);
    assert!(org[0].values.contains(&text("Ada")));
    assert!(!org[0].values.contains(&text("Augusta")));
    assert!(new[0].values.contains(&text("Augusta")));
    assert_eq!(fixture.filter.count(Reason::ApplyNew), 0);
}

#[test]
fn insert_fires_before_insert_and_apply_new() {
    let fixture = TestStore::new();
    let mut ws = fixture.working_set();
    let person = ws.insert(PERSON).unwrap();
    ws.doc_mut(PERSON, person).unwrap().set("last", "Hopper").unwrap();
    ws.apply().unwrap();

    assert_eq!(
        fixture.filter.reasons_for(PERSON, person),
        vec![Reason::BeforeInsert, Reason::ApplyNew]
    );
    let apply_new = fixture
        .filter
        .calls()
        .into_iter()
        .find(|c| c.reason == Reason::ApplyNew)
        .unwrap();
    assert!(apply_new.values.contains(&text("Hopper")));
}

#[test]
fn delete_fires_view_before_delete_and_apply_delete() {
    let fixture = TestStore::new();
    let company = fixture.add_company("Engines");
    fixture.filter.clear();

    let mut ws = fixture.working_set();
    ws.delete(COMPANY, &[RowId::from(company)]).unwrap();
    ws.apply().unwrap();

    assert_eq!(
        fixture.filter.reasons(),
        vec![Reason::View, Reason::BeforeDelete, Reason::ApplyDelete]
    );
    assert!(fixture.filter.calls().iter().all(|c| c.read_only));
}

#[test]
fn restore_fires_restore_reasons() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let mut ws = fixture.working_set();
    ws.delete(PERSON, &[RowId::from(a)]).unwrap();
    ws.apply().unwrap();
    ws.clear();
    fixture.filter.clear();

    ws.edit(PERSON, &[a]).unwrap();
    assert_eq!(
        fixture.filter.reasons(),
        vec![Reason::View, Reason::BeforeRestore, Reason::BeforeEdit]
    );
    fixture.filter.clear();

    ws.apply().unwrap();
    assert_eq!(
        fixture.filter.reasons(),
        vec![Reason::ApplyRestore, Reason::ApplyEditNew]
    );
    assert!(!fixture.is_deleted(PERSON, a).unwrap());
}

#[test]
fn denied_view_adds_nothing() {
    let fixture = TestStore::builder()
        .filter(Arc::new(DenyFilter::new(Reason::View)))
        .open();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut ws = fixture.working_set();
    let err = ws.view(PERSON, &[a, b]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AccessDenied);
    assert!(ws.is_empty());
    assert!(ws.edit(PERSON, &[a]).is_err());
    assert!(ws.is_empty());
}

#[test]
fn denied_edit_leaves_state_unchanged() {
    let fixture = TestStore::builder()
        .filter(Arc::new(DenyFilter::new(Reason::BeforeEdit).only(PERSON)))
        .open();
    let a = fixture.add_person("Ada", "Lovelace");
    let company = fixture.add_company("Engines");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    assert!(ws.edit(PERSON, &[a]).is_err());
    assert_eq!(
        ws.item_state(PERSON, RowId::from(a)).unwrap(),
        Some(DocState::View)
    );

    // Other types are not affected.
    ws.edit(COMPANY, &[company]).unwrap();
}

#[test]
fn denied_apply_writes_nothing() {
    let fixture = TestStore::builder()
        .filter(Arc::new(DenyFilter::new(Reason::ApplyEditNew).only(COMPANY)))
        .open();
    let a = fixture.add_person("Ada", "Lovelace");
    let company = fixture.add_company("Engines");

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a]).unwrap();
    ws.edit(COMPANY, &[company]).unwrap();
    ws.doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    ws.doc_mut(COMPANY, RowId::from(company))
        .unwrap()
        .set("city", "London")
        .unwrap();

    let err = ws.apply().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AccessDenied);
    assert_eq!(fixture.text(PERSON, a, "first").as_deref(), Some("Ada"));
    assert_eq!(fixture.version(PERSON, a).unwrap(), Some(1));
    assert_eq!(fixture.text(COMPANY, company, "city"), None);
    assert_eq!(
        ws.item_state(PERSON, RowId::from(a)).unwrap(),
        Some(DocState::Edit)
    );
}

#[test]
fn denied_insert_is_rejected_early() {
    let fixture = TestStore::builder()
        .filter(Arc::new(DenyFilter::new(Reason::BeforeInsert).only(COMPANY)))
        .open();
    let mut ws = fixture.working_set();
    assert!(ws.insert(COMPANY).is_err());
    assert!(ws.ids(COMPANY).unwrap().is_empty());
    ws.insert(PERSON).unwrap();
}

#[test]
fn history_reads_are_checked() {
    let fixture = TestStore::builder()
        .filter(Arc::new(DenyFilter::new(Reason::ViewHistory).only(COMPANY)))
        .open();
    let a = fixture.add_person("Ada", "Lovelace");
    let company = fixture.add_company("Engines");

    assert_eq!(fixture.history(PERSON, a).unwrap().len(), 1);
    assert_eq!(fixture.filter.count(Reason::ViewHistory), 1);
    let err = fixture.history(COMPANY, company).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::AccessDenied);
}

#[test]
fn closure_filters_can_veto() {
    let fixture = TestStore::builder()
        .filter(docset_core::filter_fn(|ctx, errors| {
            if ctx.reason == Reason::ApplyNew
                && ctx.doc_type == COMPANY
                && ctx.values.get("name").is_ok_and(|v| *v == text("Forbidden"))
            {
                errors.add("name", "this name is reserved");
            }
        }))
        .open();

    fixture.add_company("Allowed");
    let mut ws = fixture.working_set();
    let company = ws.insert(COMPANY).unwrap();
    ws.doc_mut(COMPANY, company)
        .unwrap()
        .set("name", "Forbidden")
        .unwrap();
    let err = ws.apply().unwrap_err();
    assert!(err.to_string().contains("reserved"));
    assert_eq!(fixture.count(COMPANY).unwrap(), 1);
}
