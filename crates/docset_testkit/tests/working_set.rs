//! Working-set behavior: states, grouped access, copies and sub-documents.

use docset_core::{CoreError, DocState, ErrorCategory, RowId, Value};
use docset_testkit::prelude::*;

#[test]
fn entering_documents_sets_their_state() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    ws.edit(PERSON, &[b]).unwrap();
    let c = ws.insert(PERSON).unwrap();

    assert_eq!(ws.item_state(PERSON, RowId::from(a)).unwrap(), Some(DocState::View));
    assert_eq!(ws.item_state(PERSON, RowId::from(b)).unwrap(), Some(DocState::Edit));
    assert_eq!(ws.item_state(PERSON, c).unwrap(), Some(DocState::Insert));
    assert!(c.is_pending());
    assert_eq!(ws.len(), 3);
}

#[test]
fn doc_state_reports_mixed() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut ws = fixture.working_set();
    assert_eq!(ws.doc_state(PERSON).unwrap(), None);

    ws.edit(PERSON, &[a, b]).unwrap();
    assert_eq!(ws.doc_state(PERSON).unwrap(), Some(DocState::Edit));

    let c = ws.insert(PERSON).unwrap();
    assert_eq!(ws.doc_state(PERSON).unwrap(), Some(DocState::Mixed));
    assert_eq!(
        ws.group_state(PERSON, &[RowId::from(a), RowId::from(b)]).unwrap(),
        Some(DocState::Edit)
    );
    assert_eq!(
        ws.group_state(PERSON, &[RowId::from(a), c]).unwrap(),
        Some(DocState::Mixed)
    );
}

#[test]
fn doc_state_no_view_ignores_viewed_documents() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    ws.delete(PERSON, &[RowId::from(b)]).unwrap();

    assert_eq!(ws.doc_state(PERSON).unwrap(), Some(DocState::Mixed));
    assert_eq!(ws.doc_state_no_view(PERSON).unwrap(), Some(DocState::Delete));
    assert_eq!(ws.state_no_view(), Some(DocState::Delete));
}

#[test]
fn grouped_values_are_grayed_where_rows_differ() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Smith");
    let b = fixture.add_person("Grace", "Smith");
    let ids = [RowId::from(a), RowId::from(b)];

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a, b]).unwrap();
    {
        let group = ws.group(PERSON, &ids).unwrap();
        assert_eq!(group.len(), 2);
        assert!(!group.is_grayed_by_name("last").unwrap());
        assert!(group.is_grayed_by_name("first").unwrap());
        assert_eq!(group.get("first").unwrap(), &Value::from("Ada"));
    }

    ws.group_mut(PERSON, &ids).unwrap().set("first", "Alan").unwrap();
    let group = ws.group(PERSON, &ids).unwrap();
    assert!(!group.is_grayed_by_name("first").unwrap());
    assert_eq!(ws.doc(PERSON, ids[1]).unwrap().get("first").unwrap(), &Value::from("Alan"));
}

#[test]
fn grouped_write_needs_writable_documents() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    let err = ws.group_mut(PERSON, &[RowId::from(a)]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    assert!(ws.group(PERSON, &[]).is_err());
}

#[test]
fn viewed_documents_are_read_only() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    assert!(ws.doc(PERSON, RowId::from(a)).unwrap().is_read_only());
    assert!(ws.doc_mut(PERSON, RowId::from(a)).is_err());
}

#[test]
fn insert_copy_duplicates_sub_documents() {
    let fixture = TestStore::new();
    let mut ws = fixture.working_set();
    let source = ws.insert(PERSON).unwrap();
    ws.doc_mut(PERSON, source).unwrap().set("last", "Hopper").unwrap();
    let phone = ws.sub_insert(PERSON, source, PHONES).unwrap();
    ws.sub_row_mut(PERSON, source, PHONES, phone)
        .unwrap()
        .set("number", "+15550100")
        .unwrap();
    ws.doc_mut(PERSON, source)
        .unwrap()
        .set("primary_phone", phone)
        .unwrap();

    let copies = ws.insert_copy(PERSON, &[source]).unwrap();
    assert_eq!(copies.len(), 1);
    let copy = copies[0];
    assert_ne!(copy, source);
    assert_eq!(ws.item_state(PERSON, copy).unwrap(), Some(DocState::Insert));

    let copied_phones = ws.sub_ids(PERSON, copy, PHONES).unwrap();
    assert_eq!(copied_phones.len(), 1);
    assert_ne!(copied_phones[0], phone);
    assert_eq!(
        ws.sub_row(PERSON, copy, PHONES, copied_phones[0])
            .unwrap()
            .get("number")
            .unwrap(),
        &Value::from("+15550100")
    );
    // The copy's primary phone points at its own copied row.
    assert_eq!(
        ws.doc(PERSON, copy).unwrap().get("primary_phone").unwrap(),
        &Value::Id(copied_phones[0])
    );

    let report = ws.apply().unwrap();
    assert_eq!(fixture.count(PERSON).unwrap(), 2);
    assert_eq!(report.inserted.len(), 4);
}

#[test]
fn insert_copy_keeps_references_into_other_tables() {
    let fixture = TestStore::new();
    let company = fixture.add_company("Engines");
    let boss = fixture.add_person("Charles", "Babbage");

    let mut ws = fixture.working_set();
    let source = ws.insert(PERSON).unwrap();
    let phone = ws.sub_insert(PERSON, source, PHONES).unwrap();
    ws.sub_row_mut(PERSON, source, PHONES, phone)
        .unwrap()
        .set("number", "+15550100")
        .unwrap();
    {
        let mut doc = ws.doc_mut(PERSON, source).unwrap();
        doc.set("last", "Lovelace").unwrap();
        doc.set("employer", RowId::from(company)).unwrap();
        doc.set("manager", RowId::from(boss)).unwrap();
        doc.set("primary_phone", phone).unwrap();
    }
    ws.set_var_ref(PERSON, source, "owner", Some((COMPANY, RowId::from(company))))
        .unwrap();
    let report = ws.apply().unwrap();
    let source = report.id_of(source).unwrap();
    let phone = report.id_of(phone).unwrap();
    // The foreign identifiers coincide with the phone row's identifier.
    assert_eq!((company, boss), (phone, phone));

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[source]).unwrap();
    let copy = ws.insert_copy(PERSON, &[RowId::from(source)]).unwrap()[0];
    let copied_phone = ws.sub_ids(PERSON, copy, PHONES).unwrap()[0];
    {
        let doc = ws.doc(PERSON, copy).unwrap();
        assert_eq!(doc.get("employer").unwrap(), &Value::Id(RowId::from(company)));
        assert_eq!(doc.get("manager").unwrap(), &Value::Id(RowId::from(boss)));
        assert_eq!(doc.get("owner_row").unwrap(), &Value::Id(RowId::from(company)));
        assert_eq!(doc.get("primary_phone").unwrap(), &Value::Id(copied_phone));
    }

    let report = ws.apply().unwrap();
    let copy = report.id_of(copy).unwrap();
    assert_eq!(
        fixture.reference(PERSON, copy, "employer"),
        Some(RowId::from(company))
    );
    assert_eq!(
        fixture.reference(PERSON, copy, "primary_phone"),
        Some(RowId::from(report.id_of(copied_phone).unwrap()))
    );
}

#[test]
fn insert_copy_of_viewed_document() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    let copy = ws.insert_copy(PERSON, &[RowId::from(a)]).unwrap()[0];
    ws.doc_mut(PERSON, copy).unwrap().set("first", "Augusta").unwrap();
    let report = ws.apply().unwrap();

    let id = report.id_of(copy).unwrap();
    assert_ne!(id, a);
    assert_eq!(fixture.text(PERSON, id, "last").as_deref(), Some("Lovelace"));
    assert_eq!(fixture.text(PERSON, a, "first").as_deref(), Some("Ada"));
}

#[test]
fn clear_discards_without_writing() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a]).unwrap();
    ws.doc_mut(PERSON, RowId::from(a)).unwrap().set("first", "X").unwrap();
    ws.insert(PERSON).unwrap();
    ws.clear();

    assert!(ws.is_empty());
    assert!(ws.apply().unwrap().is_empty());
    assert_eq!(fixture.text(PERSON, a, "first").as_deref(), Some("Ada"));
    assert_eq!(fixture.count(PERSON).unwrap(), 1);
}

#[test]
fn clear_view_keeps_pending_changes() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    ws.edit(PERSON, &[b]).unwrap();
    ws.clear_view();

    assert_eq!(ws.ids(PERSON).unwrap(), vec![RowId::from(b)]);
}

#[test]
fn sub_documents_need_a_writable_parent() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    let err = ws.sub_insert(PERSON, RowId::from(a), PHONES).unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest { .. }));

    ws.change_state(PERSON, &[RowId::from(a)], DocState::Edit).unwrap();
    let phone = ws.sub_insert(PERSON, RowId::from(a), PHONES).unwrap();
    ws.sub_row_mut(PERSON, RowId::from(a), PHONES, phone)
        .unwrap()
        .set("number", "+15550101")
        .unwrap();
    let report = ws.apply().unwrap();

    let phone_id = report.id_of(phone).unwrap();
    let mut ws = fixture.working_set();
    ws.view(PERSON, &[a]).unwrap();
    assert_eq!(
        ws.sub_ids(PERSON, RowId::from(a), PHONES).unwrap(),
        vec![RowId::from(phone_id)]
    );
}

#[test]
fn removed_sub_documents_are_deleted() {
    let fixture = TestStore::new();
    let mut ws = fixture.working_set();
    let person = ws.insert(PERSON).unwrap();
    ws.doc_mut(PERSON, person).unwrap().set("last", "Hopper").unwrap();
    for number in ["+15550102", "+15550103"] {
        let row = ws.sub_insert(PERSON, person, PHONES).unwrap();
        ws.sub_row_mut(PERSON, person, PHONES, row)
            .unwrap()
            .set("number", number)
            .unwrap();
    }
    let id = ws.apply().unwrap().id_of(person).unwrap();

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[id]).unwrap();
    let rows = ws.sub_ids(PERSON, RowId::from(id), PHONES).unwrap();
    ws.sub_delete(PERSON, RowId::from(id), PHONES, rows[0]).unwrap();
    ws.apply().unwrap();

    assert_eq!(fixture.version(PERSON, id).unwrap(), Some(2));
    let mut ws = fixture.working_set();
    ws.view(PERSON, &[id]).unwrap();
    assert_eq!(ws.sub_ids(PERSON, RowId::from(id), PHONES).unwrap(), vec![rows[1]]);
}

#[test]
fn change_state_to_view_discards_edits() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a]).unwrap();
    ws.doc_mut(PERSON, RowId::from(a)).unwrap().set("first", "X").unwrap();
    ws.change_state(PERSON, &[RowId::from(a)], DocState::View).unwrap();

    assert_eq!(ws.item_state(PERSON, RowId::from(a)).unwrap(), Some(DocState::View));
    assert_eq!(
        ws.doc(PERSON, RowId::from(a)).unwrap().get("first").unwrap(),
        &Value::from("Ada")
    );
}

#[test]
fn deleting_a_pending_document_drops_it() {
    let fixture = TestStore::new();
    let mut ws = fixture.working_set();
    let pending = ws.insert(PERSON).unwrap();
    ws.delete(PERSON, &[pending]).unwrap();

    assert!(ws.is_empty());
    assert!(ws.apply().unwrap().is_empty());
}

#[test]
fn values_are_checked_on_assignment() {
    let fixture = TestStore::new();
    let mut ws = fixture.working_set();
    let person = ws.insert(PERSON).unwrap();
    let mut doc = ws.doc_mut(PERSON, person).unwrap();

    assert!(doc.set("first", 42).is_err());
    assert!(doc.set("first", "x".repeat(41)).is_err());
    assert!(doc.set("nickname", "Ada").is_err());
    doc.set("first", "x".repeat(40)).unwrap();
}

#[test]
fn missing_required_column_fails_apply() {
    let fixture = TestStore::new();
    let mut ws = fixture.working_set();
    let person = ws.insert(PERSON).unwrap();
    ws.doc_mut(PERSON, person).unwrap().set("first", "Ada").unwrap();

    let err = ws.apply().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidRequest);
    assert_eq!(fixture.count(PERSON).unwrap(), 0);
    assert_eq!(ws.item_state(PERSON, person).unwrap(), Some(DocState::Insert));
}
