//! Side changes, long locks and idempotent retry.

use chrono::Duration;
use docset_core::{
    Config, ConflictKind, ConflictPolicy, CoreError, DocState, ErrorCategory, LongLockRegistry,
    RowId, REQUESTS_TABLE,
};
use docset_storage::RowStore;
use docset_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn stale_version_fails_the_whole_apply() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut first = fixture.working_set();
    first.edit(PERSON, &[a, b]).unwrap();

    let mut second = fixture.working_set();
    second.edit(PERSON, &[a]).unwrap();
    second
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    second.apply().unwrap();

    first
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Countess")
        .unwrap();
    first
        .doc_mut(PERSON, RowId::from(b))
        .unwrap()
        .set("first", "Chuck")
        .unwrap();
    let err = first.apply().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ConcurrencyConflict);
    let CoreError::ConcurrencyConflict { conflicts } = err else {
        panic!("expected a concurrency conflict");
    };
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].id, a);
    assert_eq!(
        conflicts[0].kind,
        ConflictKind::VersionMismatch {
            expected: 1,
            found: 2
        }
    );

    // Nothing was written, not even the document without a conflict.
    assert_eq!(fixture.text(PERSON, a, "first").as_deref(), Some("Augusta"));
    assert_eq!(fixture.text(PERSON, b, "first").as_deref(), Some("Charles"));
    assert_eq!(fixture.version(PERSON, b).unwrap(), Some(1));
}

#[test]
fn skip_conflicting_commits_the_rest() {
    let fixture =
        TestStore::with_config(Config::new().conflict_policy(ConflictPolicy::SkipConflicting));
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut first = fixture.working_set();
    first.edit(PERSON, &[a, b]).unwrap();

    let mut second = fixture.working_set();
    second.edit(PERSON, &[a]).unwrap();
    second
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    second.apply().unwrap();

    for (id, name) in [(a, "Countess"), (b, "Chuck")] {
        first
            .doc_mut(PERSON, RowId::from(id))
            .unwrap()
            .set("first", name)
            .unwrap();
    }
    let report = first.apply().unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].id, a);
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].id, b);
    assert_eq!(fixture.text(PERSON, a, "first").as_deref(), Some("Augusta"));
    assert_eq!(fixture.text(PERSON, b, "first").as_deref(), Some("Chuck"));

    // The skipped document keeps its pending edit.
    assert_eq!(
        first.item_state(PERSON, RowId::from(a)).unwrap(),
        Some(DocState::Edit)
    );
    assert_eq!(
        first.item_state(PERSON, RowId::from(b)).unwrap(),
        Some(DocState::View)
    );
}

#[test]
fn unversioned_side_change_is_detected_by_content() {
    let fixture = TestStore::new();
    let company = fixture.add_company("Engines");

    let mut first = fixture.working_set();
    first.edit(COMPANY, &[company]).unwrap();

    let mut second = fixture.working_set();
    second.edit(COMPANY, &[company]).unwrap();
    second
        .doc_mut(COMPANY, RowId::from(company))
        .unwrap()
        .set("name", "Analytical Engines")
        .unwrap();
    second.apply().unwrap();

    first
        .doc_mut(COMPANY, RowId::from(company))
        .unwrap()
        .set("city", "London")
        .unwrap();
    let err = first.apply().unwrap_err();
    let CoreError::ConcurrencyConflict { conflicts } = err else {
        panic!("expected a concurrency conflict");
    };
    assert_eq!(conflicts[0].kind, ConflictKind::ContentChanged);
}

#[test]
fn removed_document_is_a_conflict() {
    let fixture = TestStore::new();
    let company = fixture.add_company("Engines");

    let mut first = fixture.working_set();
    first.edit(COMPANY, &[company]).unwrap();

    let mut second = fixture.working_set();
    second.delete(COMPANY, &[RowId::from(company)]).unwrap();
    second.apply().unwrap();

    first
        .doc_mut(COMPANY, RowId::from(company))
        .unwrap()
        .set("city", "London")
        .unwrap();
    let err = first.apply().unwrap_err();
    let CoreError::ConcurrencyConflict { conflicts } = err else {
        panic!("expected a concurrency conflict");
    };
    assert_eq!(conflicts[0].kind, ConflictKind::Missing);
}

#[test]
fn conflicted_apply_can_be_retried_after_reload() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut first = fixture.working_set();
    first.edit(PERSON, &[a]).unwrap();
    let mut second = fixture.working_set();
    second.edit(PERSON, &[a]).unwrap();
    second
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    second.apply().unwrap();

    first
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("last", "King")
        .unwrap();
    assert!(first.apply().is_err());

    first
        .change_state(PERSON, &[RowId::from(a)], DocState::View)
        .unwrap();
    first.edit(PERSON, &[a]).unwrap();
    first
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("last", "King")
        .unwrap();
    first.apply().unwrap();

    assert_eq!(fixture.version(PERSON, a).unwrap(), Some(3));
    assert_eq!(
        fixture.text(PERSON, a, "full_name").as_deref(),
        Some("Augusta King")
    );
}

#[test]
fn long_lock_blocks_other_editors() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut holder = fixture.working_set();
    let token = holder.acquire_long_lock(PERSON, &[a]).unwrap();

    let mut other = fixture.working_set();
    let err = other.edit(PERSON, &[a]).unwrap_err();
    assert!(matches!(err, CoreError::LockConflict { holder: h, .. } if h == token));
    assert!(other.delete(PERSON, &[RowId::from(a)]).is_err());
    // Reading is not affected.
    other.view(PERSON, &[a]).unwrap();

    // The holder itself may edit.
    holder.edit(PERSON, &[a]).unwrap();
    holder
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    holder.apply().unwrap();

    holder.release_long_lock(token).unwrap();
    assert!(holder.lock_tokens().is_empty());
    other.edit(PERSON, &[a]).unwrap();
}

#[test]
fn apply_refuses_documents_locked_after_edit() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut editor = fixture.working_set();
    editor.edit(PERSON, &[a]).unwrap();
    editor
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();

    let mut holder = fixture.working_set();
    holder.acquire_long_lock(PERSON, &[a]).unwrap();

    let err = editor.apply().unwrap_err();
    assert!(matches!(err, CoreError::LockConflict { .. }));
    assert_eq!(fixture.version(PERSON, a).unwrap(), Some(1));
}

#[test]
fn overlapping_lock_is_rejected() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut first = fixture.working_set();
    first.acquire_long_lock(PERSON, &[a, b]).unwrap();
    let mut second = fixture.working_set();
    let err = second.acquire_long_lock(PERSON, &[b]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ConcurrencyConflict);
    assert_eq!(fixture.long_locks().len(), 1);
}

#[test]
fn releasing_a_foreign_token_fails() {
    let fixture = TestStore::new();
    let a = fixture.add_person("Ada", "Lovelace");

    let mut first = fixture.working_set();
    let token = first.acquire_long_lock(PERSON, &[a]).unwrap();
    let mut second = fixture.working_set();
    let err = second.release_long_lock(token).unwrap_err();
    assert!(matches!(err, CoreError::UnknownLockToken { .. }));
    assert!(fixture.long_locks().get(token).is_some());
}

#[test]
fn lock_checks_can_be_disabled() {
    let fixture = TestStore::with_config(Config::new().check_long_locks(false));
    let a = fixture.add_person("Ada", "Lovelace");

    let mut holder = fixture.working_set();
    holder.acquire_long_lock(PERSON, &[a]).unwrap();
    let mut other = fixture.working_set();
    other.edit(PERSON, &[a]).unwrap();
}

#[test]
fn stores_can_share_a_lock_registry() {
    let locks = Arc::new(LongLockRegistry::new());
    let backend: Arc<dyn docset_storage::RowStore> =
        Arc::new(docset_storage::InMemoryRowStore::new());
    let first = TestStore::builder()
        .backend(Arc::clone(&backend))
        .long_locks(Arc::clone(&locks))
        .open();
    let second = TestStore::builder()
        .backend(backend)
        .long_locks(Arc::clone(&locks))
        .open();
    let a = first.add_person("Ada", "Lovelace");

    let mut holder = first.working_set();
    holder.acquire_long_lock(PERSON, &[a]).unwrap();
    let mut other = second.working_set();
    assert!(other.edit(PERSON, &[a]).is_err());
    assert_eq!(locks.len(), 1);
}

fn flaky_fixture() -> (Arc<FlakyStore>, TestStore) {
    let flaky = Arc::new(FlakyStore::new());
    let fixture = TestStore::builder().backend(flaky.clone()).open();
    (flaky, fixture)
}

#[test]
fn retry_after_lost_ack_does_not_duplicate() {
    let (flaky, fixture) = flaky_fixture();
    let mut ws = fixture.working_set();
    let person = ws.insert(PERSON).unwrap();
    ws.doc_mut(PERSON, person).unwrap().set("last", "Lovelace").unwrap();
    let phone = ws.sub_insert(PERSON, person, PHONES).unwrap();
    ws.sub_row_mut(PERSON, person, PHONES, phone)
        .unwrap()
        .set("number", "+15550105")
        .unwrap();
    let request_id = ws.request_id();

    flaky.arm(CommitFault::LoseAck);
    let err = ws.apply().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert_eq!(fixture.count(PERSON).unwrap(), 1);
    // The working set is untouched and keeps its request id.
    assert_eq!(ws.item_state(PERSON, person).unwrap(), Some(DocState::Insert));
    assert_eq!(ws.request_id(), request_id);

    let report = ws.apply().unwrap();
    assert!(report.replayed);
    assert_eq!(report.request_id, request_id);
    assert_eq!(fixture.count(PERSON).unwrap(), 1);
    assert_eq!(flaky.commits(), 1);

    let id = report.id_of(person).unwrap();
    let phone_id = report.id_of(phone).unwrap();
    assert_eq!(fixture.ids(PERSON).unwrap(), vec![id]);
    assert_eq!(ws.ids(PERSON).unwrap(), vec![RowId::from(id)]);
    assert_eq!(
        ws.sub_ids(PERSON, RowId::from(id), PHONES).unwrap(),
        vec![RowId::from(phone_id)]
    );
    assert_ne!(ws.request_id(), request_id);
}

#[test]
fn retry_after_failed_commit_writes_once() {
    let (flaky, fixture) = flaky_fixture();
    let mut ws = fixture.working_set();
    let person = ws.insert(PERSON).unwrap();
    ws.doc_mut(PERSON, person).unwrap().set("last", "Hopper").unwrap();

    flaky.arm(CommitFault::BeforeCommit);
    assert!(ws.apply().is_err());
    assert_eq!(fixture.count(PERSON).unwrap(), 0);

    let report = ws.apply().unwrap();
    assert!(!report.replayed);
    assert_eq!(fixture.count(PERSON).unwrap(), 1);
    assert!(report.id_of(person).is_some());
}

#[test]
fn replayed_edit_does_not_bump_twice() {
    let (flaky, fixture) = flaky_fixture();
    let a = fixture.add_person("Ada", "Lovelace");
    fixture.hooks.clear();

    let mut ws = fixture.working_set();
    ws.edit(PERSON, &[a]).unwrap();
    ws.doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();

    flaky.arm(CommitFault::LoseAck);
    assert!(ws.apply().is_err());
    let report = ws.apply().unwrap();

    assert!(report.replayed);
    assert_eq!(report.updated.len(), 1);
    assert_eq!(fixture.version(PERSON, a).unwrap(), Some(2));
    assert_eq!(fixture.history(PERSON, a).unwrap().len(), 2);
    // The hook sees the change once, after the replay.
    assert_eq!(fixture.hooks.events().len(), 1);
}

#[test]
fn replay_reports_the_skipped_conflicts() {
    let flaky = Arc::new(FlakyStore::new());
    let fixture = TestStore::builder()
        .backend(flaky.clone())
        .config(Config::new().conflict_policy(ConflictPolicy::SkipConflicting))
        .open();
    let a = fixture.add_person("Ada", "Lovelace");
    let b = fixture.add_person("Charles", "Babbage");

    let mut first = fixture.working_set();
    first.edit(PERSON, &[a, b]).unwrap();

    let mut second = fixture.working_set();
    second.edit(PERSON, &[a]).unwrap();
    second
        .doc_mut(PERSON, RowId::from(a))
        .unwrap()
        .set("first", "Augusta")
        .unwrap();
    second.apply().unwrap();

    for (id, name) in [(a, "Countess"), (b, "Chuck")] {
        first
            .doc_mut(PERSON, RowId::from(id))
            .unwrap()
            .set("first", name)
            .unwrap();
    }
    flaky.arm(CommitFault::LoseAck);
    assert!(first.apply().is_err());
    let report = first.apply().unwrap();

    assert!(report.replayed);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].id, a);
    assert_eq!(
        report.conflicts[0].kind,
        ConflictKind::VersionMismatch {
            expected: 1,
            found: 2
        }
    );
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].id, b);
    assert_eq!(fixture.version(PERSON, b).unwrap(), Some(2));
}

#[test]
fn expired_request_records_are_pruned() {
    let fixture = TestStore::with_config(Config::new().request_retention(Some(Duration::zero())));
    let backend = fixture.backend().clone();
    let requests = backend.table_id(REQUESTS_TABLE).unwrap();

    fixture.add_person("Ada", "Lovelace");
    fixture.add_person("Charles", "Babbage");
    fixture.add_person("Grace", "Hopper");
    // Each apply prunes the records written before it.
    assert_eq!(backend.count(requests).unwrap(), 1);

    let fixture = TestStore::with_config(Config::new().request_retention(None));
    let backend = fixture.backend().clone();
    let requests = backend.table_id(REQUESTS_TABLE).unwrap();
    fixture.add_person("Ada", "Lovelace");
    fixture.add_person("Charles", "Babbage");
    assert_eq!(backend.count(requests).unwrap(), 2);
}
