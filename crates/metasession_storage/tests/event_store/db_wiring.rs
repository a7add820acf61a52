#![forbid(unsafe_code)]

use chrono::NaiveDateTime;
use metasession_contracts::event::{
    EventCandidate, EventFingerprint, EventType, SessionId, TenantId,
};
use metasession_contracts::MonotonicTimeNs;
use metasession_storage::repo::{AdmissionTxnRepo, EventStoreRepo};
use metasession_storage::store::{MetasessionStore, StorageError, EVENTS_FINGERPRINT_UNIQUE};

fn candidate(tenant_id: &str, session_id: &str, seq: u64) -> EventCandidate {
    EventCandidate::v1(
        TenantId::new(tenant_id).unwrap(),
        SessionId::new(session_id).unwrap(),
        EventType::new("page_view").unwrap(),
        NaiveDateTime::parse_from_str("2026-01-13 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        EventFingerprint::new(format!("{seq:040x}")).unwrap(),
    )
    .unwrap()
}

fn insert(s: &mut MetasessionStore, now: u64, c: &EventCandidate) -> Result<u64, StorageError> {
    s.with_admission_txn(MonotonicTimeNs(now), |txn| txn.insert_event(c))
}

#[test]
fn at_event_store_db_01_fingerprint_uniqueness_enforced() {
    let mut s = MetasessionStore::new_in_memory();
    let c = candidate("t1", "s1", 7);

    assert_eq!(insert(&mut s, 10, &c).unwrap(), 1);
    let err = insert(&mut s, 11, &c).unwrap_err();

    assert!(err.is_fingerprint_duplicate());
    assert!(matches!(
        err,
        StorageError::DuplicateKey { table, .. } if table == EVENTS_FINGERPRINT_UNIQUE
    ));
    assert_eq!(s.event_row_list().len(), 1);
}

#[test]
fn at_event_store_db_02_duplicate_within_one_txn_is_rejected() {
    let mut s = MetasessionStore::new_in_memory();
    let c = candidate("t1", "s1", 8);
    let res = s.with_admission_txn(MonotonicTimeNs(10), |txn| {
        txn.insert_event(&c)?;
        txn.insert_event(&c)
    });

    assert!(res.unwrap_err().is_fingerprint_duplicate());
    assert!(s.event_row_list().is_empty());
}

#[test]
fn at_event_store_db_03_append_only_enforced() {
    let mut s = MetasessionStore::new_in_memory();
    let row_id = insert(&mut s, 10, &candidate("t1", "s1", 9)).unwrap();

    assert!(matches!(
        s.overwrite_event_row(row_id),
        Err(StorageError::AppendOnlyViolation { table: "events" })
    ));
    assert!(matches!(
        s.overwrite_event_row(row_id + 100),
        Err(StorageError::NotFound { table: "events", .. })
    ));
}

#[test]
fn at_event_store_db_04_rows_carry_candidate_fields_and_commit_time() {
    let mut s = MetasessionStore::new_in_memory();
    let c = candidate("t1", "s1", 10);
    insert(&mut s, 42, &c).unwrap();

    let row = s.get_event_row_by_fingerprint(&c.fingerprint).unwrap();
    assert_eq!(row.tenant_id, c.tenant_id);
    assert_eq!(row.session_id, c.session_id);
    assert_eq!(row.event_type, c.event_type);
    assert_eq!(row.event_timestamp, c.event_timestamp);
    assert_eq!(row.created_at, MonotonicTimeNs(42));
    assert_eq!(row.updated_at, MonotonicTimeNs(42));
}

#[test]
fn at_event_store_db_05_tenant_index_isolates_rows() {
    let mut s = MetasessionStore::new_in_memory();
    insert(&mut s, 10, &candidate("tenant_a", "s1", 1)).unwrap();
    insert(&mut s, 11, &candidate("tenant_b", "s1", 2)).unwrap();
    insert(&mut s, 12, &candidate("tenant_a", "s2", 3)).unwrap();

    let a = s.event_row_list_by_tenant(&TenantId::new("tenant_a").unwrap());
    assert_eq!(a.len(), 2);
    assert!(a.iter().all(|e| e.tenant_id.as_str() == "tenant_a"));
    assert!(s
        .event_row_list_by_tenant(&TenantId::new("tenant_c").unwrap())
        .is_empty());
}

#[test]
fn at_event_store_db_06_row_ids_are_monotonic() {
    let mut s = MetasessionStore::new_in_memory();
    let ids: Vec<u64> = (1..=3)
        .map(|i| insert(&mut s, 10 + i, &candidate("t1", "s1", i)).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}
