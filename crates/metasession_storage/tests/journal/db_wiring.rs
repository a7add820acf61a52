#![forbid(unsafe_code)]

use std::fs;

use chrono::NaiveDateTime;
use metasession_contracts::event::{
    EventCandidate, EventFingerprint, EventType, SessionId, TenantId,
};
use metasession_contracts::MonotonicTimeNs;
use metasession_storage::repo::{
    AdmissionQueueRepo, AdmissionTxnRepo, EventStoreRepo, SessionStoreRepo,
};
use metasession_storage::store::{AdmissionJobState, MetasessionStore, StorageError};

fn candidate(session_id: &str, seq: u64) -> EventCandidate {
    EventCandidate::v1(
        TenantId::new("t1").unwrap(),
        SessionId::new(session_id).unwrap(),
        EventType::new("click").unwrap(),
        NaiveDateTime::parse_from_str("2026-01-13 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        EventFingerprint::new(format!("{seq:040x}")).unwrap(),
    )
    .unwrap()
}

fn admit(s: &mut MetasessionStore, now: u64, c: &EventCandidate) {
    s.with_admission_txn(MonotonicTimeNs(now), |txn| {
        txn.upsert_session_seen(&c.tenant_id, &c.session_id)?;
        txn.insert_event(c)
    })
    .unwrap();
}

#[test]
fn at_journal_db_01_replay_rebuilds_sessions_and_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/store.jsonl");
    {
        let mut s = MetasessionStore::open_with_journal(&path).unwrap();
        assert!(s.is_persistent());
        admit(&mut s, 100, &candidate("s1", 1));
        admit(&mut s, 200, &candidate("s1", 2));
        admit(&mut s, 300, &candidate("s2", 3));
    }

    let mut s = MetasessionStore::open_with_journal(&path).unwrap();
    assert_eq!(s.event_row_list().len(), 3);
    assert_eq!(s.count_session_rows(), 2);
    let row = s
        .get_session_row(&TenantId::new("t1").unwrap(), &SessionId::new("s1").unwrap())
        .unwrap();
    assert_eq!(row.first_seen_at, MonotonicTimeNs(100));
    assert_eq!(row.last_seen_at, MonotonicTimeNs(200));

    // Row ids continue after the replayed rows and uniqueness survives the restart.
    let next = s
        .with_admission_txn(MonotonicTimeNs(400), |txn| txn.insert_event(&candidate("s3", 4)))
        .unwrap();
    assert_eq!(next, 4);
    let dup = s.with_admission_txn(MonotonicTimeNs(500), |txn| {
        txn.insert_event(&candidate("s1", 1))
    });
    assert!(dup.unwrap_err().is_fingerprint_duplicate());
}

#[test]
fn at_journal_db_02_unsettled_jobs_are_requeued_on_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    let (acked, pending) = {
        let mut s = MetasessionStore::open_with_journal(&path).unwrap();
        let acked = s
            .enqueue_admission_job_row(MonotonicTimeNs(10), candidate("s1", 1))
            .unwrap();
        let pending = s
            .enqueue_admission_job_row(MonotonicTimeNs(11), candidate("s1", 2))
            .unwrap();
        s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 30_000, "worker_a")
            .unwrap();
        s.ack_admission_job_row(MonotonicTimeNs(21), &acked, Some("worker_a"))
            .unwrap();
        (acked, pending)
    };

    let mut s = MetasessionStore::open_with_journal(&path).unwrap();
    assert!(s.admission_job_row(&acked).is_none());
    assert_eq!(s.acked_admission_job_count(), 1);
    assert_eq!(
        s.admission_job_row(&pending).unwrap().state,
        AdmissionJobState::Queued
    );
    assert_eq!(s.admission_job_row_list().len(), 1);

    let fresh = s
        .enqueue_admission_job_row(MonotonicTimeNs(30), candidate("s1", 3))
        .unwrap();
    assert!(fresh.as_str() > pending.as_str());
}

#[test]
fn at_journal_db_03_corrupt_line_fails_open_with_line_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    fs::write(&path, "\n{not json}\n").unwrap();

    match MetasessionStore::open_with_journal(&path) {
        Err(StorageError::Journal(msg)) => assert!(msg.contains("line 2")),
        other => panic!("expected journal error, got {other:?}"),
    }
}

#[test]
fn at_journal_db_04_retry_backoff_and_attempts_survive_replay() {
    const MS: u64 = 1_000_000;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    let job_id = {
        let mut s = MetasessionStore::open_with_journal(&path).unwrap();
        let job_id = s
            .enqueue_admission_job_row(MonotonicTimeNs(10), candidate("s1", 1))
            .unwrap();
        s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 30_000, "worker_a")
            .unwrap();
        s.retry_admission_job_row(
            MonotonicTimeNs(20),
            &job_id,
            Some("worker_a"),
            "write conflict".to_string(),
            5_000,
        )
        .unwrap();
        job_id
    };

    let mut s = MetasessionStore::open_with_journal(&path).unwrap();
    let row = s.admission_job_row(&job_id).unwrap();
    assert_eq!(row.state, AdmissionJobState::Queued);
    assert_eq!(row.attempt_count, 1);
    assert_eq!(row.available_at, MonotonicTimeNs(20 + 5_000 * MS));
    assert_eq!(row.last_error.as_deref(), Some("write conflict"));

    assert!(s
        .lease_admission_job_rows(MonotonicTimeNs(20 + 4_999 * MS), 8, 30_000, "worker_b")
        .unwrap()
        .is_empty());
    let again = s
        .lease_admission_job_rows(MonotonicTimeNs(20 + 5_000 * MS), 8, 30_000, "worker_b")
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].attempt_count, 2);
}

#[test]
fn at_journal_db_05_dead_letters_replay_outside_the_live_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.jsonl");
    let job_id = {
        let mut s = MetasessionStore::open_with_journal(&path).unwrap();
        let job_id = s
            .enqueue_admission_job_row(MonotonicTimeNs(10), candidate("s1", 1))
            .unwrap();
        s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 30_000, "worker_a")
            .unwrap();
        s.dead_letter_admission_job_row(
            MonotonicTimeNs(21),
            &job_id,
            Some("worker_a"),
            "bad candidate".to_string(),
        )
        .unwrap();
        job_id
    };

    let s = MetasessionStore::open_with_journal(&path).unwrap();
    assert!(s.admission_job_row_list().is_empty());
    let dead = s.dead_letter_admission_job_row_list();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job_id);
    assert_eq!(dead[0].last_error.as_deref(), Some("bad candidate"));
}
