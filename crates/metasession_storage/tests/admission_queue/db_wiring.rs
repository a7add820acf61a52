#![forbid(unsafe_code)]

use chrono::NaiveDateTime;
use metasession_contracts::event::{
    EventCandidate, EventFingerprint, EventType, SessionId, TenantId,
};
use metasession_contracts::MonotonicTimeNs;
use metasession_storage::repo::AdmissionQueueRepo;
use metasession_storage::store::{AdmissionJobState, MetasessionStore, StorageError};

fn candidate(seq: u64) -> EventCandidate {
    EventCandidate::v1(
        TenantId::new("t1").unwrap(),
        SessionId::new("s1").unwrap(),
        EventType::new("click").unwrap(),
        NaiveDateTime::parse_from_str("2026-01-13 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap(),
        EventFingerprint::new(format!("{seq:040x}")).unwrap(),
    )
    .unwrap()
}

const MS: u64 = 1_000_000;

#[test]
fn at_admission_queue_db_01_dequeue_leases_in_enqueue_order() {
    let mut s = MetasessionStore::new_in_memory();
    let j1 = s.enqueue_admission_job_row(MonotonicTimeNs(10), candidate(1)).unwrap();
    let j2 = s.enqueue_admission_job_row(MonotonicTimeNs(11), candidate(2)).unwrap();
    let _j3 = s.enqueue_admission_job_row(MonotonicTimeNs(12), candidate(3)).unwrap();

    let batch = s
        .lease_admission_job_rows(MonotonicTimeNs(20), 2, 1_000, "worker_a")
        .unwrap();

    assert_eq!(
        batch.iter().map(|j| j.job_id.clone()).collect::<Vec<_>>(),
        vec![j1, j2]
    );
    assert!(batch.iter().all(|j| j.state == AdmissionJobState::InFlight
        && j.attempt_count == 1
        && j.lease_owner.as_deref() == Some("worker_a")));
    assert_eq!(s.due_admission_job_row_count(MonotonicTimeNs(20)), 1);
}

#[test]
fn at_admission_queue_db_02_ack_removes_row_and_rejects_foreign_worker() {
    let mut s = MetasessionStore::new_in_memory();
    let job_id = s.enqueue_admission_job_row(MonotonicTimeNs(10), candidate(1)).unwrap();
    s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 1_000, "worker_a")
        .unwrap();

    assert!(matches!(
        s.ack_admission_job_row(MonotonicTimeNs(21), &job_id, Some("worker_b")),
        Err(StorageError::Conflict { .. })
    ));
    s.ack_admission_job_row(MonotonicTimeNs(22), &job_id, Some("worker_a"))
        .unwrap();

    assert!(s.admission_job_row(&job_id).is_none());
    assert_eq!(s.acked_admission_job_count(), 1);
    assert!(matches!(
        s.ack_admission_job_row(MonotonicTimeNs(23), &job_id, None),
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        s.ack_admission_job_row(MonotonicTimeNs(23), "admjob_missing", None),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn at_admission_queue_db_03_retry_waits_for_backoff() {
    let mut s = MetasessionStore::new_in_memory();
    let job_id = s.enqueue_admission_job_row(MonotonicTimeNs(10), candidate(1)).unwrap();
    s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 1_000, "worker_a")
        .unwrap();
    s.retry_admission_job_row(
        MonotonicTimeNs(20),
        &job_id,
        Some("worker_a"),
        "write conflict".to_string(),
        5,
    )
    .unwrap();

    assert!(s
        .lease_admission_job_rows(MonotonicTimeNs(20 + 4 * MS), 8, 1_000, "worker_a")
        .unwrap()
        .is_empty());
    let again = s
        .lease_admission_job_rows(MonotonicTimeNs(20 + 5 * MS), 8, 1_000, "worker_b")
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].attempt_count, 2);
    assert_eq!(again[0].last_error.as_deref(), Some("write conflict"));
}

#[test]
fn at_admission_queue_db_04_expired_lease_is_redelivered() {
    let mut s = MetasessionStore::new_in_memory();
    s.enqueue_admission_job_row(MonotonicTimeNs(10), candidate(1)).unwrap();
    let first = s
        .lease_admission_job_rows(MonotonicTimeNs(20), 8, 1_000, "worker_a")
        .unwrap();
    assert_eq!(first.len(), 1);

    assert!(s
        .lease_admission_job_rows(MonotonicTimeNs(20 + 999 * MS), 8, 1_000, "worker_b")
        .unwrap()
        .is_empty());
    let redelivered = s
        .lease_admission_job_rows(MonotonicTimeNs(20 + 1_000 * MS), 8, 1_000, "worker_b")
        .unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].lease_owner.as_deref(), Some("worker_b"));
}

#[test]
fn at_admission_queue_db_05_dead_letter_is_terminal() {
    let mut s = MetasessionStore::new_in_memory();
    let job_id = s.enqueue_admission_job_row(MonotonicTimeNs(10), candidate(1)).unwrap();
    s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 1_000, "worker_a")
        .unwrap();
    s.dead_letter_admission_job_row(
        MonotonicTimeNs(21),
        &job_id,
        Some("worker_a"),
        "x".repeat(1_000),
    )
    .unwrap();

    assert!(s.admission_job_row_list().is_empty());
    let rows = s.dead_letter_admission_job_row_list();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].state, AdmissionJobState::DeadLetter);
    assert_eq!(rows[0].last_error.as_ref().map(|e| e.len()), Some(256));
    assert!(matches!(
        s.ack_admission_job_row(MonotonicTimeNs(22), &job_id, None),
        Err(StorageError::Conflict { .. })
    ));
    assert!(s
        .lease_admission_job_rows(MonotonicTimeNs(u64::MAX), 8, 1_000, "worker_a")
        .unwrap()
        .is_empty());
}

#[test]
fn at_admission_queue_db_06_blank_worker_id_rejected() {
    let mut s = MetasessionStore::new_in_memory();
    assert!(matches!(
        s.lease_admission_job_rows(MonotonicTimeNs(20), 8, 1_000, " "),
        Err(StorageError::ContractViolation(_))
    ));
}

#[test]
fn at_admission_queue_db_07_settled_jobs_leave_the_live_table() {
    let mut s = MetasessionStore::new_in_memory();
    for seq in 1..=50 {
        s.enqueue_admission_job_row(MonotonicTimeNs(10), candidate(seq))
            .unwrap();
    }
    let batch = s
        .lease_admission_job_rows(MonotonicTimeNs(20), 50, 1_000, "worker_a")
        .unwrap();
    for (i, job) in batch.iter().enumerate() {
        if i == 0 {
            s.dead_letter_admission_job_row(
                MonotonicTimeNs(21),
                &job.job_id,
                Some("worker_a"),
                "bad".to_string(),
            )
            .unwrap();
        } else {
            s.ack_admission_job_row(MonotonicTimeNs(21), &job.job_id, Some("worker_a"))
                .unwrap();
        }
    }

    assert!(s.admission_job_row_list().is_empty());
    assert_eq!(s.acked_admission_job_count(), 49);
    assert_eq!(s.dead_letter_admission_job_row_list().len(), 1);

    let live = s.enqueue_admission_job_row(MonotonicTimeNs(30), candidate(51)).unwrap();
    let rows = s.admission_job_row_list();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_id, live);
    assert_eq!(s.due_admission_job_row_count(MonotonicTimeNs(30)), 1);
}
