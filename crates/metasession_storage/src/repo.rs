#![forbid(unsafe_code)]

use metasession_contracts::event::{EventCandidate, EventFingerprint, SessionId, TenantId};
use metasession_contracts::MonotonicTimeNs;

use crate::store::{
    AdmissionJobRecord, EventRecord, MetasessionStore, SessionRecord, StorageError, StoreTxn,
};

/// Typed repository interface for the sessions table.
pub trait SessionStoreRepo {
    fn get_session_row(&self, tenant_id: &TenantId, session_id: &SessionId)
        -> Option<&SessionRecord>;
    fn count_session_rows(&self) -> usize;
}

/// Typed repository interface for the append-only events table.
pub trait EventStoreRepo {
    fn get_event_row_by_fingerprint(&self, fingerprint: &EventFingerprint)
        -> Option<&EventRecord>;
    fn event_row_list(&self) -> &[EventRecord];
    fn event_row_list_by_tenant(&self, tenant_id: &TenantId) -> Vec<&EventRecord>;
    fn overwrite_event_row(&mut self, row_id: u64) -> Result<(), StorageError>;
}

/// Atomic unit of work spanning the sessions and events tables.
pub trait AdmissionTxnRepo: SessionStoreRepo + EventStoreRepo {
    fn with_admission_txn<T, F>(&mut self, now: MonotonicTimeNs, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, StorageError>;
}

/// Typed repository interface for the durable admission work queue.
pub trait AdmissionQueueRepo {
    fn enqueue_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        candidate: EventCandidate,
    ) -> Result<String, StorageError>;
    fn lease_admission_job_rows(
        &mut self,
        now: MonotonicTimeNs,
        max_items: u16,
        lease_ms: u32,
        worker_id: &str,
    ) -> Result<Vec<AdmissionJobRecord>, StorageError>;
    fn ack_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
    ) -> Result<(), StorageError>;
    fn retry_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        error: String,
        retry_after_ms: u32,
    ) -> Result<(), StorageError>;
    fn dead_letter_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        error: String,
    ) -> Result<(), StorageError>;
    fn admission_job_row_list(&self) -> Vec<&AdmissionJobRecord>;
    fn dead_letter_admission_job_row_list(&self) -> Vec<&AdmissionJobRecord>;
    fn acked_admission_job_count(&self) -> u64;
    fn due_admission_job_row_count(&self, now: MonotonicTimeNs) -> usize;
}

impl SessionStoreRepo for MetasessionStore {
    fn get_session_row(
        &self,
        tenant_id: &TenantId,
        session_id: &SessionId,
    ) -> Option<&SessionRecord> {
        self.session_row(tenant_id, session_id)
    }

    fn count_session_rows(&self) -> usize {
        self.session_row_count()
    }
}

impl EventStoreRepo for MetasessionStore {
    fn get_event_row_by_fingerprint(
        &self,
        fingerprint: &EventFingerprint,
    ) -> Option<&EventRecord> {
        self.event_row_by_fingerprint(fingerprint)
    }

    fn event_row_list(&self) -> &[EventRecord] {
        self.event_rows()
    }

    fn event_row_list_by_tenant(&self, tenant_id: &TenantId) -> Vec<&EventRecord> {
        self.event_rows_by_tenant(tenant_id)
    }

    fn overwrite_event_row(&mut self, row_id: u64) -> Result<(), StorageError> {
        self.attempt_overwrite_event_row(row_id)
    }
}

impl AdmissionTxnRepo for MetasessionStore {
    fn with_admission_txn<T, F>(&mut self, now: MonotonicTimeNs, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, StorageError>,
    {
        self.transaction(now, f)
    }
}

impl AdmissionQueueRepo for MetasessionStore {
    fn enqueue_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        candidate: EventCandidate,
    ) -> Result<String, StorageError> {
        self.admission_job_enqueue(now, candidate)
    }

    fn lease_admission_job_rows(
        &mut self,
        now: MonotonicTimeNs,
        max_items: u16,
        lease_ms: u32,
        worker_id: &str,
    ) -> Result<Vec<AdmissionJobRecord>, StorageError> {
        self.admission_job_dequeue_batch(now, max_items, lease_ms, worker_id)
    }

    fn ack_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
    ) -> Result<(), StorageError> {
        self.admission_job_ack_commit(now, job_id, worker_id)
    }

    fn retry_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        error: String,
        retry_after_ms: u32,
    ) -> Result<(), StorageError> {
        self.admission_job_fail_commit(now, job_id, worker_id, error, retry_after_ms)
    }

    fn dead_letter_admission_job_row(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        error: String,
    ) -> Result<(), StorageError> {
        self.admission_job_dead_letter_commit(now, job_id, worker_id, error)
    }

    fn admission_job_row_list(&self) -> Vec<&AdmissionJobRecord> {
        self.admission_job_rows().collect()
    }

    fn dead_letter_admission_job_row_list(&self) -> Vec<&AdmissionJobRecord> {
        self.admission_job_dead_letter_rows().collect()
    }

    fn acked_admission_job_count(&self) -> u64 {
        self.admission_job_acked_count()
    }

    fn due_admission_job_row_count(&self, now: MonotonicTimeNs) -> usize {
        self.admission_job_due_rows(now).len()
    }
}
