#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use metasession_contracts::event::EventCandidate;
use metasession_contracts::MonotonicTimeNs;
use metasession_engines::payload_codec::{decode_payload, DecodeError};
use metasession_storage::repo::{AdmissionQueueRepo, AdmissionTxnRepo};
use metasession_storage::store::{MetasessionStore, SessionRecord, StorageError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Accepted {
        event_row_id: u64,
        session: SessionRecord,
    },
    /// The fingerprint was already admitted. Nothing was written.
    Duplicate,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("store lock poisoned")]
    StoreLockPoisoned,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid payload: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

/// Duplicate check, session upsert and event insert as one unit of work.
///
/// A fingerprint seen by the pre-check aborts before the session is touched, so a
/// replayed payload leaves `last_seen_at` where the first admission put it. A uniqueness
/// violation raised by the insert itself is also reported as `Duplicate`.
pub fn admit_event<R: AdmissionTxnRepo>(
    store: &mut R,
    now: MonotonicTimeNs,
    candidate: &EventCandidate,
) -> Result<AdmissionOutcome, StorageError> {
    let result = store.with_admission_txn(now, |txn| {
        if txn.event_by_fingerprint(&candidate.fingerprint).is_some() {
            return Ok(AdmissionOutcome::Duplicate);
        }
        let session = txn.upsert_session_seen(&candidate.tenant_id, &candidate.session_id)?;
        let event_row_id = txn.insert_event(candidate)?;
        Ok(AdmissionOutcome::Accepted {
            event_row_id,
            session,
        })
    });
    match result {
        Err(err) if err.is_fingerprint_duplicate() => Ok(AdmissionOutcome::Duplicate),
        other => other,
    }
}

/// Shared entry point over one store. Every write is serialized through the store mutex.
#[derive(Debug, Clone)]
pub struct AdmissionPipeline {
    store: Arc<Mutex<MetasessionStore>>,
}

impl AdmissionPipeline {
    pub fn new(store: MetasessionStore) -> Self {
        Self::from_shared(Arc::new(Mutex::new(store)))
    }

    pub fn from_shared(store: Arc<Mutex<MetasessionStore>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Mutex<MetasessionStore>> {
        &self.store
    }

    pub(crate) fn lock_store(&self) -> Result<MutexGuard<'_, MetasessionStore>, AdmissionError> {
        self.store
            .lock()
            .map_err(|_| AdmissionError::StoreLockPoisoned)
    }

    /// Admits one candidate. When `now` is `None` the clock is read after the store lock
    /// is held, so the last committer always carries the latest `last_seen_at`.
    pub fn admit(
        &self,
        candidate: &EventCandidate,
        now: Option<MonotonicTimeNs>,
    ) -> Result<AdmissionOutcome, AdmissionError> {
        let mut store = self.lock_store()?;
        let now = now.unwrap_or_else(MonotonicTimeNs::from_system_clock);
        let outcome = admit_event(&mut *store, now, candidate)?;
        drop(store);
        match &outcome {
            AdmissionOutcome::Accepted {
                event_row_id,
                session,
            } => info!(
                tenant_id = %candidate.tenant_id,
                session_id = %candidate.session_id,
                fingerprint = %candidate.fingerprint,
                event_row_id,
                first_seen_at = session.first_seen_at.0,
                last_seen_at = session.last_seen_at.0,
                "event admitted"
            ),
            AdmissionOutcome::Duplicate => debug!(
                tenant_id = %candidate.tenant_id,
                session_id = %candidate.session_id,
                fingerprint = %candidate.fingerprint,
                "duplicate event discarded"
            ),
        }
        Ok(outcome)
    }

    pub fn enqueue(
        &self,
        candidate: EventCandidate,
        now: Option<MonotonicTimeNs>,
    ) -> Result<String, AdmissionError> {
        let mut store = self.lock_store()?;
        let now = now.unwrap_or_else(MonotonicTimeNs::from_system_clock);
        let fingerprint = candidate.fingerprint.clone();
        let job_id = store.enqueue_admission_job_row(now, candidate)?;
        debug!(job_id = %job_id, fingerprint = %fingerprint, "admission job enqueued");
        Ok(job_id)
    }

    /// Decodes a raw transport payload and queues it for admission.
    pub fn submit_payload(
        &self,
        raw: &str,
        now: Option<MonotonicTimeNs>,
    ) -> Result<String, SubmitError> {
        let candidate = decode_payload(raw)?;
        Ok(self.enqueue(candidate, now)?)
    }
}
