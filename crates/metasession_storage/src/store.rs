#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use metasession_contracts::event::{
    EventCandidate, EventFingerprint, EventType, SessionId, TenantId,
};
use metasession_contracts::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::journal::{StoreJournal, StoreJournalRecord};

pub const EVENTS_FINGERPRINT_UNIQUE: &str = "events.event_hash";
pub const SESSIONS_KEY_UNIQUE: &str = "metasessions.tenant_id_session_id";
pub const ADMISSION_QUEUE_TABLE: &str = "admission_queue";

const RECORD_SCHEMA_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("no row in {table} for {key}")]
    NotFound { table: &'static str, key: String },
    #[error("write conflict in {table} for {key}")]
    Conflict { table: &'static str, key: String },
    #[error("journal failure: {0}")]
    Journal(String),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl StorageError {
    pub fn is_fingerprint_duplicate(&self) -> bool {
        matches!(
            self,
            StorageError::DuplicateKey { table, .. } if *table == EVENTS_FINGERPRINT_UNIQUE
        )
    }
}

/// Rolling activity window for one (tenant, session) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub schema_version: SchemaVersion,
    pub row_id: u64,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub first_seen_at: MonotonicTimeNs,
    pub last_seen_at: MonotonicTimeNs,
    pub created_at: MonotonicTimeNs,
    pub updated_at: MonotonicTimeNs,
}

impl SessionRecord {
    pub fn v1(
        row_id: u64,
        tenant_id: TenantId,
        session_id: SessionId,
        first_seen_at: MonotonicTimeNs,
        last_seen_at: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            schema_version: RECORD_SCHEMA_VERSION,
            row_id,
            tenant_id,
            session_id,
            first_seen_at,
            last_seen_at,
            created_at: first_seen_at,
            updated_at: last_seen_at,
        };
        s.validate()?;
        Ok(s)
    }

    pub fn key(&self) -> (TenantId, SessionId) {
        (self.tenant_id.clone(), self.session_id.clone())
    }
}

impl Validate for SessionRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.tenant_id.validate()?;
        self.session_id.validate()?;
        if self.row_id == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "session_record.row_id",
                reason: "must be > 0",
            });
        }
        if self.first_seen_at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "session_record.first_seen_at",
                reason: "must be > 0",
            });
        }
        if self.last_seen_at.0 < self.first_seen_at.0 {
            return Err(ContractViolation::InvalidValue {
                field: "session_record.last_seen_at",
                reason: "must be >= first_seen_at",
            });
        }
        Ok(())
    }
}

/// One admitted event. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub schema_version: SchemaVersion,
    pub row_id: u64,
    pub tenant_id: TenantId,
    pub session_id: SessionId,
    pub event_type: EventType,
    pub fingerprint: EventFingerprint,
    pub event_timestamp: NaiveDateTime,
    pub created_at: MonotonicTimeNs,
    pub updated_at: MonotonicTimeNs,
}

impl EventRecord {
    pub fn from_candidate_v1(
        row_id: u64,
        candidate: &EventCandidate,
        created_at: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        candidate.validate()?;
        let e = Self {
            schema_version: RECORD_SCHEMA_VERSION,
            row_id,
            tenant_id: candidate.tenant_id.clone(),
            session_id: candidate.session_id.clone(),
            event_type: candidate.event_type.clone(),
            fingerprint: candidate.fingerprint.clone(),
            event_timestamp: candidate.event_timestamp,
            created_at,
            updated_at: created_at,
        };
        e.validate()?;
        Ok(e)
    }
}

impl Validate for EventRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.tenant_id.validate()?;
        self.session_id.validate()?;
        self.event_type.validate()?;
        self.fingerprint.validate()?;
        if self.row_id == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "event_record.row_id",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdmissionJobState {
    Queued,
    InFlight,
    Acked,
    DeadLetter,
}

/// A queued admission. Delivery is at-least-once: a job whose lease expires, or that
/// was never settled before a restart, is handed out again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionJobRecord {
    pub schema_version: SchemaVersion,
    pub job_id: String,
    pub candidate: EventCandidate,
    pub state: AdmissionJobState,
    pub attempt_count: u16,
    pub enqueued_at: MonotonicTimeNs,
    pub available_at: MonotonicTimeNs,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<MonotonicTimeNs>,
    pub last_error: Option<String>,
}

impl AdmissionJobRecord {
    fn queued_v1(job_id: String, candidate: EventCandidate, enqueued_at: MonotonicTimeNs) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            job_id,
            candidate,
            state: AdmissionJobState::Queued,
            attempt_count: 0,
            enqueued_at,
            available_at: enqueued_at,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
        }
    }

    fn is_due(&self, now: MonotonicTimeNs) -> bool {
        match self.state {
            AdmissionJobState::Queued => self.available_at <= now,
            AdmissionJobState::InFlight => self.lease_expires_at.is_some_and(|t| t <= now),
            AdmissionJobState::Acked | AdmissionJobState::DeadLetter => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StagedWrites {
    pub(crate) sessions: Vec<SessionRecord>,
    pub(crate) events: Vec<EventRecord>,
}

impl StagedWrites {
    fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.events.is_empty()
    }
}

/// Read view plus staged writes for one unit of work. Nothing reaches the store until the
/// closure passed to [`MetasessionStore::transaction`] returns `Ok`.
pub struct StoreTxn<'a> {
    store: &'a MetasessionStore,
    now: MonotonicTimeNs,
    next_session_row_id: u64,
    next_event_row_id: u64,
    staged_sessions: BTreeMap<(TenantId, SessionId), SessionRecord>,
    staged_events: Vec<EventRecord>,
}

impl<'a> StoreTxn<'a> {
    fn begin(store: &'a MetasessionStore, now: MonotonicTimeNs) -> Self {
        Self {
            store,
            now,
            next_session_row_id: store.next_session_row_id,
            next_event_row_id: store.next_event_row_id,
            staged_sessions: BTreeMap::new(),
            staged_events: Vec::new(),
        }
    }

    pub fn now(&self) -> MonotonicTimeNs {
        self.now
    }

    pub fn event_by_fingerprint(&self, fingerprint: &EventFingerprint) -> Option<&EventRecord> {
        self.staged_events
            .iter()
            .find(|e| &e.fingerprint == fingerprint)
            .or_else(|| self.store.event_row_by_fingerprint(fingerprint))
    }

    pub fn session(&self, tenant_id: &TenantId, session_id: &SessionId) -> Option<&SessionRecord> {
        let key = (tenant_id.clone(), session_id.clone());
        self.staged_sessions
            .get(&key)
            .or_else(|| self.store.sessions.get(&key))
    }

    /// Creates the session with `first_seen_at = last_seen_at = now`, or moves an existing
    /// session's `last_seen_at` forward to `now`. Neither bound ever moves backwards.
    pub fn upsert_session_seen(
        &mut self,
        tenant_id: &TenantId,
        session_id: &SessionId,
    ) -> Result<SessionRecord, StorageError> {
        let now = self.now;
        let record = match self.session(tenant_id, session_id) {
            Some(existing) => {
                let mut r = existing.clone();
                r.last_seen_at = now.max(r.last_seen_at);
                r.updated_at = r.last_seen_at;
                r
            }
            None => {
                let row_id = self.next_session_row_id;
                self.next_session_row_id = self.next_session_row_id.saturating_add(1);
                SessionRecord::v1(row_id, tenant_id.clone(), session_id.clone(), now, now)?
            }
        };
        record.validate()?;
        self.staged_sessions.insert(record.key(), record.clone());
        Ok(record)
    }

    /// Stages the event row. Fingerprint uniqueness is enforced here and again at commit.
    pub fn insert_event(&mut self, candidate: &EventCandidate) -> Result<u64, StorageError> {
        if self.event_by_fingerprint(&candidate.fingerprint).is_some() {
            return Err(StorageError::DuplicateKey {
                table: EVENTS_FINGERPRINT_UNIQUE,
                key: candidate.fingerprint.as_str().to_string(),
            });
        }
        let row_id = self.next_event_row_id;
        let rec = EventRecord::from_candidate_v1(row_id, candidate, self.now)?;
        self.next_event_row_id = self.next_event_row_id.saturating_add(1);
        self.staged_events.push(rec);
        Ok(row_id)
    }

    fn into_writes(self) -> StagedWrites {
        StagedWrites {
            sessions: self.staged_sessions.into_values().collect(),
            events: self.staged_events,
        }
    }
}

#[derive(Debug)]
pub struct MetasessionStore {
    sessions: BTreeMap<(TenantId, SessionId), SessionRecord>,
    next_session_row_id: u64,
    events: Vec<EventRecord>,
    next_event_row_id: u64,
    // events.event_hash UNIQUE: fingerprint -> index into `events`.
    event_fingerprint_index: BTreeMap<EventFingerprint, usize>,
    // events(tenant_id) index.
    events_by_tenant: BTreeMap<TenantId, Vec<usize>>,
    // Live jobs only: Queued or InFlight. Settled jobs leave this map.
    admission_queue: BTreeMap<String, AdmissionJobRecord>,
    admission_dead_letters: BTreeMap<String, AdmissionJobRecord>,
    admission_acked_count: u64,
    next_admission_job_seq: u64,
    journal: Option<StoreJournal>,
}

impl Default for MetasessionStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl MetasessionStore {
    pub fn new_in_memory() -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_session_row_id: 1,
            events: Vec::new(),
            next_event_row_id: 1,
            event_fingerprint_index: BTreeMap::new(),
            events_by_tenant: BTreeMap::new(),
            admission_queue: BTreeMap::new(),
            admission_dead_letters: BTreeMap::new(),
            admission_acked_count: 0,
            next_admission_job_seq: 1,
            journal: None,
        }
    }

    /// Opens (creating if needed) a journal-backed store and rebuilds every table from it.
    /// Jobs that were enqueued but never settled come back as `Queued`.
    pub fn open_with_journal(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let (journal, records) = StoreJournal::open(path.as_ref())?;
        let mut store = Self::new_in_memory();
        let replayed = records.len();
        for record in records {
            store.apply_journal_record(record)?;
        }
        store.journal = Some(journal);
        info!(
            path = %path.as_ref().display(),
            replayed,
            events = store.events.len(),
            sessions = store.sessions.len(),
            "store journal replayed"
        );
        Ok(store)
    }

    pub fn is_persistent(&self) -> bool {
        self.journal.is_some()
    }

    /// Runs `f` as one atomic unit of work. Staged writes are applied only when `f`
    /// returns `Ok` and the commit-time constraints still hold; otherwise nothing changes.
    pub fn transaction<T, F>(&mut self, now: MonotonicTimeNs, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, StorageError>,
    {
        let (value, writes) = {
            let mut txn = StoreTxn::begin(self, now);
            let value = f(&mut txn)?;
            (value, txn.into_writes())
        };
        self.commit(writes)?;
        Ok(value)
    }

    fn commit(&mut self, writes: StagedWrites) -> Result<(), StorageError> {
        if writes.is_empty() {
            return Ok(());
        }
        for e in &writes.events {
            if self.event_fingerprint_index.contains_key(&e.fingerprint) {
                return Err(StorageError::DuplicateKey {
                    table: EVENTS_FINGERPRINT_UNIQUE,
                    key: e.fingerprint.as_str().to_string(),
                });
            }
        }
        for s in &writes.sessions {
            s.validate()?;
            let is_new_row = s.row_id >= self.next_session_row_id;
            if is_new_row && self.sessions.contains_key(&s.key()) {
                return Err(StorageError::Conflict {
                    table: SESSIONS_KEY_UNIQUE,
                    key: format!("{}/{}", s.tenant_id, s.session_id),
                });
            }
        }
        // Write-ahead: a failed journal append leaves the tables untouched.
        if let Some(journal) = &self.journal {
            journal.append(&StoreJournalRecord::TransactionCommitted {
                sessions: writes.sessions.clone(),
                events: writes.events.clone(),
            })?;
        }
        self.apply_writes(writes);
        Ok(())
    }

    fn apply_writes(&mut self, writes: StagedWrites) {
        for s in writes.sessions {
            self.next_session_row_id = self.next_session_row_id.max(s.row_id.saturating_add(1));
            self.sessions.insert(s.key(), s);
        }
        for e in writes.events {
            self.next_event_row_id = self.next_event_row_id.max(e.row_id.saturating_add(1));
            let idx = self.events.len();
            self.event_fingerprint_index.insert(e.fingerprint.clone(), idx);
            self.events_by_tenant
                .entry(e.tenant_id.clone())
                .or_default()
                .push(idx);
            self.events.push(e);
        }
    }

    fn apply_journal_record(&mut self, record: StoreJournalRecord) -> Result<(), StorageError> {
        match record {
            StoreJournalRecord::TransactionCommitted { sessions, events } => {
                for s in &sessions {
                    s.validate()?;
                }
                let mut fresh = Vec::with_capacity(events.len());
                for e in events {
                    e.validate()?;
                    if self.event_fingerprint_index.contains_key(&e.fingerprint) {
                        debug!(fingerprint = %e.fingerprint, "journal replay skipped duplicate event");
                        continue;
                    }
                    fresh.push(e);
                }
                self.apply_writes(StagedWrites {
                    sessions,
                    events: fresh,
                });
            }
            StoreJournalRecord::AdmissionJobEnqueued { mut job } => {
                job.candidate.validate()?;
                job.state = AdmissionJobState::Queued;
                job.lease_owner = None;
                job.lease_expires_at = None;
                self.bump_job_seq(&job.job_id);
                self.admission_queue.insert(job.job_id.clone(), job);
            }
            StoreJournalRecord::AdmissionJobRetryScheduled {
                job_id,
                attempt_count,
                available_at,
                last_error,
            } => {
                if let Some(job) = self.admission_queue.get_mut(&job_id) {
                    job.attempt_count = job.attempt_count.max(attempt_count);
                    job.available_at = available_at;
                    job.last_error = last_error;
                }
            }
            StoreJournalRecord::AdmissionJobSettled {
                job_id,
                state,
                at,
                last_error,
            } => {
                self.apply_settlement(&job_id, state, at, last_error);
            }
        }
        Ok(())
    }

    fn apply_settlement(
        &mut self,
        job_id: &str,
        state: AdmissionJobState,
        at: MonotonicTimeNs,
        last_error: Option<String>,
    ) {
        let Some(mut job) = self.admission_queue.remove(job_id) else {
            return;
        };
        match state {
            AdmissionJobState::Acked => {
                self.admission_acked_count = self.admission_acked_count.saturating_add(1);
            }
            AdmissionJobState::DeadLetter => {
                job.state = state;
                job.available_at = at;
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.last_error = last_error;
                self.admission_dead_letters.insert(job.job_id.clone(), job);
            }
            AdmissionJobState::Queued | AdmissionJobState::InFlight => {
                self.admission_queue.insert(job.job_id.clone(), job);
            }
        }
    }

    fn bump_job_seq(&mut self, job_id: &str) {
        let seq = job_id
            .strip_prefix("admjob_")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok());
        if let Some(seq) = seq {
            self.next_admission_job_seq = self.next_admission_job_seq.max(seq.saturating_add(1));
        }
    }

    pub fn session_row(
        &self,
        tenant_id: &TenantId,
        session_id: &SessionId,
    ) -> Option<&SessionRecord> {
        self.sessions
            .get(&(tenant_id.clone(), session_id.clone()))
    }

    pub fn session_rows(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }

    pub fn session_row_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn event_row_by_fingerprint(&self, fingerprint: &EventFingerprint) -> Option<&EventRecord> {
        self.event_fingerprint_index
            .get(fingerprint)
            .and_then(|idx| self.events.get(*idx))
    }

    pub fn event_rows(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn event_rows_by_tenant(&self, tenant_id: &TenantId) -> Vec<&EventRecord> {
        self.events_by_tenant
            .get(tenant_id)
            .map(|idxs| idxs.iter().filter_map(|i| self.events.get(*i)).collect())
            .unwrap_or_default()
    }

    /// Events are append-only: an existing row is never rewritten.
    pub fn attempt_overwrite_event_row(&mut self, row_id: u64) -> Result<(), StorageError> {
        // Row ids are assigned in commit order, so `events` is sorted by row id.
        if self
            .events
            .binary_search_by_key(&row_id, |e| e.row_id)
            .is_err()
        {
            return Err(StorageError::NotFound {
                table: "events",
                key: row_id.to_string(),
            });
        }
        Err(StorageError::AppendOnlyViolation { table: "events" })
    }

    pub fn admission_job_enqueue(
        &mut self,
        now: MonotonicTimeNs,
        candidate: EventCandidate,
    ) -> Result<String, StorageError> {
        candidate.validate()?;
        let job_id = format!("admjob_{:016x}", self.next_admission_job_seq);
        let job = AdmissionJobRecord::queued_v1(job_id.clone(), candidate, now);
        if let Some(journal) = &self.journal {
            journal.append(&StoreJournalRecord::AdmissionJobEnqueued { job: job.clone() })?;
        }
        self.next_admission_job_seq = self.next_admission_job_seq.saturating_add(1);
        self.admission_queue.insert(job_id.clone(), job);
        Ok(job_id)
    }

    /// Leases up to `max_items` due jobs to `worker_id`, oldest first.
    pub fn admission_job_dequeue_batch(
        &mut self,
        now: MonotonicTimeNs,
        max_items: u16,
        lease_ms: u32,
        worker_id: &str,
    ) -> Result<Vec<AdmissionJobRecord>, StorageError> {
        if worker_id.trim().is_empty() {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "admission_queue.worker_id",
                    reason: "must not be empty",
                },
            ));
        }
        let due: Vec<String> = self
            .admission_queue
            .values()
            .filter(|job| job.is_due(now))
            .take(max_items as usize)
            .map(|job| job.job_id.clone())
            .collect();
        let lease_expires_at = now.saturating_add_ms(lease_ms);
        let mut out = Vec::with_capacity(due.len());
        for job_id in due {
            if let Some(job) = self.admission_queue.get_mut(&job_id) {
                job.state = AdmissionJobState::InFlight;
                job.attempt_count = job.attempt_count.saturating_add(1);
                job.lease_owner = Some(worker_id.to_string());
                job.lease_expires_at = Some(lease_expires_at);
                out.push(job.clone());
            }
        }
        Ok(out)
    }

    pub fn admission_job_ack_commit(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
    ) -> Result<(), StorageError> {
        self.settle_admission_job(now, job_id, worker_id, AdmissionJobState::Acked, None)
    }

    pub fn admission_job_dead_letter_commit(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        error: String,
    ) -> Result<(), StorageError> {
        self.settle_admission_job(
            now,
            job_id,
            worker_id,
            AdmissionJobState::DeadLetter,
            Some(bounded_error(error)),
        )
    }

    /// Returns an in-flight job to the queue, due again after `retry_after_ms`.
    pub fn admission_job_fail_commit(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        error: String,
        retry_after_ms: u32,
    ) -> Result<(), StorageError> {
        let attempt_count = self.in_flight_job_mut(job_id, worker_id)?.attempt_count;
        let available_at = now.saturating_add_ms(retry_after_ms);
        let last_error = Some(bounded_error(error));
        // Journaled so the attempt budget survives a restart.
        if let Some(journal) = &self.journal {
            journal.append(&StoreJournalRecord::AdmissionJobRetryScheduled {
                job_id: job_id.to_string(),
                attempt_count,
                available_at,
                last_error: last_error.clone(),
            })?;
        }
        let job = self.in_flight_job_mut(job_id, worker_id)?;
        job.state = AdmissionJobState::Queued;
        job.available_at = available_at;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.last_error = last_error;
        Ok(())
    }

    fn settle_admission_job(
        &mut self,
        now: MonotonicTimeNs,
        job_id: &str,
        worker_id: Option<&str>,
        state: AdmissionJobState,
        last_error: Option<String>,
    ) -> Result<(), StorageError> {
        self.in_flight_job_mut(job_id, worker_id)?;
        if let Some(journal) = &self.journal {
            journal.append(&StoreJournalRecord::AdmissionJobSettled {
                job_id: job_id.to_string(),
                state,
                at: now,
                last_error: last_error.clone(),
            })?;
        }
        self.apply_settlement(job_id, state, now, last_error);
        Ok(())
    }

    fn in_flight_job_mut(
        &mut self,
        job_id: &str,
        worker_id: Option<&str>,
    ) -> Result<&mut AdmissionJobRecord, StorageError> {
        if self.admission_dead_letters.contains_key(job_id) {
            return Err(StorageError::Conflict {
                table: ADMISSION_QUEUE_TABLE,
                key: job_id.to_string(),
            });
        }
        // Acked jobs are dropped from the table, so a second ack reads as NotFound.
        let job = self
            .admission_queue
            .get_mut(job_id)
            .ok_or_else(|| StorageError::NotFound {
                table: ADMISSION_QUEUE_TABLE,
                key: job_id.to_string(),
            })?;
        let owner_matches = match worker_id {
            Some(w) => job.lease_owner.as_deref() == Some(w),
            None => true,
        };
        if job.state != AdmissionJobState::InFlight || !owner_matches {
            return Err(StorageError::Conflict {
                table: ADMISSION_QUEUE_TABLE,
                key: job_id.to_string(),
            });
        }
        Ok(job)
    }

    /// Looks up a live or dead-lettered job. Acked jobs are not retained.
    pub fn admission_job_row(&self, job_id: &str) -> Option<&AdmissionJobRecord> {
        self.admission_queue
            .get(job_id)
            .or_else(|| self.admission_dead_letters.get(job_id))
    }

    /// Queued and in-flight jobs.
    pub fn admission_job_rows(&self) -> impl Iterator<Item = &AdmissionJobRecord> {
        self.admission_queue.values()
    }

    pub fn admission_job_dead_letter_rows(&self) -> impl Iterator<Item = &AdmissionJobRecord> {
        self.admission_dead_letters.values()
    }

    pub fn admission_job_acked_count(&self) -> u64 {
        self.admission_acked_count
    }

    pub fn admission_job_due_rows(&self, now: MonotonicTimeNs) -> Vec<&AdmissionJobRecord> {
        self.admission_queue
            .values()
            .filter(|job| job.is_due(now))
            .collect()
    }
}

fn bounded_error(msg: String) -> String {
    if msg.len() > 256 {
        msg.chars().take(256).collect::<String>()
    } else {
        msg
    }
}
