#![forbid(unsafe_code)]

use metasession_contracts::event::EventCandidate;
use metasession_contracts::MonotonicTimeNs;
use metasession_storage::repo::{AdmissionQueueRepo, EventStoreRepo, SessionStoreRepo};
use metasession_storage::store::{AdmissionJobState, MetasessionStore};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::admission::{AdmissionError, AdmissionOutcome, AdmissionPipeline};

pub const ADMISSION_WORKER_MAX_ITEMS_DEFAULT: u16 = 32;
pub const ADMISSION_WORKER_LEASE_MS_DEFAULT: u32 = 30_000;
pub const ADMISSION_RETRY_AFTER_MS_DEFAULT: u32 = 5_000;
pub const ADMISSION_MAX_ATTEMPTS_DEFAULT: u16 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionWorkerConfig {
    pub max_items: u16,
    pub lease_ms: u32,
    pub retry_after_ms: u32,
    pub max_attempts: u16,
}

impl Default for AdmissionWorkerConfig {
    fn default() -> Self {
        Self {
            max_items: ADMISSION_WORKER_MAX_ITEMS_DEFAULT,
            lease_ms: ADMISSION_WORKER_LEASE_MS_DEFAULT,
            retry_after_ms: ADMISSION_RETRY_AFTER_MS_DEFAULT,
            max_attempts: ADMISSION_MAX_ATTEMPTS_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdmissionQueueMetrics {
    pub queued_count: u32,
    pub in_flight_count: u32,
    pub acked_count: u32,
    pub dead_letter_count: u32,
    pub due_count: u32,
    pub retry_pending_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdmissionWorkerPassMetrics {
    pub dequeued_count: u16,
    pub accepted_count: u16,
    pub duplicate_count: u16,
    pub retry_scheduled_count: u16,
    pub dead_lettered_count: u16,
    pub settle_failed_count: u16,
    pub queue_after: AdmissionQueueMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreRowCounts {
    pub event_count: u64,
    pub session_count: u64,
}

impl AdmissionPipeline {
    /// Leases a batch of due jobs and admits each one. Accepted and duplicate outcomes
    /// ack the job; store failures schedule a retry until `max_attempts`, then dead-letter.
    pub fn run_admission_worker_pass(
        &self,
        worker_id: &str,
        config: &AdmissionWorkerConfig,
        now: Option<MonotonicTimeNs>,
    ) -> Result<AdmissionWorkerPassMetrics, AdmissionError> {
        self.run_admission_worker_pass_internal(worker_id, config, now, |candidate| {
            self.admit(candidate, now)
        })
    }

    fn run_admission_worker_pass_internal<F>(
        &self,
        worker_id: &str,
        config: &AdmissionWorkerConfig,
        now: Option<MonotonicTimeNs>,
        mut admit: F,
    ) -> Result<AdmissionWorkerPassMetrics, AdmissionError>
    where
        F: FnMut(&EventCandidate) -> Result<AdmissionOutcome, AdmissionError>,
    {
        let max_attempts = config.max_attempts.max(1);
        let lease_now = now.unwrap_or_else(MonotonicTimeNs::from_system_clock);
        let dequeued = self.lock_store()?.lease_admission_job_rows(
            lease_now,
            config.max_items.max(1),
            config.lease_ms,
            worker_id,
        )?;
        let mut metrics = AdmissionWorkerPassMetrics {
            dequeued_count: dequeued.len() as u16,
            ..AdmissionWorkerPassMetrics::default()
        };

        for job in dequeued {
            let result = admit(&job.candidate);
            let settle_now = now.unwrap_or_else(MonotonicTimeNs::from_system_clock);
            let mut store = self.lock_store()?;
            let (settled, counter) = match result {
                Ok(AdmissionOutcome::Accepted { .. }) => (
                    store.ack_admission_job_row(settle_now, &job.job_id, Some(worker_id)),
                    &mut metrics.accepted_count,
                ),
                Ok(AdmissionOutcome::Duplicate) => (
                    store.ack_admission_job_row(settle_now, &job.job_id, Some(worker_id)),
                    &mut metrics.duplicate_count,
                ),
                Err(err) if job.attempt_count >= max_attempts => {
                    error!(
                        job_id = %job.job_id,
                        fingerprint = %job.candidate.fingerprint,
                        attempts = job.attempt_count,
                        error = %err,
                        "admission job dead-lettered"
                    );
                    (
                        store.dead_letter_admission_job_row(
                            settle_now,
                            &job.job_id,
                            Some(worker_id),
                            err.to_string(),
                        ),
                        &mut metrics.dead_lettered_count,
                    )
                }
                Err(err) => {
                    warn!(
                        job_id = %job.job_id,
                        fingerprint = %job.candidate.fingerprint,
                        attempts = job.attempt_count,
                        retry_after_ms = config.retry_after_ms,
                        error = %err,
                        "admission job failed, retry scheduled"
                    );
                    (
                        store.retry_admission_job_row(
                            settle_now,
                            &job.job_id,
                            Some(worker_id),
                            err.to_string(),
                            config.retry_after_ms,
                        ),
                        &mut metrics.retry_scheduled_count,
                    )
                }
            };
            match settled {
                Ok(()) => *counter = counter.saturating_add(1),
                // Lease lost to another worker, or the journal write failed. The job stays
                // with whoever holds it now; the rest of the batch still settles.
                Err(err) => {
                    warn!(
                        job_id = %job.job_id,
                        worker_id,
                        error = %err,
                        "admission job settle failed"
                    );
                    metrics.settle_failed_count = metrics.settle_failed_count.saturating_add(1);
                }
            }
        }

        let store = self.lock_store()?;
        metrics.queue_after = snapshot_queue_metrics(&store, lease_now);
        Ok(metrics)
    }

    pub fn queue_metrics(
        &self,
        now: Option<MonotonicTimeNs>,
    ) -> Result<AdmissionQueueMetrics, AdmissionError> {
        let now = now.unwrap_or_else(MonotonicTimeNs::from_system_clock);
        let store = self.lock_store()?;
        Ok(snapshot_queue_metrics(&store, now))
    }

    pub fn row_counts(&self) -> Result<StoreRowCounts, AdmissionError> {
        let store = self.lock_store()?;
        Ok(StoreRowCounts {
            event_count: store.event_row_list().len() as u64,
            session_count: store.count_session_rows() as u64,
        })
    }
}

fn snapshot_queue_metrics(store: &MetasessionStore, now: MonotonicTimeNs) -> AdmissionQueueMetrics {
    let mut out = AdmissionQueueMetrics::default();
    for job in store.admission_job_row_list() {
        match job.state {
            AdmissionJobState::Queued => {
                out.queued_count = out.queued_count.saturating_add(1);
                if job.attempt_count > 0 {
                    out.retry_pending_count = out.retry_pending_count.saturating_add(1);
                }
            }
            AdmissionJobState::InFlight => {
                out.in_flight_count = out.in_flight_count.saturating_add(1)
            }
            // Settled jobs are not kept in the live table.
            AdmissionJobState::Acked | AdmissionJobState::DeadLetter => {}
        }
    }
    out.acked_count = u32::try_from(store.acked_admission_job_count()).unwrap_or(u32::MAX);
    out.dead_letter_count =
        u32::try_from(store.dead_letter_admission_job_row_list().len()).unwrap_or(u32::MAX);
    out.due_count = store.due_admission_job_row_count(now) as u32;
    out
}
