#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use metasession_contracts::MonotonicTimeNs;
use metasession_engines::payload_codec::{encode_payload, EncodeRequest};
use metasession_os::admission::{AdmissionError, AdmissionPipeline, SubmitError};
use metasession_os::admission_worker::{
    AdmissionQueueMetrics, AdmissionWorkerConfig, AdmissionWorkerPassMetrics, StoreRowCounts,
    ADMISSION_MAX_ATTEMPTS_DEFAULT, ADMISSION_RETRY_AFTER_MS_DEFAULT,
    ADMISSION_WORKER_LEASE_MS_DEFAULT, ADMISSION_WORKER_MAX_ITEMS_DEFAULT,
};
use metasession_storage::store::{MetasessionStore, StorageError};
use serde_json::Value;
use tracing::{debug, error};

pub const PAYLOAD_FIELD: &str = "payload";
pub const ERROR_PAYLOAD_MISSING: &str = "Payload missing";
pub const ERROR_INVALID_PAYLOAD: &str = "Invalid payload";
pub const ERROR_INTERNAL: &str = "Internal error";
pub const ERROR_ENCODE_INVALID: &str = "Payload missing or invalid";

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_WORKER_COUNT: u16 = 4;
const DEFAULT_WORKER_INTERVAL_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid config {key}={value}")]
    InvalidConfig { key: &'static str, value: String },
    #[error("worker counters lock poisoned")]
    CountersLockPoisoned,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Admission(#[from] AdmissionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub store_path: PathBuf,
    pub persistence_enabled: bool,
    pub worker_count: u16,
    pub worker_interval_ms: u64,
    pub worker: AdmissionWorkerConfig,
    pub log_json: bool,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Out-of-range or unparsable numbers fall back to their defaults. Only an
    /// unparsable bind address is an error.
    pub fn from_env_var_map<F>(get: F) -> Result<Self, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_raw = get("METASESSION_HTTP_BIND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|_| AdapterError::InvalidConfig {
                key: "METASESSION_HTTP_BIND",
                value: bind_raw.clone(),
            })?;
        let store_path = get("METASESSION_STORE_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_store_path(get("HOME")));

        Ok(Self {
            bind,
            store_path,
            persistence_enabled: parse_flag(get("METASESSION_PERSISTENCE_ENABLED"), true),
            worker_count: parse_in_range(
                get("METASESSION_ADMISSION_WORKERS"),
                1..=64,
                DEFAULT_WORKER_COUNT,
            ),
            worker_interval_ms: parse_in_range(
                get("METASESSION_ADMISSION_WORKER_INTERVAL_MS"),
                10..=60_000,
                DEFAULT_WORKER_INTERVAL_MS,
            ),
            worker: AdmissionWorkerConfig {
                max_items: parse_in_range(
                    get("METASESSION_ADMISSION_BATCH_SIZE"),
                    1..=1024,
                    ADMISSION_WORKER_MAX_ITEMS_DEFAULT,
                ),
                lease_ms: parse_in_range(
                    get("METASESSION_ADMISSION_LEASE_MS"),
                    1_000..=600_000,
                    ADMISSION_WORKER_LEASE_MS_DEFAULT,
                ),
                retry_after_ms: parse_in_range(
                    get("METASESSION_ADMISSION_RETRY_AFTER_MS"),
                    100..=300_000,
                    ADMISSION_RETRY_AFTER_MS_DEFAULT,
                ),
                max_attempts: parse_in_range(
                    get("METASESSION_ADMISSION_MAX_ATTEMPTS"),
                    1..=100,
                    ADMISSION_MAX_ATTEMPTS_DEFAULT,
                ),
            },
            log_json: get("METASESSION_LOG_FORMAT")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("json")),
        })
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw {
        Some(v) => !matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "0" | "false" | "off" | "no"
        ),
        None => default,
    }
}

fn parse_in_range<T>(raw: Option<String>, range: std::ops::RangeInclusive<T>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .filter(|v| range.contains(v))
        .unwrap_or(default)
}

fn default_store_path(home: Option<String>) -> PathBuf {
    if let Some(home) = home {
        let home = home.trim();
        if !home.is_empty() {
            return PathBuf::from(home).join(".metasession/store.jsonl");
        }
    }
    PathBuf::from(".metasession/store.jsonl")
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
pub struct AdapterWorkerCounters {
    pub pass_count: u64,
    pub dequeued_total: u64,
    pub accepted_total: u64,
    pub duplicate_total: u64,
    pub retry_scheduled_total: u64,
    pub dead_lettered_total: u64,
    pub settle_failed_total: u64,
    pub last_pass_at_ns: Option<u64>,
}

impl AdapterWorkerCounters {
    fn record_pass(&mut self, at: MonotonicTimeNs, metrics: &AdmissionWorkerPassMetrics) {
        self.pass_count = self.pass_count.saturating_add(1);
        self.dequeued_total = self
            .dequeued_total
            .saturating_add(u64::from(metrics.dequeued_count));
        self.accepted_total = self
            .accepted_total
            .saturating_add(u64::from(metrics.accepted_count));
        self.duplicate_total = self
            .duplicate_total
            .saturating_add(u64::from(metrics.duplicate_count));
        self.retry_scheduled_total = self
            .retry_scheduled_total
            .saturating_add(u64::from(metrics.retry_scheduled_count));
        self.dead_lettered_total = self
            .dead_lettered_total
            .saturating_add(u64::from(metrics.dead_lettered_count));
        self.settle_failed_total = self
            .settle_failed_total
            .saturating_add(u64::from(metrics.settle_failed_count));
        self.last_pass_at_ns = Some(at.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub rows: StoreRowCounts,
    pub queue: AdmissionQueueMetrics,
    pub worker: AdapterWorkerCounters,
}

impl AdapterHealthResponse {
    fn unhealthy(reason: String) -> Self {
        Self {
            status: "error".to_string(),
            outcome: "UNHEALTHY".to_string(),
            reason: Some(reason),
            rows: StoreRowCounts::default(),
            queue: AdmissionQueueMetrics::default(),
            worker: AdapterWorkerCounters::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubmitEventResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitEventResponse {
    fn accepted() -> Self {
        Self {
            status: Some("accepted".to_string()),
            error: None,
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            status: None,
            error: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncodeEventResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperRejection {
    PayloadMissing,
    InvalidPayload,
}

impl WrapperRejection {
    pub fn message(self) -> &'static str {
        match self {
            WrapperRejection::PayloadMissing => ERROR_PAYLOAD_MISSING,
            WrapperRejection::InvalidPayload => ERROR_INVALID_PAYLOAD,
        }
    }
}

/// Pulls the `payload` string out of a `{"payload": "..."}` body.
/// A body that is not a JSON object, or lacks the field, counts as missing.
pub fn extract_wrapped_payload(body: &[u8]) -> Result<String, WrapperRejection> {
    let value: Value =
        serde_json::from_slice(body).map_err(|_| WrapperRejection::PayloadMissing)?;
    let object = value.as_object().ok_or(WrapperRejection::PayloadMissing)?;
    match object.get(PAYLOAD_FIELD) {
        None | Some(Value::Null) => Err(WrapperRejection::PayloadMissing),
        Some(Value::String(raw)) => Ok(raw.clone()),
        Some(_) => Err(WrapperRejection::InvalidPayload),
    }
}

#[derive(Debug, Clone)]
pub struct AdapterRuntime {
    pipeline: AdmissionPipeline,
    worker_config: AdmissionWorkerConfig,
    worker_counters: Arc<Mutex<AdapterWorkerCounters>>,
}

impl Default for AdapterRuntime {
    fn default() -> Self {
        Self::new(
            MetasessionStore::new_in_memory(),
            AdmissionWorkerConfig::default(),
        )
    }
}

impl AdapterRuntime {
    pub fn new(store: MetasessionStore, worker_config: AdmissionWorkerConfig) -> Self {
        Self {
            pipeline: AdmissionPipeline::new(store),
            worker_config,
            worker_counters: Arc::new(Mutex::new(AdapterWorkerCounters::default())),
        }
    }

    pub fn from_config(config: &AdapterConfig) -> Result<Self, AdapterError> {
        let store = if config.persistence_enabled {
            MetasessionStore::open_with_journal(&config.store_path)?
        } else {
            MetasessionStore::new_in_memory()
        };
        Ok(Self::new(store, config.worker))
    }

    pub fn pipeline(&self) -> &AdmissionPipeline {
        &self.pipeline
    }

    pub fn submit_payload(&self, raw: &str) -> Result<String, SubmitError> {
        self.pipeline.submit_payload(raw, None)
    }

    pub fn run_admission_worker_pass(
        &self,
        worker_id: &str,
        now: Option<MonotonicTimeNs>,
    ) -> Result<AdmissionWorkerPassMetrics, AdapterError> {
        let metrics = self
            .pipeline
            .run_admission_worker_pass(worker_id, &self.worker_config, now)?;
        let at = now.unwrap_or_else(MonotonicTimeNs::from_system_clock);
        self.worker_counters
            .lock()
            .map_err(|_| AdapterError::CountersLockPoisoned)?
            .record_pass(at, &metrics);
        Ok(metrics)
    }

    pub fn health_report(
        &self,
        now: Option<MonotonicTimeNs>,
    ) -> Result<AdapterHealthResponse, AdapterError> {
        let rows = self.pipeline.row_counts()?;
        let queue = self.pipeline.queue_metrics(now)?;
        let worker = self
            .worker_counters
            .lock()
            .map_err(|_| AdapterError::CountersLockPoisoned)?
            .clone();
        Ok(AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            rows,
            queue,
            worker,
        })
    }
}

pub fn router(runtime: AdapterRuntime) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/events", post(submit_event))
        .route("/api/events/encode", post(encode_event))
        .with_state(runtime)
}

async fn healthz(
    State(runtime): State<AdapterRuntime>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    match runtime.health_report(None) {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse::unhealthy(err.to_string())),
        ),
    }
}

async fn submit_event(
    State(runtime): State<AdapterRuntime>,
    body: Bytes,
) -> (StatusCode, Json<SubmitEventResponse>) {
    let raw = match extract_wrapped_payload(&body) {
        Ok(raw) => raw,
        Err(rejection) => {
            debug!(reason = rejection.message(), "event submission rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(SubmitEventResponse::rejected(rejection.message())),
            );
        }
    };
    // Enqueue takes the store mutex and fsyncs the journal.
    let submitted = tokio::task::spawn_blocking(move || runtime.submit_payload(&raw)).await;
    match submitted {
        Ok(Ok(_)) => (StatusCode::OK, Json(SubmitEventResponse::accepted())),
        Ok(Err(SubmitError::Decode(err))) => {
            debug!(error = %err, "event submission rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(SubmitEventResponse::rejected(ERROR_INVALID_PAYLOAD)),
            )
        }
        Ok(Err(SubmitError::Admission(err))) => {
            error!(error = %err, "event enqueue failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitEventResponse::rejected(ERROR_INTERNAL)),
            )
        }
        Err(err) => {
            error!(error = %err, "event enqueue task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitEventResponse::rejected(ERROR_INTERNAL)),
            )
        }
    }
}

async fn encode_event(body: Bytes) -> (StatusCode, Json<EncodeEventResponse>) {
    let request = serde_json::from_slice::<Value>(&body)
        .ok()
        .filter(Value::is_object)
        .and_then(|v| serde_json::from_value::<EncodeRequest>(v).ok())
        .unwrap_or_default();
    match encode_payload(&request) {
        Ok(payload) => (
            StatusCode::OK,
            Json(EncodeEventResponse {
                payload: Some(payload),
                error: None,
                details: None,
            }),
        ),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(EncodeEventResponse {
                payload: None,
                error: Some(ERROR_ENCODE_INVALID.to_string()),
                details: Some(err.details),
            }),
        ),
    }
}
