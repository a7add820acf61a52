#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use metasession_contracts::MonotonicTimeNs;
use serde::{Deserialize, Serialize};

use crate::store::{AdmissionJobRecord, AdmissionJobState, EventRecord, SessionRecord, StorageError};

const JOURNAL_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreJournalRecord {
    TransactionCommitted {
        sessions: Vec<SessionRecord>,
        events: Vec<EventRecord>,
    },
    AdmissionJobEnqueued {
        job: AdmissionJobRecord,
    },
    AdmissionJobRetryScheduled {
        job_id: String,
        attempt_count: u16,
        available_at: MonotonicTimeNs,
        last_error: Option<String>,
    },
    AdmissionJobSettled {
        job_id: String,
        state: AdmissionJobState,
        at: MonotonicTimeNs,
        last_error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreJournalEntry {
    schema_version: u8,
    record: StoreJournalRecord,
}

/// Append-only JSON-lines log of committed store writes.
#[derive(Debug, Clone)]
pub struct StoreJournal {
    path: PathBuf,
}

impl StoreJournal {
    /// Creates the journal file if missing and returns every record already in it.
    pub fn open(path: &Path) -> Result<(Self, Vec<StoreJournalRecord>), StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                StorageError::Journal(format!(
                    "failed to create store directory '{}': {}",
                    parent.display(),
                    err
                ))
            })?;
        }
        if !path.exists() {
            File::create(path).map_err(|err| {
                StorageError::Journal(format!(
                    "failed to create store journal '{}': {}",
                    path.display(),
                    err
                ))
            })?;
        }
        let journal = Self {
            path: path.to_path_buf(),
        };
        let records = journal.read_all()?;
        Ok((journal, records))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<StoreJournalRecord>, StorageError> {
        let file = File::open(&self.path).map_err(|err| {
            StorageError::Journal(format!(
                "failed to open store journal '{}': {}",
                self.path.display(),
                err
            ))
        })?;
        let mut out = Vec::new();
        for (line_no, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|err| {
                StorageError::Journal(format!(
                    "failed reading store journal '{}' at line {}: {}",
                    self.path.display(),
                    line_no + 1,
                    err
                ))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: StoreJournalEntry = serde_json::from_str(&line).map_err(|err| {
                StorageError::Journal(format!(
                    "failed parsing store journal '{}' at line {}: {}",
                    self.path.display(),
                    line_no + 1,
                    err
                ))
            })?;
            if entry.schema_version != JOURNAL_SCHEMA_VERSION {
                return Err(StorageError::Journal(format!(
                    "unsupported store journal schema_version={} at line {}",
                    entry.schema_version,
                    line_no + 1
                )));
            }
            out.push(entry.record);
        }
        Ok(out)
    }

    pub fn append(&self, record: &StoreJournalRecord) -> Result<(), StorageError> {
        let entry = StoreJournalEntry {
            schema_version: JOURNAL_SCHEMA_VERSION,
            record: record.clone(),
        };
        let json = serde_json::to_string(&entry).map_err(|err| {
            StorageError::Journal(format!("failed to encode store journal entry: {err}"))
        })?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|err| {
                StorageError::Journal(format!(
                    "failed opening store journal '{}' for append: {}",
                    self.path.display(),
                    err
                ))
            })?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_data())
            .map_err(|err| {
                StorageError::Journal(format!(
                    "failed writing store journal '{}': {}",
                    self.path.display(),
                    err
                ))
            })?;
        Ok(())
    }
}
