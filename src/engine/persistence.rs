use crate::engine::job::{Job, JobState};
use crate::shared::{append_line, now_millis};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("journal json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    ts: i64,
    job_id: String,
    state: JobState,
    snapshot: Job,
}

/// Append-only NDJSON log of job snapshots. Every state transition appends a
/// self-contained snapshot; hydration keeps the last snapshot per job.
#[derive(Debug, Clone)]
pub struct JobJournal {
    path: PathBuf,
}

impl JobJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, job: &Job) -> Result<(), JournalError> {
        let record = JournalRecord {
            ts: now_millis(),
            job_id: job.job_id.clone(),
            state: job.state,
            snapshot: job.clone(),
        };
        let line = serde_json::to_string(&record).map_err(|source| JournalError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        append_line(&self.path, &line).map_err(|source| JournalError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Replay the log. Unparseable lines are skipped; the last snapshot per
    /// job id wins. Jobs come back in creation order.
    pub fn hydrate(&self) -> Result<Vec<Job>, JournalError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JournalError::Io {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };

        let mut order: Vec<String> = Vec::new();
        let mut latest: std::collections::HashMap<String, Job> = std::collections::HashMap::new();
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let record: JournalRecord = match serde_json::from_str(trimmed) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if !latest.contains_key(&record.job_id) {
                order.push(record.job_id.clone());
            }
            latest.insert(record.job_id.clone(), record.snapshot);
        }

        Ok(order
            .into_iter()
            .filter_map(|job_id| latest.remove(&job_id))
            .collect())
    }
}
