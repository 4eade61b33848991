use crate::app::runner::JobOutcome;
use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub last_run_at: DateTime<Utc>,
    pub last_outcome: JobOutcome,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleState {
    pub jobs: BTreeMap<String, JobRecord>,
}

/// Last-run bookkeeping for persisted jobs, kept as a JSON file so the
/// cadence survives restarts.
pub struct ScheduleStateStore {
    path: PathBuf,
    state: Mutex<ScheduleState>,
}

impl ScheduleStateStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        "Ignoring unreadable scheduler state at {}: {}",
                        path.display(),
                        e
                    );
                    ScheduleState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScheduleState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.lock().jobs.get(job_id).cloned()
    }

    /// Record a finished run and persist the whole state.
    pub fn record(&self, job_id: &str, outcome: JobOutcome, at: DateTime<Utc>) -> Result<JobRecord> {
        let mut state = self.lock();
        let failures = match outcome {
            JobOutcome::Completed => 0,
            _ => state
                .jobs
                .get(job_id)
                .map(|r| r.consecutive_failures + 1)
                .unwrap_or(1),
        };
        let record = JobRecord {
            last_run_at: at,
            last_outcome: outcome,
            consecutive_failures: failures,
        };
        state.jobs.insert(job_id.to_string(), record.clone());
        self.persist(&state)?;
        Ok(record)
    }

    fn persist(&self, state: &ScheduleState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write-then-rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
