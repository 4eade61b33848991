use crate::app::runner::{JobOutcome, JobRunner, DEFAULT_GRACE_PERIOD};
use crate::app::state::{JobRecord, ScheduleStateStore};
use crate::domain::ports::{Job, NetworkProbe};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkConstraint {
    #[default]
    Any,
    /// Only run on an unmetered (Wi-Fi-like) uplink.
    Unmetered,
}

/// Exponential backoff for out-of-cycle retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(60 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }
}

/// Registration parameters for a periodic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: String,
    pub period: Duration,
    pub network: NetworkConstraint,
    /// Keep last-run bookkeeping across restarts.
    pub persisted: bool,
    pub retry: RetryPolicy,
}

impl JobSpec {
    pub fn new(id: impl Into<String>, period: Duration) -> Self {
        Self {
            id: id.into(),
            period,
            network: NetworkConstraint::Any,
            persisted: true,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_network(mut self, network: NetworkConstraint) -> Self {
        self.network = network;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn persisted(mut self, persisted: bool) -> Self {
        self.persisted = persisted;
        self
    }

    /// Completed runs wait a full period; anything else retries sooner,
    /// but never later than the normal cadence would.
    pub fn next_delay(&self, outcome: JobOutcome, consecutive_failures: u32) -> Duration {
        if outcome.wants_reschedule() {
            self.retry.delay(consecutive_failures).min(self.period)
        } else {
            self.period
        }
    }

    /// Delay before the first trigger, resuming from persisted bookkeeping.
    pub fn initial_delay(&self, record: Option<&JobRecord>, now: chrono::DateTime<chrono::Utc>) -> Duration {
        let Some(record) = record else {
            return Duration::ZERO;
        };
        let due_in = self.next_delay(record.last_outcome, record.consecutive_failures);
        let elapsed = (now - record.last_run_at).to_std().unwrap_or(Duration::ZERO);
        due_in.saturating_sub(elapsed)
    }
}

/// Probe for hosts without metering information.
pub struct AlwaysUnmetered;

impl NetworkProbe for AlwaysUnmetered {
    fn is_unmetered(&self) -> bool {
        true
    }
}

/// Fires registered jobs on their period and reschedules failures.
pub struct PeriodicScheduler {
    entries: Vec<(JobSpec, Arc<JobRunner>)>,
    probe: Arc<dyn NetworkProbe>,
    state: Option<Arc<ScheduleStateStore>>,
    grace: Duration,
}

impl PeriodicScheduler {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self {
            entries: Vec::new(),
            probe,
            state: None,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Grace period applied to runners registered after this call.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_state_store(mut self, store: ScheduleStateStore) -> Self {
        self.state = Some(Arc::new(store));
        self
    }

    /// Register a job. The returned runner is shared with the schedule, so a
    /// manual run through it cannot overlap a scheduled one.
    pub fn register(&mut self, spec: JobSpec, job: Arc<dyn Job>) -> Arc<JobRunner> {
        let runner = Arc::new(JobRunner::new(job).with_grace_period(self.grace));
        tracing::info!(
            job = %spec.id,
            period = ?spec.period,
            network = ?spec.network,
            persisted = spec.persisted,
            "Job scheduled"
        );
        self.entries.push((spec, Arc::clone(&runner)));
        runner
    }

    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let loops: Vec<JoinHandle<()>> = self
            .entries
            .into_iter()
            .map(|(spec, runner)| {
                let probe = Arc::clone(&self.probe);
                let state = self.state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(drive_schedule(spec, runner, probe, state, shutdown))
            })
            .collect();

        tokio::spawn(async move {
            for handle in loops {
                if let Err(e) = handle.await {
                    tracing::error!("Schedule loop ended abnormally: {}", e);
                }
            }
        })
    }
}

async fn drive_schedule(
    spec: JobSpec,
    runner: Arc<JobRunner>,
    probe: Arc<dyn NetworkProbe>,
    state: Option<Arc<ScheduleStateStore>>,
    shutdown: CancellationToken,
) {
    let persisted = if spec.persisted { state } else { None };
    let record = persisted.as_ref().and_then(|s| s.get(&spec.id));
    let mut failures = record.as_ref().map(|r| r.consecutive_failures).unwrap_or(0);
    let mut delay = spec.initial_delay(record.as_ref(), chrono::Utc::now());
    tracing::debug!("First run of {} in {:?}", spec.id, delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        if spec.network == NetworkConstraint::Unmetered && !probe.is_unmetered() {
            tracing::info!("Deferring {}: network is metered", spec.id);
            delay = spec.retry.initial.min(spec.period);
            continue;
        }

        let handle = match runner.submit_with_token(shutdown.child_token()) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!("Skipping trigger: {}", e);
                delay = spec.retry.initial.min(spec.period);
                continue;
            }
        };
        let outcome = handle.outcome().await;

        failures = match outcome {
            JobOutcome::Completed => 0,
            _ => failures + 1,
        };
        if let Some(store) = &persisted {
            if let Err(e) = store.record(&spec.id, outcome, chrono::Utc::now()) {
                tracing::warn!("Could not persist schedule state for {}: {}", spec.id, e);
            }
        }

        if shutdown.is_cancelled() {
            break;
        }

        delay = spec.next_delay(outcome, failures);
        tracing::info!("Next run of {} in {:?}", spec.id, delay);
    }

    tracing::debug!("Schedule for {} stopped", spec.id);
}
