use crate::domain::ports::Job;
use crate::utils::error::{IntelError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a cancelled job may keep running before it is abandoned.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl JobOutcome {
    /// Whether the scheduler should retry ahead of the normal period.
    pub fn wants_reschedule(&self) -> bool {
        !matches!(self, JobOutcome::Completed)
    }
}

impl From<JobOutcome> for JobState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed => JobState::Completed,
            JobOutcome::Failed => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// Executes one job at a time on a spawned task.
pub struct JobRunner {
    job: Arc<dyn Job>,
    running: Arc<AtomicBool>,
    grace: Duration,
    state: Arc<watch::Sender<JobState>>,
}

impl JobRunner {
    pub fn new(job: Arc<dyn Job>) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            job,
            running: Arc::new(AtomicBool::new(false)),
            grace: DEFAULT_GRACE_PERIOD,
            state: Arc::new(state),
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn submit(&self) -> Result<JobHandle> {
        self.submit_with_token(CancellationToken::new())
    }

    /// Start the job and return immediately. Fails with `JobBusy` while a
    /// previous submission is still running.
    pub fn submit_with_token(&self, cancel: CancellationToken) -> Result<JobHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IntelError::JobBusy {
                job: self.job.id().to_string(),
            });
        }
        self.state.send_replace(JobState::Running);

        let job = Arc::clone(&self.job);
        let grace = self.grace;
        let token = cancel.clone();
        let mut guard = RunGuard {
            running: Arc::clone(&self.running),
            state: Arc::clone(&self.state),
            finished: None,
        };

        let task = tokio::spawn(async move {
            let outcome = drive(job.as_ref(), token, grace).await;
            guard.finished = Some(outcome);
            drop(guard);
            outcome
        });

        Ok(JobHandle {
            id: self.job.id().to_string(),
            cancel,
            task,
        })
    }
}

/// Clears the busy flag and publishes the final state even if the job panics.
struct RunGuard {
    running: Arc<AtomicBool>,
    state: Arc<watch::Sender<JobState>>,
    finished: Option<JobOutcome>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let outcome = self.finished.unwrap_or(JobOutcome::Failed);
        self.state.send_replace(outcome.into());
        self.running.store(false, Ordering::Release);
    }
}

async fn drive(job: &dyn Job, cancel: CancellationToken, grace: Duration) -> JobOutcome {
    let started = Instant::now();
    tracing::info!("Job {} started", job.id());

    let run = job.run(cancel.clone());
    tokio::pin!(run);

    let result = tokio::select! {
        biased;
        result = &mut run => Some(result),
        _ = cancel.cancelled() => None,
    };

    let result = match result {
        Some(result) => Some(result),
        None => match tokio::time::timeout(grace, &mut run).await {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::warn!("Job {} did not stop within {:?}, abandoning it", job.id(), grace);
                None
            }
        },
    };

    let outcome = match result {
        Some(Ok(())) => JobOutcome::Completed,
        Some(Err(IntelError::Cancelled)) | None => JobOutcome::Cancelled,
        Some(Err(e)) if cancel.is_cancelled() => {
            tracing::debug!("Job {} errored while stopping: {}", job.id(), e);
            JobOutcome::Cancelled
        }
        Some(Err(e)) if e.is_transient() => {
            tracing::warn!("Job {} failed, will retry: {} ({})", job.id(), e, e.recovery_suggestion());
            JobOutcome::Failed
        }
        Some(Err(e)) => {
            tracing::error!(
                "Job {} failed and is unlikely to recover on retry: {} ({})",
                job.id(),
                e,
                e.recovery_suggestion()
            );
            JobOutcome::Failed
        }
    };

    tracing::info!(
        job = job.id(),
        ?outcome,
        reschedule = outcome.wants_reschedule(),
        elapsed = ?started.elapsed(),
        "Job finished"
    );
    outcome
}

pub struct JobHandle {
    id: String,
    cancel: CancellationToken,
    task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the job to stop. The outcome will be `Cancelled` unless it had
    /// already finished.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn outcome(self) -> JobOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => JobOutcome::Cancelled,
            Err(e) => {
                tracing::error!("Job {} panicked: {}", self.id, e);
                JobOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Waits for `release` (or cancellation), then returns `result`.
    struct GatedJob {
        release: Arc<Notify>,
        fail: bool,
        runs: AtomicUsize,
    }

    impl GatedJob {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                release: Arc::new(Notify::new()),
                fail,
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Job for GatedJob {
        fn id(&self) -> &str {
            "gated"
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = cancel.cancelled() => Err(IntelError::Cancelled),
                _ = self.release.notified() => {
                    if self.fail {
                        Err(IntelError::ServiceUnavailable { name: "test".to_string() })
                    } else {
                        Ok(())
                    }
                }
            }
        }
    }

    /// Ignores cancellation entirely.
    struct StubbornJob;

    #[async_trait]
    impl Job for StubbornJob {
        fn id(&self) -> &str {
            "stubborn"
        }

        async fn run(&self, _cancel: CancellationToken) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_returns_before_work_completes() {
        let job = GatedJob::new(false);
        let runner = JobRunner::new(job.clone());

        let handle = runner.submit().unwrap();

        assert!(!handle.is_finished());
        assert_eq!(runner.state(), JobState::Running);

        job.release.notify_one();
        let outcome = handle.outcome().await;

        assert_eq!(outcome, JobOutcome::Completed);
        assert!(!outcome.wants_reschedule());
        assert_eq!(runner.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn test_failed_job_requests_reschedule() {
        let job = GatedJob::new(true);
        let runner = JobRunner::new(job.clone());

        let handle = runner.submit().unwrap();
        job.release.notify_one();
        let outcome = handle.outcome().await;

        assert_eq!(outcome, JobOutcome::Failed);
        assert!(outcome.wants_reschedule());
        assert_eq!(runner.state(), JobState::Failed);
    }

    /// Fails immediately with an error a retry will not fix.
    struct MisconfiguredJob;

    #[async_trait]
    impl Job for MisconfiguredJob {
        fn id(&self) -> &str {
            "misconfigured"
        }

        async fn run(&self, _cancel: CancellationToken) -> Result<()> {
            Err(IntelError::MissingConfigError {
                field: "sources".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_permanent_error_still_reports_failed() {
        let runner = JobRunner::new(Arc::new(MisconfiguredJob));

        let outcome = runner.submit().unwrap().outcome().await;

        assert_eq!(outcome, JobOutcome::Failed);
        assert!(outcome.wants_reschedule());
        assert_eq!(runner.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_stop_signal_cancels_running_job() {
        let job = GatedJob::new(false);
        let runner = JobRunner::new(job.clone());

        let handle = runner.submit().unwrap();
        handle.stop();
        let outcome = handle.outcome().await;

        assert_eq!(outcome, JobOutcome::Cancelled);
        assert!(outcome.wants_reschedule());
        assert_eq!(runner.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_uncooperative_job_is_abandoned_after_grace() {
        let runner =
            JobRunner::new(Arc::new(StubbornJob)).with_grace_period(Duration::from_millis(50));

        let started = Instant::now();
        let handle = runner.submit().unwrap();
        handle.stop();
        let outcome = handle.outcome().await;

        assert_eq!(outcome, JobOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_overlapping_submit_is_rejected() {
        let job = GatedJob::new(false);
        let runner = JobRunner::new(job.clone());

        let handle = runner.submit().unwrap();
        assert!(matches!(runner.submit(), Err(IntelError::JobBusy { .. })));

        job.release.notify_one();
        handle.outcome().await;

        let again = runner.submit().unwrap();
        job.release.notify_one();
        assert_eq!(again.outcome().await, JobOutcome::Completed);
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }
}
