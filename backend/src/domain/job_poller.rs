//! Await completion of asynchronous Storage API jobs.
//!
//! The poller re-reads a job's status on a capped exponential backoff until it
//! succeeds, fails, runs out of time budget or the shared cancellation token
//! fires. A job that reports `error` is terminal and never re-polled.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::Credential;
use crate::domain::ports::{JobStatus, StorageApi, StorageApiError, StorageJob};

/// Backoff parameters for job polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first re-poll.
    pub initial_interval: Duration,
    /// Growth factor applied after each wait.
    pub multiplier: u32,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
    /// Wall-clock budget for the whole wait, status checks included.
    pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            multiplier: 2,
            max_interval: Duration::from_secs(3),
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

/// Mutable backoff state for one job.
///
/// ```
/// use std::time::Duration;
/// use webhook_batcher::domain::{Backoff, BackoffPolicy};
///
/// let mut backoff = Backoff::new(BackoffPolicy {
///     initial_interval: Duration::from_millis(100),
///     multiplier: 2,
///     max_interval: Duration::from_millis(300),
///     max_elapsed: Duration::from_millis(700),
/// });
/// let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
/// assert_eq!(
///     delays,
///     [100, 200, 300, 100].map(Duration::from_millis).to_vec(),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    multiplier: u32,
    cap: Duration,
    elapsed: Duration,
    max_elapsed: Duration,
}

impl Backoff {
    /// Fresh state for `policy`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial_interval.min(policy.max_interval),
            multiplier: policy.multiplier.max(1),
            cap: policy.max_interval,
            elapsed: Duration::ZERO,
            max_elapsed: policy.max_elapsed,
        }
    }

    /// Next wait, or `None` once the budget is spent. The final wait is
    /// shortened so the total never exceeds the budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.max_elapsed.saturating_sub(self.elapsed);
        if remaining.is_zero() {
            return None;
        }
        let delay = self.current.min(remaining);
        self.elapsed += delay;
        self.current = self.current.saturating_mul(self.multiplier).min(self.cap);
        Some(delay)
    }

    /// Total time spent waiting so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Async sleeping abstraction so tests can run the poller without waiting.
#[async_trait]
pub trait PollSleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl PollSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Reasons a job could not be awaited to success.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobPollError {
    /// The job finished in the error state.
    #[error("storage job {job_id} failed: {details}")]
    RemoteJobFailed { job_id: i64, details: String },
    /// The time budget ran out while the job was still pending.
    #[error("timeout while waiting for storage job {job_id} after {elapsed:?}")]
    Timeout { job_id: i64, elapsed: Duration },
    /// The shared cancellation token fired.
    #[error("waiting for storage job {job_id} was cancelled")]
    Cancelled { job_id: i64 },
    /// Polling itself failed with a non-retryable error.
    #[error("polling storage job {job_id} failed: {source}")]
    Api {
        job_id: i64,
        #[source]
        source: StorageApiError,
    },
}

/// Polls Storage API jobs to completion.
#[derive(Clone)]
pub struct JobPoller {
    api: Arc<dyn StorageApi>,
    sleeper: Arc<dyn PollSleeper>,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
}

impl JobPoller {
    /// Build a poller; `shutdown` aborts every wait when cancelled.
    pub fn new(
        api: Arc<dyn StorageApi>,
        sleeper: Arc<dyn PollSleeper>,
        policy: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            sleeper,
            policy,
            shutdown,
        }
    }

    /// Wait until `job` reaches a terminal state and return its final snapshot.
    ///
    /// # Errors
    ///
    /// [`JobPollError::RemoteJobFailed`] for jobs ending in `error`,
    /// [`JobPollError::Timeout`] when the time budget is exhausted and
    /// [`JobPollError::Cancelled`] on shutdown.
    pub async fn await_job(
        &self,
        credential: &Credential,
        job: StorageJob,
    ) -> Result<StorageJob, JobPollError> {
        let job_id = job.id;
        let started = Instant::now();
        let deadline = started + self.policy.max_elapsed;
        let mut backoff = Backoff::new(self.policy);
        let mut current = job;

        loop {
            match current.status {
                JobStatus::Success => return Ok(current),
                JobStatus::Error => {
                    return Err(JobPollError::RemoteJobFailed {
                        job_id,
                        details: failure_details(&current),
                    });
                }
                JobStatus::Waiting | JobStatus::Processing | JobStatus::Other(_) => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(delay) = backoff
                .next_delay()
                .map(|delay| delay.min(remaining))
                .filter(|delay| !delay.is_zero())
            else {
                return Err(timed_out(job_id, started, &backoff));
            };
            debug!(job_id, status = %current.status, ?delay, "storage job pending");

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    return Err(JobPollError::Cancelled { job_id });
                }
                () = self.sleeper.sleep(delay) => {}
            }

            // Status checks share the polling deadline.
            let checked = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    return Err(JobPollError::Cancelled { job_id });
                }
                checked = timeout_at(deadline, self.api.job_status(credential, job_id)) => checked,
            };
            match checked {
                Err(_) => return Err(timed_out(job_id, started, &backoff)),
                Ok(Ok(next)) => current = next,
                Ok(Err(error)) if error.is_retryable() => {
                    warn!(job_id, error = %error, "storage job status check failed; retrying");
                }
                Ok(Err(source)) => return Err(JobPollError::Api { job_id, source }),
            }
        }
    }
}

/// Reports the larger of wall time and accounted backoff.
fn timed_out(job_id: i64, started: Instant, backoff: &Backoff) -> JobPollError {
    JobPollError::Timeout {
        job_id,
        elapsed: started.elapsed().max(backoff.elapsed()),
    }
}

fn failure_details(job: &StorageJob) -> String {
    match (&job.error_message, &job.results) {
        (Some(message), _) => message.clone(),
        (None, Some(results)) => results.to_string(),
        (None, None) => "no details reported".to_owned(),
    }
}
