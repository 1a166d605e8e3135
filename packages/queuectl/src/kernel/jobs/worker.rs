//! Worker loop: claim one job at a time, execute it, and apply the
//! retry/backoff/dead-letter transition.
//!
//! Workers coordinate exclusively through the store's atomic claim; there
//! are no in-process locks, so any number of workers — in this process or
//! another sharing the store file — can run side by side. Shutdown is
//! cooperative: the cancellation token and the persisted stop flag are
//! checked once per iteration, and a claimed job always runs to its
//! natural end or its own timeout.

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ConfigRegistry;
use super::executor::{self, ExecResult};
use super::job::{Job, JobOutcome};
use super::store::JobStore;
use crate::kernel::EngineKernel;

/// Pause after finishing a job, before the next claim.
const INTER_JOB_PAUSE: Duration = Duration::from_millis(200);
/// Sleep when no job is eligible.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What a single scheduling iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Claimed and finalized one job.
    Worked,
    /// No eligible job.
    Idle,
}

/// One worker in the pool.
pub struct Worker {
    store: JobStore,
    config: ConfigRegistry,
    worker_id: String,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(kernel: &EngineKernel, worker_id: String, shutdown: CancellationToken) -> Self {
        Self {
            store: kernel.store(),
            config: kernel.config(),
            worker_id,
            shutdown,
        }
    }

    /// Run until cancelled or stopped via the persisted flag.
    ///
    /// A store failure terminates this worker with an error; sibling
    /// workers are unaffected.
    pub async fn run(self) -> Result<()> {
        info!(worker_id = %self.worker_id, "worker starting");

        loop {
            if self.shutdown.is_cancelled() {
                info!(worker_id = %self.worker_id, "shutdown requested, worker exiting");
                break;
            }
            if self.config.stop_requested().await? {
                info!(worker_id = %self.worker_id, "stop flag set, worker exiting");
                break;
            }

            let pause = match self.tick().await? {
                Tick::Worked => INTER_JOB_PAUSE,
                Tick::Idle => IDLE_POLL_INTERVAL,
            };

            // Sleeping is the only place shutdown interrupts mid-iteration;
            // execution itself always finishes.
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }

    /// One scheduling iteration: claim, execute, finalize. Public so the
    /// loop can be driven step by step when embedding or testing.
    pub async fn tick(&self) -> Result<Tick> {
        let Some(job) = self.store.pick_and_lock().await? else {
            return Ok(Tick::Idle);
        };

        self.process(job).await?;
        Ok(Tick::Worked)
    }

    /// Execute a claimed job and apply the outcome. A claimed job is
    /// always finalized, whatever the execution result.
    async fn process(&self, job: Job) -> Result<()> {
        debug!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            attempt = job.attempts + 1,
            command = %job.command,
            "executing job"
        );

        let result = executor::execute(&job).await;

        // Trace first, transition second: the trace must be durable by the
        // time the job leaves `processing`.
        self.store.record_trace(job.id, &result).await?;

        let outcome = self.decide(&job, &result).await?;
        match &outcome {
            JobOutcome::Completed => {
                info!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    runtime_sec = result.runtime_sec,
                    "job succeeded"
                );
            }
            JobOutcome::Retry {
                attempts,
                run_after,
                error,
            } => {
                warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempts,
                    run_after = %run_after,
                    error = %error,
                    "job failed, retry scheduled"
                );
            }
            JobOutcome::Dead { error } => {
                warn!(
                    worker_id = %self.worker_id,
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %error,
                    "job failed permanently, moved to dead letter"
                );
            }
        }

        self.store.finalize(job.id, &outcome).await?;
        Ok(())
    }

    /// The state machine: success completes; failure either schedules a
    /// backoff retry or dead-letters once `attempts + 1` reaches the cap.
    async fn decide(&self, job: &Job, result: &ExecResult) -> Result<JobOutcome> {
        if result.success {
            return Ok(JobOutcome::Completed);
        }

        let error = failure_reason(job, result);
        let next = job.attempts + 1;

        if next >= job.max_retries {
            return Ok(JobOutcome::Dead { error });
        }

        // Read the base fresh each time so operators can tune it live.
        let base = self.config.backoff_base().await?;
        let delay_sec = backoff_delay_sec(base, next);
        Ok(JobOutcome::Retry {
            attempts: next,
            run_after: chrono::Utc::now() + chrono::Duration::seconds(delay_sec),
            error,
        })
    }
}

/// Human-readable reason for a failed execution: timeout beats stderr
/// beats the bare exit code.
fn failure_reason(job: &Job, result: &ExecResult) -> String {
    if result.killed_by_timeout {
        return format!("Timeout after {}s", job.timeout_sec);
    }
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    format!("exit {}", result.exit_code.unwrap_or(-1))
}

/// `floor(base ^ attempt)` seconds. Uncapped; the cast saturates on
/// overflow.
fn backoff_delay_sec(base: f64, attempt: i32) -> i64 {
    base.powi(attempt).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn failed(exit_code: Option<i32>, stderr: &str, killed: bool) -> ExecResult {
        ExecResult {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            runtime_sec: 0,
            killed_by_timeout: killed,
        }
    }

    fn job_with_timeout(timeout_sec: i64) -> Job {
        Job::for_command("true", 3, Utc::now(), timeout_sec, 0)
    }

    #[test]
    fn failure_reason_prefers_timeout() {
        let job = job_with_timeout(2);
        let result = failed(None, "noise on stderr", true);
        assert_eq!(failure_reason(&job, &result), "Timeout after 2s");
    }

    #[test]
    fn failure_reason_uses_stderr_when_present() {
        let job = job_with_timeout(0);
        let result = failed(Some(1), "  disk full\n", false);
        assert_eq!(failure_reason(&job, &result), "disk full");
    }

    #[test]
    fn failure_reason_falls_back_to_exit_code() {
        let job = job_with_timeout(0);
        let result = failed(Some(7), "", false);
        assert_eq!(failure_reason(&job, &result), "exit 7");
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_delay_sec(2.0, 1), 2);
        assert_eq!(backoff_delay_sec(2.0, 2), 4);
        assert_eq!(backoff_delay_sec(2.0, 3), 8);
    }

    #[test]
    fn backoff_floors_fractional_bases() {
        assert_eq!(backoff_delay_sec(1.5, 1), 1);
        assert_eq!(backoff_delay_sec(1.5, 2), 2);
        assert_eq!(backoff_delay_sec(1.5, 4), 5);
    }
}
