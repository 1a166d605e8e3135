//! Dispatcher: worker pool lifecycle and the operations the CLI maps
//! onto (enqueue, dead-letter retry, replay, show, test seeding).

use std::process::Stdio;

use anyhow::Result;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use super::config;
use super::job::{Job, JobState};
use super::worker::Worker;
use crate::kernel::EngineKernel;

/// Domain-level failures surfaced to the CLI boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {id} is {state}, expected {expected}")]
    IllegalTransition {
        id: Uuid,
        state: JobState,
        expected: JobState,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What `replay` did, for the CLI to report.
#[derive(Debug)]
pub enum ReplayOutcome {
    /// Dry run: the command that would be executed.
    DryRun(String),
    /// Confirmed run; exit code of the replayed process (None when
    /// signal-killed).
    Ran { exit_code: Option<i32> },
}

/// Engine-scoped entry point owning the in-process stop flag.
pub struct Dispatcher {
    kernel: EngineKernel,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(kernel: EngineKernel) -> Self {
        Self {
            kernel,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelled by signal handlers to begin graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Launch `count` workers and run them to completion in the
    /// foreground. Clears the persisted stop flag first so a prior
    /// `worker:stop` does not short-circuit the new pool.
    pub async fn start_workers(&self, count: usize) -> Result<()> {
        self.kernel
            .config()
            .set(config::STOP_WORKERS, "0")
            .await?;

        info!(count, "starting worker pool");

        let pid = std::process::id();
        let mut handles = Vec::with_capacity(count);
        for ordinal in 0..count {
            let worker = Worker::new(
                &self.kernel,
                format!("worker-{pid}-{ordinal}"),
                self.shutdown.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        // A failed worker takes only itself down; the rest of the pool
        // keeps draining the queue.
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "worker terminated with error"),
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }

        info!("worker pool stopped");
        Ok(())
    }

    /// Persist the stop flag. Live workers — here or in another engine
    /// process — observe it on their next iteration and exit after their
    /// current job.
    pub async fn stop_workers(&self) -> Result<()> {
        self.kernel.config().set(config::STOP_WORKERS, "1").await?;
        info!("stop flag set, workers will exit after their current job");
        Ok(())
    }

    /// Resurrect a dead-letter job: requires the job to exist and be in
    /// `dead`; resets attempts and the last error, eligible immediately.
    pub async fn dlq_retry(&self, id: Uuid) -> Result<(), EngineError> {
        let store = self.kernel.store();
        let job = store.get(id).await?.ok_or(EngineError::NotFound(id))?;

        if job.state != JobState::Dead {
            return Err(EngineError::IllegalTransition {
                id,
                state: job.state,
                expected: JobState::Dead,
            });
        }

        // The guard above can race another resurrection; the conditional
        // update is authoritative.
        if !store.resurrect(id).await? {
            return Err(EngineError::IllegalTransition {
                id,
                state: JobState::Pending,
                expected: JobState::Dead,
            });
        }

        info!(job_id = %id, "dead job returned to queue");
        Ok(())
    }

    /// Re-run a job's original command outside the engine. The replay is
    /// not a queued job: stdio is inherited and no job state changes.
    pub async fn replay(&self, id: Uuid, confirm: bool) -> Result<ReplayOutcome, EngineError> {
        let store = self.kernel.store();
        let job = store.get(id).await?.ok_or(EngineError::NotFound(id))?;

        if !confirm {
            return Ok(ReplayOutcome::DryRun(job.replayable_command));
        }

        info!(job_id = %id, command = %job.replayable_command, "replaying command");

        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&job.replayable_command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| EngineError::Store(anyhow::Error::from(e)))?;

        Ok(ReplayOutcome::Ran {
            exit_code: status.code(),
        })
    }

    /// Full job record including the trace of the last execution.
    pub async fn show(&self, id: Uuid) -> Result<Job, EngineError> {
        self.kernel
            .store()
            .get(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Deterministic bulk enqueue for exercising the pipeline: with fail
    /// rate `f`, every `k`-th job fails where `k = max(1, round(1 / max(0.01, f)))`.
    pub async fn enqueue_test_batch(&self, count: u32, fail_rate: f64) -> Result<Vec<Uuid>> {
        let store = self.kernel.store();
        let k = ((1.0 / fail_rate.max(0.01)).round() as u32).max(1);

        let mut ids = Vec::with_capacity(count as usize);
        for i in 0..count {
            let command = if i % k == 0 {
                format!("echo 'job {i} simulated failure' >&2; exit 1")
            } else {
                format!("echo 'job {i} ok'")
            };
            let id = store.enqueue(&command, 3, 0, 5, 0).await?;
            ids.push(id);
        }

        info!(count, every_kth_fails = k, "enqueued test batch");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_batch_failure_stride() {
        // Mirrors the k derivation used by enqueue_test_batch.
        let k = |f: f64| ((1.0 / f.max(0.01)).round() as u32).max(1);
        assert_eq!(k(0.5), 2);
        assert_eq!(k(1.0), 1);
        assert_eq!(k(0.25), 4);
        assert_eq!(k(0.0), 100);
        assert_eq!(k(-1.0), 100);
    }
}
