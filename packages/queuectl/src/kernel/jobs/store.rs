//! SQLite-backed job store.
//!
//! Every state transition in the engine goes through this module. The
//! claim path (`pick_and_lock`) is a single `WITH ... UPDATE ... RETURNING`
//! statement: SQLite executes each statement atomically, so concurrent
//! workers — and concurrent engine processes sharing the store file —
//! can never claim the same job twice. Losers simply observe `None`.

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::executor::ExecResult;
use super::job::{Job, JobOutcome, JobState};

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, run_after, timeout_sec, \
     priority, last_error, stdout, stderr, exit_code, runtime_sec, trace_created_at, \
     replayable_command, created_at, updated_at";

/// Durable persistence for jobs.
#[derive(Clone)]
pub struct JobStore {
    db: SqlitePool,
}

impl JobStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a new pending job and return its id.
    pub async fn enqueue(
        &self,
        command: &str,
        max_retries: i32,
        delay_sec: i64,
        timeout_sec: i64,
        priority: i32,
    ) -> Result<Uuid> {
        let run_after = Utc::now() + chrono::Duration::seconds(delay_sec);
        let job = Job::for_command(command, max_retries, run_after, timeout_sec, priority);

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, command, state, attempts, max_retries, run_after, timeout_sec,
                priority, last_error, stdout, stderr, exit_code, runtime_sec, trace_created_at,
                replayable_command, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id)
        .bind(&job.command)
        .bind(job.state)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(job.run_after)
        .bind(job.timeout_sec)
        .bind(job.priority)
        .bind(&job.last_error)
        .bind(&job.stdout)
        .bind(&job.stderr)
        .bind(job.exit_code)
        .bind(job.runtime_sec)
        .bind(job.trace_created_at)
        .bind(&job.replayable_command)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.db)
        .await?;

        Ok(job.id)
    }

    /// Atomically claim the next eligible job: pending, due, highest
    /// priority first, FIFO within a priority. Returns `None` when no job
    /// is eligible or a concurrent claimer won the race.
    pub async fn pick_and_lock(&self) -> Result<Option<Job>> {
        let now = Utc::now();

        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE state = 'pending' AND run_after <= ?
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            UPDATE jobs
            SET state = 'processing',
                updated_at = ?
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(job)
    }

    /// Persist the trace of the most recent execution. A separate write
    /// from the state transition; the worker calls this before `finalize`.
    pub async fn record_trace(&self, id: Uuid, result: &ExecResult) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE jobs
            SET stdout = ?,
                stderr = ?,
                exit_code = ?,
                runtime_sec = ?,
                trace_created_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(result.exit_code)
        .bind(result.runtime_sec)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Apply the post-execution transition as a single write.
    pub async fn finalize(&self, id: Uuid, outcome: &JobOutcome) -> Result<()> {
        let now = Utc::now();

        match outcome {
            JobOutcome::Completed => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'completed',
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(id)
                .execute(&self.db)
                .await?;
            }
            JobOutcome::Retry {
                attempts,
                run_after,
                error,
            } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'pending',
                        attempts = ?,
                        run_after = ?,
                        last_error = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(attempts)
                .bind(run_after)
                .bind(error)
                .bind(now)
                .bind(id)
                .execute(&self.db)
                .await?;
            }
            JobOutcome::Dead { error } => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'dead',
                        last_error = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(error)
                .bind(now)
                .bind(id)
                .execute(&self.db)
                .await?;
            }
        }

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(job)
    }

    /// List jobs, newest first, optionally filtered by state.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let jobs = match state {
            Some(state) => {
                sqlx::query_as::<_, Job>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ? ORDER BY created_at DESC"
                ))
                .bind(state)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"
                ))
                .fetch_all(&self.db)
                .await?
            }
        };

        Ok(jobs)
    }

    pub async fn count_by_state(&self) -> Result<HashMap<JobState, i64>> {
        let rows = sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Return `processing` jobs whose `updated_at` is older than
    /// `lock_timeout_sec` back to `pending`, eligible immediately.
    /// Their claimer is presumed crashed. Returns the reclaimed count.
    pub async fn reclaim_stale(&self, lock_timeout_sec: i64) -> Result<u64> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(lock_timeout_sec);

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                run_after = ?,
                updated_at = ?
            WHERE state = 'processing'
              AND updated_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(cutoff)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Resurrect a dead job: back to `pending`, attempts reset, error
    /// cleared, eligible immediately. Returns false when the job was not
    /// in `dead` (lost race or illegal request).
    pub async fn resurrect(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                run_after = ?,
                last_error = NULL,
                updated_at = ?
            WHERE id = ? AND state = 'dead'
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
