//! Job model: the persistent record describing one shell command and its
//! lifecycle metadata.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Closed set of job lifecycle states.
///
/// `pending → processing → completed | dead`; `dead → pending` only via an
/// explicit dead-letter retry. Raw state strings exist solely at the store
/// and CLI boundaries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    /// Whether the state admits no further transitions by the worker loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => anyhow::bail!(
                "unknown job state '{other}' (expected pending, processing, completed or dead)"
            ),
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    /// The shell command the worker hands to `sh -c`.
    pub command: String,

    #[builder(default)]
    pub state: JobState,

    /// Completed failed attempts so far.
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default = 3)]
    pub max_retries: i32,

    /// Earliest instant the job is eligible for pickup. Meaningful only
    /// while pending; may be stale in other states.
    #[builder(default = Utc::now())]
    pub run_after: DateTime<Utc>,

    /// Wall-clock ceiling for one execution, in seconds; 0 = unbounded.
    #[builder(default = 0)]
    pub timeout_sec: i64,

    /// Higher runs first; FIFO by `created_at` within a priority.
    #[builder(default = 0)]
    pub priority: i32,

    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    // Trace of the most recent execution, overwritten on each attempt.
    #[builder(default, setter(strip_option))]
    pub stdout: Option<String>,
    #[builder(default, setter(strip_option))]
    pub stderr: Option<String>,
    /// NULL when the child was killed by timeout.
    #[builder(default, setter(strip_option))]
    pub exit_code: Option<i32>,
    #[builder(default, setter(strip_option))]
    pub runtime_sec: Option<i64>,
    #[builder(default, setter(strip_option))]
    pub trace_created_at: Option<DateTime<Utc>>,

    /// Verbatim copy of `command` at enqueue time; immutable thereafter.
    pub replayable_command: String,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job for `command` with the given policies.
    pub fn for_command(
        command: &str,
        max_retries: i32,
        run_after: DateTime<Utc>,
        timeout_sec: i64,
        priority: i32,
    ) -> Self {
        Self::builder()
            .command(command)
            .replayable_command(command)
            .max_retries(max_retries)
            .run_after(run_after)
            .timeout_sec(timeout_sec)
            .priority(priority)
            .build()
    }

    /// Whether the job is eligible for pickup at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_after <= now
    }
}

// ============================================================================
// Finalization outcomes
// ============================================================================

/// Post-execution transition applied by the store in a single write.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Execution succeeded.
    Completed,
    /// Execution failed with retries remaining; schedule the next attempt.
    Retry {
        attempts: i32,
        run_after: DateTime<Utc>,
        error: String,
    },
    /// Execution failed and retries are exhausted; dead-letter the job.
    Dead { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job::for_command("echo hello", 3, Utc::now(), 0, 0)
    }

    #[test]
    fn new_job_starts_pending_with_zero_attempts() {
        let job = sample_job();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 3);
    }

    #[test]
    fn new_job_preserves_replayable_command() {
        let job = sample_job();
        assert_eq!(job.replayable_command, job.command);
    }

    #[test]
    fn is_ready_respects_run_after() {
        let mut job = sample_job();
        assert!(job.is_ready(Utc::now()));

        job.run_after = Utc::now() + chrono::Duration::seconds(60);
        assert!(!job.is_ready(Utc::now()));
    }

    #[test]
    fn processing_job_is_not_ready() {
        let mut job = sample_job();
        job.state = JobState::Processing;
        assert!(!job.is_ready(Utc::now()));
    }

    #[test]
    fn state_parse_format_roundtrip() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Dead.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }
}
