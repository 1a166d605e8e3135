//! Command-line surface.
//!
//! Every verb maps 1:1 onto a core operation; the CLI only parses
//! arguments, calls the engine and renders the result. Exit code 0 on
//! success, nonzero on validation errors and missing jobs.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::kernel::jobs::{recovery, Dispatcher, Job, JobState, ReplayOutcome};
use crate::kernel::{default_store_path, EngineKernel};

// =============================================================================
// CLI Arguments (clap)
// =============================================================================

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Durable background job queue for shell commands")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a shell command to the queue
    Enqueue {
        /// The command to execute (passed verbatim to `sh -c`)
        command: String,

        /// Attempt cap before the job is dead-lettered
        #[arg(long, default_value_t = 3)]
        retries: u32,

        /// Delay in seconds before the job becomes eligible
        #[arg(long = "run-at", default_value_t = 0)]
        run_at: u32,

        /// Wall-clock ceiling per execution in seconds (0 = unbounded)
        #[arg(long, default_value_t = 0)]
        timeout: u32,

        /// Higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },

    /// List jobs, newest first
    List {
        /// Only jobs in this state (pending, processing, completed, dead)
        #[arg(long)]
        state: Option<JobState>,
    },

    /// Show job counts per state
    Status,

    /// Run a worker pool in the foreground until stopped
    #[command(name = "worker:start")]
    WorkerStart {
        /// Number of concurrent workers
        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Ask running workers to exit after their current job
    #[command(name = "worker:stop")]
    WorkerStop,

    /// List dead-letter jobs
    #[command(name = "dlq:list")]
    DlqList,

    /// Return a dead job to the queue with a fresh attempt budget
    #[command(name = "dlq:retry")]
    DlqRetry { id: Uuid },

    /// Show the full record of a job, including its last execution trace
    Show { id: Uuid },

    /// Re-run a job's original command outside the engine
    Replay {
        id: Uuid,

        /// Actually execute; without this flag the command is only printed
        #[arg(long)]
        confirm: bool,
    },

    /// Set an engine setting (backoff_base, lock_timeout, stop_workers)
    #[command(name = "config-set")]
    ConfigSet { key: String, value: String },

    /// Read an engine setting
    #[command(name = "config-get")]
    ConfigGet { key: String },

    /// Seed the queue with a deterministic mix of passing and failing jobs
    Test {
        #[arg(long, default_value_t = 5)]
        count: u32,

        #[arg(long = "fail-rate", default_value_t = 0.5)]
        fail_rate: f64,
    },
}

// =============================================================================
// Entry point
// =============================================================================

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let kernel = EngineKernel::open(&default_store_path()).await?;

    match cli.command {
        Commands::Enqueue {
            command,
            retries,
            run_at,
            timeout,
            priority,
        } => {
            let id = kernel
                .store()
                .enqueue(
                    &command,
                    retries as i32,
                    run_at as i64,
                    timeout as i64,
                    priority,
                )
                .await?;
            println!("{} enqueued {id}", style("✓").green());
            Ok(ExitCode::SUCCESS)
        }

        Commands::List { state } => {
            let jobs = kernel.store().list(state).await?;
            print_job_lines(&jobs);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status => {
            let counts = kernel.store().count_by_state().await?;
            for state in JobState::ALL {
                let n = counts.get(&state).copied().unwrap_or(0);
                println!("{:>10}  {n}", state.to_string());
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::WorkerStart { count } => {
            recovery::sweep(&kernel).await?;

            let dispatcher = Dispatcher::new(kernel);
            spawn_signal_handler(dispatcher.shutdown_token())?;
            dispatcher.start_workers(count).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::WorkerStop => {
            Dispatcher::new(kernel).stop_workers().await?;
            println!("stop requested; workers exit after their current job");
            Ok(ExitCode::SUCCESS)
        }

        Commands::DlqList => {
            let jobs = kernel.store().list(Some(JobState::Dead)).await?;
            for job in &jobs {
                println!(
                    "{}  attempts={}/{}  {}",
                    job.id,
                    job.attempts,
                    job.max_retries,
                    job.last_error.as_deref().unwrap_or("-"),
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::DlqRetry { id } => {
            Dispatcher::new(kernel).dlq_retry(id).await?;
            println!("{} job {id} returned to queue", style("✓").green());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Show { id } => {
            let job = Dispatcher::new(kernel).show(id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Replay { id, confirm } => {
            match Dispatcher::new(kernel).replay(id, confirm).await? {
                ReplayOutcome::DryRun(command) => {
                    println!("{command}");
                    println!(
                        "{}",
                        style("dry run — pass --confirm to execute").dim()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                ReplayOutcome::Ran { exit_code } => {
                    // Mirror the replayed command's exit code.
                    match exit_code {
                        Some(0) => Ok(ExitCode::SUCCESS),
                        Some(code) => Ok(ExitCode::from(code.clamp(1, 255) as u8)),
                        None => Ok(ExitCode::FAILURE),
                    }
                }
            }
        }

        Commands::ConfigSet { key, value } => {
            kernel.config().set(&key, &value).await?;
            println!("{key} = {value}");
            Ok(ExitCode::SUCCESS)
        }

        Commands::ConfigGet { key } => match kernel.config().get(&key).await? {
            Some(value) => {
                println!("{value}");
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("config key '{key}' is not set");
                Ok(ExitCode::FAILURE)
            }
        },

        Commands::Test { count, fail_rate } => {
            let ids = Dispatcher::new(kernel)
                .enqueue_test_batch(count, fail_rate)
                .await?;
            for id in &ids {
                println!("{id}");
            }
            println!("{} enqueued {} test jobs", style("✓").green(), ids.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// SIGINT/SIGTERM begin graceful shutdown: workers finish their current
/// job, then the pool drains. The persisted stop flag is untouched.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::spawn(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        info!("shutdown signal received, workers finish their current job");
        shutdown.cancel();
    });

    Ok(())
}

fn print_job_lines(jobs: &[Job]) {
    for job in jobs {
        println!(
            "{}  {:>10}  pri={:<3} attempts={}/{}  {}",
            job.id,
            job.state.to_string(),
            job.priority,
            job.attempts,
            job.max_retries,
            truncate(&job.command, 60),
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
