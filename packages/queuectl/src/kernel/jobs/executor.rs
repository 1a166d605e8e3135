//! Subprocess supervision: run one job's command to completion and hand
//! back a structured result.
//!
//! The contract is a single blocking call: `execute` returns only once
//! the child is fully reaped and the timeout timer is gone. Failures of
//! any kind (non-zero exit, timeout kill, spawn error) are folded into
//! the returned [`ExecResult`]; this function never errors.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use super::job::Job;

/// How long to keep draining output pipes after a timeout kill. Orphaned
/// grandchildren can hold the write end open indefinitely; the engine
/// does not wait for them.
const KILLED_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub success: bool,
    /// None when the child was killed by the timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Whole elapsed seconds, floored.
    pub runtime_sec: i64,
    pub killed_by_timeout: bool,
}

impl ExecResult {
    /// Result for a command that never started (binary missing, fork
    /// failure). The error text lands in stderr so the usual failure
    /// reporting picks it up.
    fn spawn_failure(error: std::io::Error) -> Self {
        Self {
            success: false,
            exit_code: Some(-1),
            stdout: String::new(),
            stderr: error.to_string(),
            runtime_sec: 0,
            killed_by_timeout: false,
        }
    }
}

/// Accumulate a child output pipe into a shared buffer. Partial output
/// stays readable even if the reader is later abandoned.
fn spawn_reader<R>(mut pipe: R, buf: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = buf.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    })
}

fn take_string(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    match buf.lock() {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => String::new(),
    }
}

/// Run `job.command` through the host shell, capturing output in memory.
///
/// The command is trusted user input; no escaping or validation happens
/// here. With `timeout_sec > 0` the child is SIGKILLed once the ceiling
/// elapses — no grace period — and reaped before this returns.
pub async fn execute(job: &Job) -> ExecResult {
    let start = Instant::now();

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(&job.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return ExecResult::spawn_failure(e),
    };

    // Drain both pipes concurrently so a chatty child cannot fill a pipe
    // buffer and deadlock against `wait`.
    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::new();
    if let Some(pipe) = child.stdout.take() {
        readers.push(spawn_reader(pipe, Arc::clone(&stdout_buf)));
    }
    if let Some(pipe) = child.stderr.take() {
        readers.push(spawn_reader(pipe, Arc::clone(&stderr_buf)));
    }

    let mut killed_by_timeout = false;
    let status = if job.timeout_sec > 0 {
        match tokio::time::timeout(Duration::from_secs(job.timeout_sec as u64), child.wait()).await
        {
            Ok(waited) => waited,
            Err(_elapsed) => {
                debug!(job_id = %job.id, timeout_sec = job.timeout_sec, "timeout reached, killing child");
                killed_by_timeout = true;
                let _ = child.start_kill();
                child.wait().await
            }
        }
    } else {
        child.wait().await
    };

    let status = match status {
        Ok(status) => status,
        Err(e) => return ExecResult::spawn_failure(e),
    };

    // The child is reaped; its pipes hit EOF as soon as every writer is
    // gone. After a kill, grandchildren may still hold the write end, so
    // the drain is bounded and stragglers are abandoned.
    for reader in readers {
        if killed_by_timeout {
            let abort = reader.abort_handle();
            if tokio::time::timeout(KILLED_DRAIN_GRACE, reader).await.is_err() {
                abort.abort();
            }
        } else {
            let _ = reader.await;
        }
    }

    let runtime_sec = start.elapsed().as_secs() as i64;

    let exit_code = if killed_by_timeout {
        None
    } else {
        // On Unix a signal-killed child has no code; fold that into -1 so
        // the failure still carries a number.
        Some(status.code().unwrap_or(-1))
    };

    ExecResult {
        success: !killed_by_timeout && exit_code == Some(0),
        exit_code,
        stdout: take_string(&stdout_buf),
        stderr: take_string(&stderr_buf),
        runtime_sec,
        killed_by_timeout,
    }
}
