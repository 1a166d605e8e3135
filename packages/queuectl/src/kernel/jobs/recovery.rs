//! Startup recovery sweep.
//!
//! A job stuck in `processing` past the lock timeout belonged to a worker
//! that died without finalizing. The sweep runs exactly once per process
//! start, before any worker claims, and returns those jobs to `pending`.

use anyhow::Result;
use tracing::info;

use crate::kernel::EngineKernel;

/// Reclaim stale `processing` jobs; returns how many were reclaimed.
pub async fn sweep(kernel: &EngineKernel) -> Result<u64> {
    let lock_timeout_sec = kernel.config().lock_timeout_sec().await?;
    let reclaimed = kernel.store().reclaim_stale(lock_timeout_sec).await?;

    if reclaimed > 0 {
        info!(
            count = reclaimed,
            lock_timeout_sec, "reclaimed jobs abandoned in processing"
        );
    }

    Ok(reclaimed)
}
