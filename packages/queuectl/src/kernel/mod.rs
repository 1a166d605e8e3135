//! Engine kernel: ownership of the durable store and the handles the
//! rest of the engine hangs off of.
//!
//! The kernel is a thin, cloneable wrapper around the SQLite pool. All
//! shared mutable state lives in the database; the kernel itself carries
//! no locks, so clones can be handed to every worker.

pub mod jobs;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use jobs::config::ConfigRegistry;
use jobs::store::JobStore;

/// Environment variable overriding the store file location.
pub const STORE_PATH_ENV: &str = "QUEUECTL_DB";

/// File name of the store when no override is given; placed next to the
/// engine binary.
const STORE_FILE_NAME: &str = "queuectl.db";

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Handle to the engine's durable state.
#[derive(Clone)]
pub struct EngineKernel {
    pub db: SqlitePool,
}

impl EngineKernel {
    /// Open (or create) the store file at `path` and bring the schema up
    /// to date.
    ///
    /// WAL mode plus a busy timeout lets several engine processes share
    /// one store file; claim statements stay atomic either way.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open job store at {}", path.display()))?;

        MIGRATOR
            .run(&db)
            .await
            .context("failed to run job store migrations")?;

        Ok(Self { db })
    }

    /// Connect to an arbitrary SQLite URL. Used by tests with
    /// `sqlite::memory:`; a single connection keeps the in-memory
    /// database alive and shared.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid store url {url}"))?
            .create_if_missing(true);

        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to job store {url}"))?;

        MIGRATOR
            .run(&db)
            .await
            .context("failed to run job store migrations")?;

        Ok(Self { db })
    }

    pub fn store(&self) -> JobStore {
        JobStore::new(self.db.clone())
    }

    pub fn config(&self) -> ConfigRegistry {
        ConfigRegistry::new(self.db.clone())
    }
}

/// Resolve the store file location: `QUEUECTL_DB` wins, otherwise the
/// file sits next to the engine binary, falling back to the working
/// directory when the binary path cannot be determined.
pub fn default_store_path() -> PathBuf {
    if let Ok(path) = std::env::var(STORE_PATH_ENV) {
        return PathBuf::from(path);
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(STORE_FILE_NAME)))
        .unwrap_or_else(|| PathBuf::from(STORE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test covers both branches: env mutation cannot race itself.
    #[test]
    fn store_path_resolution() {
        std::env::remove_var(STORE_PATH_ENV);
        assert!(default_store_path().ends_with(STORE_FILE_NAME));

        std::env::set_var(STORE_PATH_ENV, "/tmp/override.db");
        assert_eq!(default_store_path(), PathBuf::from("/tmp/override.db"));
        std::env::remove_var(STORE_PATH_ENV);
    }
}
