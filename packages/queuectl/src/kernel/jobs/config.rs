//! Engine settings stored in the `meta` key/value table.
//!
//! Values are strings end to end; typed readers parse on the way out and
//! fall back to documented defaults on malformed input. A bad value must
//! never take a worker down.

use anyhow::Result;
use sqlx::SqlitePool;

/// Base `b` in the retry delay `b ^ attempts` (seconds).
pub const BACKOFF_BASE: &str = "backoff_base";
/// Seconds of inactivity after which a `processing` job is presumed
/// crashed and reclaimed by the recovery sweep.
pub const LOCK_TIMEOUT: &str = "lock_timeout";
/// When "1", live workers exit after finishing their current job.
pub const STOP_WORKERS: &str = "stop_workers";

pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;
pub const DEFAULT_LOCK_TIMEOUT_SEC: i64 = 3600;

/// Typed accessors over the `meta` table.
#[derive(Clone)]
pub struct ConfigRegistry {
    db: SqlitePool,
}

impl ConfigRegistry {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;

        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO meta (key, value)
            VALUES (?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Backoff base, read fresh so retries pick up live tuning.
    pub async fn backoff_base(&self) -> Result<f64> {
        Ok(parse_backoff_base(self.get(BACKOFF_BASE).await?.as_deref()))
    }

    pub async fn lock_timeout_sec(&self) -> Result<i64> {
        Ok(parse_lock_timeout(self.get(LOCK_TIMEOUT).await?.as_deref()))
    }

    pub async fn stop_requested(&self) -> Result<bool> {
        Ok(self.get(STOP_WORKERS).await?.as_deref() == Some("1"))
    }
}

/// Positive finite number, else the default of 2.
fn parse_backoff_base(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|b| b.is_finite() && *b > 0.0)
        .unwrap_or(DEFAULT_BACKOFF_BASE)
}

/// Positive integer seconds, else the default of 3600.
fn parse_lock_timeout(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_LOCK_TIMEOUT_SEC)
}
