//! Configuration management
//!
//! Values come from the process environment (after `.env` is merged in by
//! `dotenvy`). Every numeric setting is validated as a finite, non-negative
//! number before the worker touches the database. Durations must also be
//! whole and no longer than 30 days. A bad value is a fatal startup error.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::queue::RetryPolicy;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 2_000;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
pub const DEFAULT_NORMALIZE_BATCH_SIZE: u32 = 10;

/// Fixed delay before a failed normalization is retried (5 minutes).
pub const DEFAULT_NORMALIZE_RETRY_DELAY_MS: u64 = 300_000;

/// Pause after an iteration aborted because the store was unreachable.
pub const DEFAULT_LOOP_ERROR_PAUSE_MS: u64 = 10_000;

/// Upper bound for every duration setting (30 days)
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;
pub const MAX_DURATION_MS: u64 = MAX_DURATION_SECS * 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub normalize: NormalizeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Polling behaviour shared by both stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Inbox events claimed per iteration
    pub batch_size: u32,
    pub poll_interval_ms: u64,
    pub loop_error_pause_ms: u64,
    /// Claims older than this are swept back to retryable; 0 disables the sweep
    pub lease_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    pub batch_size: u32,
    pub retry_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> WorkerResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> WorkerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| WorkerError::config("DATABASE_URL not set"))?;

        let config = Config {
            database: DatabaseConfig {
                url,
                max_connections: count(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                min_connections: count(&lookup, "DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS)?,
                connect_timeout_secs: amount(&lookup, "DATABASE_CONNECT_TIMEOUT", DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS, MAX_DURATION_SECS)?,
            },
            queue: QueueConfig {
                batch_size: count(&lookup, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                poll_interval_ms: amount(&lookup, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS, MAX_DURATION_MS)?,
                loop_error_pause_ms: amount(&lookup, "LOOP_ERROR_PAUSE_MS", DEFAULT_LOOP_ERROR_PAUSE_MS, MAX_DURATION_MS)?,
                lease_timeout_secs: amount(&lookup, "LEASE_TIMEOUT_SECS", 0, MAX_DURATION_SECS)?,
            },
            retry: RetryConfig {
                max_attempts: count(&lookup, "MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                base_backoff_ms: amount(&lookup, "BASE_BACKOFF_MS", DEFAULT_BASE_BACKOFF_MS, MAX_DURATION_MS)?,
                max_backoff_ms: amount(&lookup, "MAX_BACKOFF_MS", DEFAULT_MAX_BACKOFF_MS, MAX_DURATION_MS)?,
            },
            normalize: NormalizeConfig {
                batch_size: count(&lookup, "NORMALIZE_BATCH_SIZE", DEFAULT_NORMALIZE_BATCH_SIZE)?,
                retry_delay_ms: amount(&lookup, "NORMALIZE_RETRY_DELAY_MS", DEFAULT_NORMALIZE_RETRY_DELAY_MS, MAX_DURATION_MS)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> WorkerResult<()> {
        if self.database.max_connections == 0 {
            return Err(WorkerError::config("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(WorkerError::config(format!(
                "DATABASE_MIN_CONNECTIONS ({}) cannot be greater than DATABASE_MAX_CONNECTIONS ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.queue.batch_size == 0 {
            return Err(WorkerError::config("BATCH_SIZE must be at least 1"));
        }

        if self.normalize.batch_size == 0 {
            return Err(WorkerError::config("NORMALIZE_BATCH_SIZE must be at least 1"));
        }

        if self.retry.max_attempts == 0 {
            return Err(WorkerError::config("MAX_ATTEMPTS must be at least 1"));
        }

        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(WorkerError::config(format!(
                "BASE_BACKOFF_MS ({}) cannot exceed MAX_BACKOFF_MS ({})",
                self.retry.base_backoff_ms, self.retry.max_backoff_ms
            )));
        }

        Ok(())
    }

    /// Exponential policy for inbox events
    pub fn ingest_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            Duration::from_millis(self.retry.base_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
            self.retry.max_attempts,
        )
    }

    /// Fixed-delay policy for raw snapshots; normalization never dead-letters
    pub fn normalize_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(self.normalize.retry_delay_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    pub fn loop_error_pause(&self) -> Duration {
        Duration::from_millis(self.queue.loop_error_pause_ms)
    }

    pub fn lease_timeout(&self) -> Option<Duration> {
        (self.queue.lease_timeout_secs > 0).then(|| Duration::from_secs(self.queue.lease_timeout_secs))
    }
}

/// Parse a variable as a finite, non-negative number
fn number<F>(lookup: &F, name: &str) -> WorkerResult<Option<f64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    let value: f64 = raw
        .parse()
        .map_err(|_| WorkerError::config(format!("Invalid number env var: {}={}", name, raw)))?;

    if !value.is_finite() || value < 0.0 {
        return Err(WorkerError::config(format!(
            "{} must be a finite, non-negative number (got {})",
            name, raw
        )));
    }

    Ok(Some(value))
}

fn count<F>(lookup: &F, name: &str, default: u32) -> WorkerResult<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match number(lookup, name)? {
        None => Ok(default),
        Some(v) if v.fract() == 0.0 && v <= f64::from(u32::MAX) => Ok(v as u32),
        Some(v) => Err(WorkerError::config(format!("{} must be a whole number (got {})", name, v))),
    }
}

/// Durations in whole units, at most `max`
fn amount<F>(lookup: &F, name: &str, default: u64, max: u64) -> WorkerResult<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match number(lookup, name)? {
        None => Ok(default),
        Some(v) if v.fract() != 0.0 => Err(WorkerError::config(format!(
            "{} must be a whole number (got {})",
            name, v
        ))),
        Some(v) if v > max as f64 => Err(WorkerError::config(format!(
            "{} must be at most {} (got {})",
            name, max, v
        ))),
        Some(v) => Ok(v as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> WorkerResult<Config> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgresql://localhost/salesync")]).unwrap();
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.poll_interval_ms, 2_000);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_backoff_ms, 2_000);
        assert_eq!(config.retry.max_backoff_ms, 60_000);
        assert_eq!(config.normalize.retry_delay_ms, 300_000);
        assert!(config.lease_timeout().is_none());
    }

    #[test]
    fn test_missing_database_url() {
        assert!(matches!(load(&[]), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_rejects_non_numeric() {
        let result = load(&[("DATABASE_URL", "postgresql://x"), ("BATCH_SIZE", "ten")]);
        assert!(matches!(result, Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_rejects_negative_and_infinite() {
        let negative = load(&[("DATABASE_URL", "postgresql://x"), ("POLL_INTERVAL_MS", "-5")]);
        assert!(negative.is_err());
        let infinite = load(&[("DATABASE_URL", "postgresql://x"), ("MAX_BACKOFF_MS", "inf")]);
        assert!(infinite.is_err());
        let nan = load(&[("DATABASE_URL", "postgresql://x"), ("BASE_BACKOFF_MS", "NaN")]);
        assert!(nan.is_err());
    }

    #[test]
    fn test_rejects_fractional_counts() {
        let result = load(&[("DATABASE_URL", "postgresql://x"), ("MAX_ATTEMPTS", "2.5")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_fractional_durations() {
        let result = load(&[("DATABASE_URL", "postgresql://x"), ("POLL_INTERVAL_MS", "1500.5")]);
        assert!(matches!(result, Err(WorkerError::Config(_))));
        let result = load(&[("DATABASE_URL", "postgresql://x"), ("LEASE_TIMEOUT_SECS", "0.5")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_durations_above_ceiling() {
        let result = load(&[
            ("DATABASE_URL", "postgresql://x"),
            ("BASE_BACKOFF_MS", "1000"),
            ("MAX_BACKOFF_MS", "1e300"),
        ]);
        assert!(matches!(result, Err(WorkerError::Config(_))));

        let result = load(&[("DATABASE_URL", "postgresql://x"), ("NORMALIZE_RETRY_DELAY_MS", "1e15")]);
        assert!(result.is_err());

        let result = load(&[("DATABASE_URL", "postgresql://x"), ("LEASE_TIMEOUT_SECS", "9999999999")]);
        assert!(result.is_err());

        let ceiling = MAX_DURATION_MS.to_string();
        let config = load(&[
            ("DATABASE_URL", "postgresql://x"),
            ("MAX_BACKOFF_MS", ceiling.as_str()),
        ])
        .unwrap();
        assert_eq!(config.retry.max_backoff_ms, MAX_DURATION_MS);
    }

    #[test]
    fn test_rejects_zero_batch() {
        let result = load(&[("DATABASE_URL", "postgresql://x"), ("NORMALIZE_BATCH_SIZE", "0")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_base_above_cap() {
        let result = load(&[
            ("DATABASE_URL", "postgresql://x"),
            ("BASE_BACKOFF_MS", "90000"),
            ("MAX_BACKOFF_MS", "60000"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_and_lease() {
        let config = load(&[
            ("DATABASE_URL", "postgresql://x"),
            ("BATCH_SIZE", "25"),
            ("LEASE_TIMEOUT_SECS", "600"),
        ])
        .unwrap();
        assert_eq!(config.queue.batch_size, 25);
        assert_eq!(config.lease_timeout(), Some(Duration::from_secs(600)));
    }
}
