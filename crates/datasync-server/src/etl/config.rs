//! ETL runtime configuration
//!
//! Tunables for the orchestration core, read from `ETL_*` environment
//! variables. The error budget and checkpoint cadence default to 10 each.

use datasync_common::{DatasyncError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::workflow::activity::{ActivityOptions, RetryPolicy};

pub const DEFAULT_ERROR_BUDGET: usize = 10;
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MAX_ROWS_PER_QUERY: usize = 1_000_000;
pub const DEFAULT_STREAM_CHANNEL_CAPACITY: usize = 1024;

/// 30 minutes per table sync attempt
pub const DEFAULT_TABLE_SYNC_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_QUALITY_CHECK_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_RETRY_INITIAL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RETRY_BACKOFF_COEFFICIENT: f64 = 2.0;
pub const DEFAULT_RETRY_MAX_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_SAMPLE_ROWS: usize = 100;
pub const DEFAULT_MAX_VALIDATION_ROWS: usize = 10_000;
pub const DEFAULT_RETAINED_FINISHED_RUNS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Unit failures tolerated before a workflow is forced to `failed`
    pub error_budget: usize,
    /// Persist a checkpoint after this many processed tables
    pub checkpoint_interval: usize,
    pub default_batch_size: usize,
    /// Page size for non-streaming table reads
    pub max_rows_per_query: usize,
    pub stream_channel_capacity: usize,
    pub table_sync_timeout_secs: u64,
    pub discovery_timeout_secs: u64,
    pub quality_check_timeout_secs: u64,
    pub retry_initial_interval_ms: u64,
    pub retry_backoff_coefficient: f64,
    pub retry_max_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub notification_timeout_secs: u64,
    pub max_sample_rows: usize,
    pub max_validation_rows: usize,
    /// Finished runs kept in memory for live queries; older ones are served from the run store
    pub retained_finished_runs: usize,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            error_budget: DEFAULT_ERROR_BUDGET,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_rows_per_query: DEFAULT_MAX_ROWS_PER_QUERY,
            stream_channel_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
            table_sync_timeout_secs: DEFAULT_TABLE_SYNC_TIMEOUT_SECS,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            quality_check_timeout_secs: DEFAULT_QUALITY_CHECK_TIMEOUT_SECS,
            retry_initial_interval_ms: DEFAULT_RETRY_INITIAL_INTERVAL_MS,
            retry_backoff_coefficient: DEFAULT_RETRY_BACKOFF_COEFFICIENT,
            retry_max_interval_ms: DEFAULT_RETRY_MAX_INTERVAL_MS,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            notification_timeout_secs: DEFAULT_NOTIFICATION_TIMEOUT_SECS,
            max_sample_rows: DEFAULT_MAX_SAMPLE_ROWS,
            max_validation_rows: DEFAULT_MAX_VALIDATION_ROWS,
            retained_finished_runs: DEFAULT_RETAINED_FINISHED_RUNS,
        }
    }
}

impl EtlConfig {
    /// Load from `ETL_*` environment variables on top of the defaults
    ///
    /// A variable that is set but does not parse is a configuration error
    /// rather than a silent fallback.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            error_budget: env_or("ETL_ERROR_BUDGET", defaults.error_budget)?,
            checkpoint_interval: env_or("ETL_CHECKPOINT_INTERVAL", defaults.checkpoint_interval)?,
            default_batch_size: env_or("ETL_BATCH_SIZE", defaults.default_batch_size)?,
            max_rows_per_query: env_or("ETL_MAX_ROWS_PER_QUERY", defaults.max_rows_per_query)?,
            stream_channel_capacity: env_or(
                "ETL_STREAM_CHANNEL_CAPACITY",
                defaults.stream_channel_capacity,
            )?,
            table_sync_timeout_secs: env_or(
                "ETL_TABLE_SYNC_TIMEOUT_SECS",
                defaults.table_sync_timeout_secs,
            )?,
            discovery_timeout_secs: env_or(
                "ETL_DISCOVERY_TIMEOUT_SECS",
                defaults.discovery_timeout_secs,
            )?,
            quality_check_timeout_secs: env_or(
                "ETL_QUALITY_CHECK_TIMEOUT_SECS",
                defaults.quality_check_timeout_secs,
            )?,
            retry_initial_interval_ms: env_or(
                "ETL_RETRY_INITIAL_INTERVAL_MS",
                defaults.retry_initial_interval_ms,
            )?,
            retry_backoff_coefficient: env_or(
                "ETL_RETRY_BACKOFF_COEFFICIENT",
                defaults.retry_backoff_coefficient,
            )?,
            retry_max_interval_ms: env_or("ETL_RETRY_MAX_INTERVAL_MS", defaults.retry_max_interval_ms)?,
            retry_max_attempts: env_or("ETL_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            notification_timeout_secs: env_or(
                "ETL_NOTIFICATION_TIMEOUT_SECS",
                defaults.notification_timeout_secs,
            )?,
            max_sample_rows: env_or("ETL_MAX_SAMPLE_ROWS", defaults.max_sample_rows)?,
            max_validation_rows: env_or("ETL_MAX_VALIDATION_ROWS", defaults.max_validation_rows)?,
            retained_finished_runs: env_or(
                "ETL_RETAINED_FINISHED_RUNS",
                defaults.retained_finished_runs,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(DatasyncError::config("ETL_CHECKPOINT_INTERVAL must be greater than 0"));
        }
        if self.default_batch_size == 0 {
            return Err(DatasyncError::config("ETL_BATCH_SIZE must be greater than 0"));
        }
        if self.max_rows_per_query == 0 || self.stream_channel_capacity == 0 {
            return Err(DatasyncError::config(
                "ETL_MAX_ROWS_PER_QUERY and ETL_STREAM_CHANNEL_CAPACITY must be greater than 0",
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(DatasyncError::config("ETL_RETRY_MAX_ATTEMPTS must be at least 1"));
        }
        if self.retry_backoff_coefficient < 1.0 {
            return Err(DatasyncError::config(format!(
                "ETL_RETRY_BACKOFF_COEFFICIENT must be >= 1.0, got {}",
                self.retry_backoff_coefficient
            )));
        }
        if self.retry_initial_interval_ms > self.retry_max_interval_ms {
            return Err(DatasyncError::config(format!(
                "ETL_RETRY_INITIAL_INTERVAL_MS ({}) cannot exceed ETL_RETRY_MAX_INTERVAL_MS ({})",
                self.retry_initial_interval_ms, self.retry_max_interval_ms
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            backoff_coefficient: self.retry_backoff_coefficient,
            max_interval: Duration::from_millis(self.retry_max_interval_ms),
            max_attempts: self.retry_max_attempts,
        }
    }

    pub fn table_sync_activity(&self) -> ActivityOptions {
        ActivityOptions::new(Duration::from_secs(self.table_sync_timeout_secs), self.retry_policy())
    }

    pub fn discovery_activity(&self) -> ActivityOptions {
        ActivityOptions::new(Duration::from_secs(self.discovery_timeout_secs), self.retry_policy())
    }

    pub fn quality_check_activity(&self) -> ActivityOptions {
        ActivityOptions::new(
            Duration::from_secs(self.quality_check_timeout_secs),
            self.retry_policy(),
        )
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DatasyncError::config(format!("{} has an invalid value: {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}
