//! Catalog discovery: databases, schemas, tables, columns, samples, relationships

pub mod executor;
pub mod inference;
pub mod statistics;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::{EtlError, EtlResult};

pub use executor::DiscoveryExecutor;
pub use inference::{infer_relationships, primary_key_candidates, score_primary_key_candidate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Restrict to these databases
    #[serde(default)]
    pub databases: Option<Vec<String>>,
    /// Restrict to these schemas
    #[serde(default)]
    pub schemas: Option<Vec<String>>,
    #[serde(default = "enabled")]
    pub include_columns: bool,
    #[serde(default = "enabled")]
    pub include_sample_data: bool,
    #[serde(default = "enabled")]
    pub infer_relationships: bool,
    /// Overrides `EtlConfig::max_sample_rows`
    #[serde(default)]
    pub max_sample_rows: Option<usize>,
}

fn enabled() -> bool {
    true
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            databases: None,
            schemas: None,
            include_columns: true,
            include_sample_data: true,
            infer_relationships: true,
            max_sample_rows: None,
        }
    }
}

impl DiscoveryOptions {
    pub fn wants_database(&self, database: &str) -> bool {
        self.databases
            .as_ref()
            .map_or(true, |dbs| dbs.iter().any(|d| d == database))
    }

    pub fn wants_schema(&self, schema: &str) -> bool {
        self.schemas
            .as_ref()
            .map_or(true, |schemas| schemas.iter().any(|s| s == schema))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed,
    Skipped,
}

/// Hooks a unit-by-unit executor reports through
///
/// The workflow implements this to observe signals, keep progress and apply
/// the error budget.
#[async_trait]
pub trait UnitObserver: Send + Sync {
    /// Suspension point before a unit; `Err(Cancelled)` stops the walk
    async fn before_unit(&self, object: &str) -> EtlResult<()>;

    /// Record a failed unit; `Err` when the error budget is exhausted
    async fn unit_failed(&self, object: &str, error: &EtlError) -> EtlResult<()>;

    async fn add_total(&self, units: usize);

    async fn unit_done(&self, outcome: UnitOutcome);
}
