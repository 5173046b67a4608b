//! Persistence seams for the orchestration core
//!
//! Each workflow instance owns a disjoint key space (its workflow id, its
//! connection id), so implementations need to tolerate concurrent writers for
//! different keys but no cross-instance locking.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::catalog::{CatalogSnapshot, TableDescriptor};
use super::checkpoint::Checkpoint;
use super::connector::Row;
use super::error::EtlResult;
use super::quality::QualityReport;
use super::types::WorkflowStatus;
use super::values::value_key;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, workflow_id: &str) -> EtlResult<Option<Checkpoint>>;

    /// Upsert; within one run the stored `table_index` never decreases
    async fn save(&self, checkpoint: &Checkpoint) -> EtlResult<()>;

    async fn clear(&self, workflow_id: &str) -> EtlResult<()>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Replace the connection's whole discovered snapshot
    async fn replace_snapshot(&self, snapshot: &CatalogSnapshot) -> EtlResult<()>;

    async fn load_snapshot(&self, connection_id: Uuid) -> EtlResult<Option<CatalogSnapshot>>;
}

#[async_trait]
pub trait QualityReportStore: Send + Sync {
    async fn save_report(&self, report: &QualityReport) -> EtlResult<()>;

    async fn latest_report(&self, connection_id: Uuid) -> EtlResult<Option<QualityReport>>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_status(&self, status: &WorkflowStatus) -> EtlResult<()>;

    /// Most recent run of a workflow id
    async fn load_status(&self, workflow_id: &str) -> EtlResult<Option<WorkflowStatus>>;

    /// Most recent runs across all workflows, newest first
    async fn list_runs(&self, limit: usize) -> EtlResult<Vec<WorkflowStatus>>;
}

/// Target storage receiving synchronized batches
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write one batch; returns the number of rows written
    ///
    /// Delivery is at-least-once, so writes must be idempotent upserts.
    async fn write_batch(&self, connection_id: Uuid, table: &TableDescriptor, rows: &[Row]) -> EtlResult<u64>;
}

/// The set of stores a workflow runtime writes to
#[derive(Clone)]
pub struct Stores {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub reports: Arc<dyn QualityReportStore>,
    pub runs: Arc<dyn RunStore>,
    pub sink: Arc<dyn RecordSink>,
}

impl Stores {
    /// Everything backed by one in-process [`MemoryStore`]
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Self::from_shared(store.clone()), store)
    }

    /// Everything backed by PostgreSQL
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::from_shared(Arc::new(PgStore::new(pool)))
    }

    fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: CheckpointStore + CatalogStore + QualityReportStore + RunStore + RecordSink + 'static,
    {
        Self {
            checkpoints: store.clone(),
            catalog: store.clone(),
            reports: store.clone(),
            runs: store.clone(),
            sink: store,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// Idempotency key for a synchronized row
///
/// Primary-key values joined with `|` when the table has a key and every key
/// value is present; otherwise the SHA-256 of the row's JSON.
pub fn record_key(key_columns: &[String], row: &Row) -> String {
    if !key_columns.is_empty() {
        let values: Option<Vec<String>> = key_columns
            .iter()
            .map(|col| row.get(col).filter(|v| !v.is_null()).map(value_key))
            .collect();
        if let Some(values) = values {
            return values.join("|");
        }
    }
    let payload = serde_json::Value::Object(row.clone()).to_string();
    format!("sha256:{:x}", Sha256::digest(payload.as_bytes()))
}
