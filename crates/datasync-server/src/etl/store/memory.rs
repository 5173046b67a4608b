//! In-process store implementing every persistence seam
//!
//! Used by tests and by servers started without a database. Keeps a history
//! of checkpoint writes so resumption behaviour can be inspected.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{record_key, CatalogStore, CheckpointStore, QualityReportStore, RecordSink, RunStore};
use crate::etl::catalog::{CatalogSnapshot, TableDescriptor};
use crate::etl::checkpoint::Checkpoint;
use crate::etl::connector::Row;
use crate::etl::error::EtlResult;
use crate::etl::quality::QualityReport;
use crate::etl::types::WorkflowStatus;

#[derive(Default)]
pub struct MemoryStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
    checkpoint_writes: RwLock<Vec<Checkpoint>>,
    catalogs: RwLock<HashMap<Uuid, CatalogSnapshot>>,
    reports: RwLock<HashMap<Uuid, Vec<QualityReport>>>,
    runs: RwLock<Vec<WorkflowStatus>>,
    records: RwLock<HashMap<(Uuid, String), BTreeMap<String, Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every checkpoint accepted by `save`, in write order
    pub async fn checkpoint_writes(&self) -> Vec<Checkpoint> {
        self.checkpoint_writes.read().await.clone()
    }

    /// Rows stored for `schema.table`, ordered by record key
    pub async fn records(&self, connection_id: Uuid, table: &str) -> Vec<Row> {
        self.records
            .read()
            .await
            .get(&(connection_id, table.to_string()))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn record_count(&self, connection_id: Uuid, table: &str) -> usize {
        self.records
            .read()
            .await
            .get(&(connection_id, table.to_string()))
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, workflow_id: &str) -> EtlResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(workflow_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> EtlResult<()> {
        let mut checkpoints = self.checkpoints.write().await;
        let mut stored = checkpoint.clone();
        if let Some(existing) = checkpoints.get(&checkpoint.workflow_id) {
            if existing.run_id == checkpoint.run_id {
                stored.table_index = stored.table_index.max(existing.table_index);
            }
        }
        self.checkpoint_writes.write().await.push(stored.clone());
        checkpoints.insert(stored.workflow_id.clone(), stored);
        Ok(())
    }

    async fn clear(&self, workflow_id: &str) -> EtlResult<()> {
        self.checkpoints.write().await.remove(workflow_id);
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn replace_snapshot(&self, snapshot: &CatalogSnapshot) -> EtlResult<()> {
        self.catalogs
            .write()
            .await
            .insert(snapshot.connection_id, snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, connection_id: Uuid) -> EtlResult<Option<CatalogSnapshot>> {
        Ok(self.catalogs.read().await.get(&connection_id).cloned())
    }
}

#[async_trait]
impl QualityReportStore for MemoryStore {
    async fn save_report(&self, report: &QualityReport) -> EtlResult<()> {
        self.reports
            .write()
            .await
            .entry(report.connection_id)
            .or_default()
            .push(report.clone());
        Ok(())
    }

    async fn latest_report(&self, connection_id: Uuid) -> EtlResult<Option<QualityReport>> {
        Ok(self
            .reports
            .read()
            .await
            .get(&connection_id)
            .and_then(|reports| reports.last().cloned()))
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_status(&self, status: &WorkflowStatus) -> EtlResult<()> {
        let mut runs = self.runs.write().await;
        match runs.iter_mut().find(|r| r.run_id == status.run_id) {
            Some(existing) => *existing = status.clone(),
            None => runs.push(status.clone()),
        }
        Ok(())
    }

    async fn load_status(&self, workflow_id: &str) -> EtlResult<Option<WorkflowStatus>> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .max_by_key(|r| r.metrics.start_time)
            .cloned())
    }

    async fn list_runs(&self, limit: usize) -> EtlResult<Vec<WorkflowStatus>> {
        let mut runs = self.runs.read().await.clone();
        runs.sort_by(|a, b| b.metrics.start_time.cmp(&a.metrics.start_time));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[async_trait]
impl RecordSink for MemoryStore {
    async fn write_batch(&self, connection_id: Uuid, table: &TableDescriptor, rows: &[Row]) -> EtlResult<u64> {
        let keys = table.key_columns();
        let mut records = self.records.write().await;
        let stored = records
            .entry((connection_id, table.qualified_name()))
            .or_default();
        for row in rows {
            stored.insert(record_key(&keys, row), row.clone());
        }
        Ok(rows.len() as u64)
    }
}
