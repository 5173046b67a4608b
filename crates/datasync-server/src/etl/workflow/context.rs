//! Live state of one workflow run
//!
//! The context owns the run's [`WorkflowStatus`] behind a lock, so status
//! queries read a consistent snapshot while the run mutates it. It is also the
//! [`UnitObserver`] the executors report through: suspension points, progress
//! and the error budget all live here.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::control::WorkflowControl;
use crate::etl::discovery::{UnitObserver, UnitOutcome};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::store::RunStore;
use crate::etl::types::{ErrorEntry, Phase, Severity, WorkflowStatus};

pub struct WorkflowContext {
    status: Arc<RwLock<WorkflowStatus>>,
    control: WorkflowControl,
    error_budget: usize,
    runs: Arc<dyn RunStore>,
    /// Objects counted in `tables_skipped`, so a table failing in two phases counts once
    skipped: Mutex<HashSet<String>>,
}

impl WorkflowContext {
    pub fn new(
        status: Arc<RwLock<WorkflowStatus>>,
        control: WorkflowControl,
        error_budget: usize,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            status,
            control,
            error_budget,
            runs,
            skipped: Mutex::new(HashSet::new()),
        }
    }

    pub fn control(&self) -> &WorkflowControl {
        &self.control
    }

    pub async fn snapshot(&self) -> WorkflowStatus {
        self.status.read().await.clone()
    }

    /// Write the current status to the run store; failures are logged only
    pub async fn persist(&self) {
        let status = self.snapshot().await;
        if let Err(err) = self.runs.save_status(&status).await {
            warn!(error = %err, "failed to persist workflow status");
        }
    }

    pub async fn set_phase(&self, phase: Phase) {
        {
            let mut status = self.status.write().await;
            if status.phase == phase {
                return;
            }
            info!(from = status.phase.as_str(), to = phase.as_str(), "phase transition");
            status.phase = phase;
        }
        self.persist().await;
    }

    /// Reset progress for a phase that walks `total` units, `done` of them already finished
    pub async fn begin_units(&self, total: usize, done: usize) {
        let mut status = self.status.write().await;
        status.progress.total_tables = total;
        status.progress.processed_tables = done.min(total);
        status.progress.current_object = None;
    }

    pub async fn add_transfer(&self, records: u64, bytes: u64) {
        let mut status = self.status.write().await;
        status.progress.records_processed += records;
        status.metrics.records_transferred += records;
        status.metrics.bytes_transferred += bytes;
    }

    pub async fn error_count(&self) -> usize {
        self.status.read().await.errors.len()
    }

    /// Append to the error log; `Err` once the log outgrows the budget
    pub async fn record_error(&self, entry: ErrorEntry) -> EtlResult<()> {
        warn!(
            object = %entry.object,
            severity = entry.severity.as_str(),
            retryable = entry.retryable,
            error = %entry.message,
            "unit failed"
        );
        let mut status = self.status.write().await;
        status.errors.push(entry);
        let errors = status.errors.len();
        if errors > self.error_budget {
            return Err(EtlError::ErrorBudgetExceeded {
                errors,
                budget: self.error_budget,
            });
        }
        Ok(())
    }

    /// Final entry explaining why the run failed; never counted against the budget
    pub async fn push_terminal(&self, entry: ErrorEntry) {
        self.status.write().await.errors.push(entry);
    }

    /// Stamp the end time and enter a terminal phase
    pub async fn finish(&self, phase: Phase) {
        {
            let mut status = self.status.write().await;
            status.metrics.end_time = Some(Utc::now());
            status.paused = false;
            status.progress.current_object = None;
        }
        self.set_phase(phase).await;
    }

    async fn set_paused(&self, paused: bool) {
        self.status.write().await.paused = paused;
    }
}

#[async_trait]
impl UnitObserver for WorkflowContext {
    async fn before_unit(&self, object: &str) -> EtlResult<()> {
        if self.control.is_paused() && !self.control.is_cancelled() {
            info!(next = object, "paused, waiting for resume");
            self.set_paused(true).await;
            self.persist().await;
        }
        let waited = self.control.wait_if_paused().await;
        self.set_paused(false).await;
        waited?;
        self.status.write().await.progress.current_object = Some(object.to_string());
        Ok(())
    }

    async fn unit_failed(&self, object: &str, error: &EtlError) -> EtlResult<()> {
        self.record_error(ErrorEntry::from_error(object, error, Severity::Error))
            .await
    }

    async fn add_total(&self, units: usize) {
        self.status.write().await.progress.total_tables += units;
    }

    async fn unit_done(&self, outcome: UnitOutcome) {
        let mut status = self.status.write().await;
        let progress = &mut status.progress;
        progress.processed_tables = (progress.processed_tables + 1).min(progress.total_tables);
        if outcome == UnitOutcome::Skipped {
            if let Some(object) = progress.current_object.clone() {
                let mut skipped = self.skipped.lock().await;
                skipped.insert(object);
                status.metrics.tables_skipped = skipped.len();
            }
        }
    }
}
