//! The phased workflow state machine
//!
//! `initializing → discovering → syncing → validating → completed|failed`.
//! Each kind walks the subset of phases it needs:
//!
//! - discovery: discovering
//! - sync: discovering, syncing, then validating when a quality config is set
//! - quality: discovering (reusing the stored catalog when there is one), validating
//!
//! Whatever happens inside the phases, including a panic, [`WorkflowRun::execute`]
//! finalizes the run: the connector session is closed once, the end time is
//! stamped, the final status is persisted and the notification is sent.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::activity::run_activity;
use super::context::WorkflowContext;
use super::notification::Notification;
use super::WorkflowInput;
use crate::etl::catalog::{CatalogSnapshot, TableDescriptor};
use crate::etl::checkpoint::Checkpoint;
use crate::etl::config::EtlConfig;
use crate::etl::connector::{Connector, ConnectorRegistry, ConnectorSession};
use crate::etl::discovery::{DiscoveryExecutor, UnitObserver, UnitOutcome};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::quality::{build_report, plan_checks, table_report, QualityConfig, QualityExecutor};
use crate::etl::store::{CatalogStore, CheckpointStore, QualityReportStore, Stores};
use crate::etl::sync::{SyncExecutor, SyncRequest};
use crate::etl::types::{ErrorEntry, Phase, Severity, WorkflowKind, WorkflowStatus};

/// Everything a workflow run needs from its host
pub struct WorkflowDeps {
    pub registry: Arc<ConnectorRegistry>,
    pub stores: Stores,
    pub config: Arc<EtlConfig>,
}

pub(crate) struct WorkflowRun {
    deps: Arc<WorkflowDeps>,
    input: WorkflowInput,
    ctx: WorkflowContext,
    workflow_id: String,
    run_id: Uuid,
}

impl WorkflowRun {
    pub(crate) fn new(deps: Arc<WorkflowDeps>, input: WorkflowInput, ctx: WorkflowContext, run_id: Uuid) -> Self {
        Self {
            workflow_id: input.workflow_id(),
            deps,
            input,
            ctx,
            run_id,
        }
    }

    pub(crate) async fn execute(self) -> WorkflowStatus {
        self.ctx.persist().await;
        info!("workflow started");

        let mut session: Option<ConnectorSession> = None;
        let result = match AssertUnwindSafe(self.drive(&mut session)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(EtlError::Internal(format!(
                "workflow panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        self.finalize(session, result).await
    }

    async fn drive(&self, session: &mut Option<ConnectorSession>) -> EtlResult<()> {
        self.input.validate()?;
        let connector = self.deps.registry.create(&self.input.connection)?;
        let opened = ConnectorSession::open(connector, &self.input.connection.credentials).await?;
        let connector = session.insert(opened).connector();
        debug!(source = connector.kind().as_str(), "connector session opened");

        match self.input.kind {
            WorkflowKind::Discovery => {
                self.ctx.set_phase(Phase::Discovering).await;
                self.discover(connector).await?;
            }
            WorkflowKind::Sync => {
                self.ctx.set_phase(Phase::Discovering).await;
                let snapshot = self.discover(connector).await?;
                self.ctx.set_phase(Phase::Syncing).await;
                let synced = self.sync_tables(connector, &snapshot).await?;
                if let Some(quality) = &self.input.quality {
                    self.ctx.set_phase(Phase::Validating).await;
                    self.assess(connector, &synced, quality).await?;
                }
            }
            WorkflowKind::Quality => {
                self.ctx.set_phase(Phase::Discovering).await;
                let stored = self.deps.stores.catalog.load_snapshot(self.input.connection_id).await?;
                let snapshot = match stored {
                    Some(snapshot) if !snapshot.tables.is_empty() => {
                        debug!(tables = snapshot.tables.len(), "using stored catalog");
                        snapshot
                    }
                    _ => self.discover(connector).await?,
                };
                self.ctx.set_phase(Phase::Validating).await;
                let quality = self.input.quality.clone().unwrap_or_default();
                self.assess(connector, &snapshot.tables, &quality).await?;
            }
        }
        Ok(())
    }

    /// Walk the source and replace the connection's stored catalog
    async fn discover(&self, connector: &dyn Connector) -> EtlResult<CatalogSnapshot> {
        let config = &self.deps.config;
        let executor = DiscoveryExecutor::new(
            config.discovery_activity(),
            self.ctx.control().cancellation_token().clone(),
            config.max_sample_rows,
        );
        let snapshot = executor
            .discover(connector, self.input.connection_id, &self.input.discovery, &self.ctx)
            .await?;
        self.deps.stores.catalog.replace_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    /// Sync every selected table in order, resuming from the stored checkpoint
    ///
    /// Returns the tables that synced, for the validating phase.
    async fn sync_tables(&self, connector: &dyn Connector, snapshot: &CatalogSnapshot) -> EtlResult<Vec<TableDescriptor>> {
        let tables: Vec<&TableDescriptor> = snapshot
            .tables
            .iter()
            .filter(|t| self.input.sync.wants_table(&t.qualified_name()))
            .collect();

        let previous = match self.deps.stores.checkpoints.load(&self.workflow_id).await {
            Ok(previous) => previous,
            Err(err) => {
                warn!(error = %err, "failed to load checkpoint, starting from the first table");
                None
            }
        };
        let mut checkpoint = Checkpoint::resume_from(previous, &self.workflow_id, self.run_id);
        checkpoint.table_index = checkpoint.table_index.min(tables.len());
        let start = checkpoint.table_index;
        if start > 0 {
            info!(table_index = start, total = tables.len(), "resuming from checkpoint");
        }
        self.ctx.begin_units(tables.len(), start).await;

        let mut synced = Vec::new();
        let outcome = self.sync_loop(connector, &tables, &mut checkpoint, &mut synced).await;
        checkpoint.error_count = self.ctx.error_count().await;
        if outcome.is_ok() {
            checkpoint.mark_completed();
        }
        self.save_checkpoint(&checkpoint).await;
        outcome.map(|()| synced)
    }

    async fn sync_loop(
        &self,
        connector: &dyn Connector,
        tables: &[&TableDescriptor],
        checkpoint: &mut Checkpoint,
        synced: &mut Vec<TableDescriptor>,
    ) -> EtlResult<()> {
        let config = &self.deps.config;
        let executor = SyncExecutor::new(self.deps.stores.sink.clone(), config.max_rows_per_query);
        let activity = config.table_sync_activity();
        let cancel = self.ctx.control().cancellation_token().clone();
        let batch_size = self.input.sync.batch_size.unwrap_or(config.default_batch_size);
        let interval = config.checkpoint_interval.max(1);

        for (index, &table) in tables.iter().enumerate().skip(checkpoint.table_index) {
            let object = table.object_name();
            let qualified = table.qualified_name();

            if self.ctx.control().is_paused() {
                checkpoint.advance_to(index);
                checkpoint.error_count = self.ctx.error_count().await;
                self.save_checkpoint(checkpoint).await;
            }
            self.ctx.before_unit(&object).await?;

            let request = SyncRequest {
                connection_id: self.input.connection_id,
                table,
                mode: self.input.sync.mode,
                batch_size,
                cursor: checkpoint.cursor_for(&qualified),
                cursor_column: self.input.sync.cursor_columns.get(&qualified).map(String::as_str),
            };
            let result = run_activity("table sync", &activity, &cancel, || executor.sync_table(connector, request)).await;

            let (outcome, budget) = match result {
                Ok(result) => {
                    info!(
                        table = %qualified,
                        mode = result.mode.as_str(),
                        records = result.records_processed,
                        batches = result.batches,
                        failed_batches = result.errors.len(),
                        "table synced"
                    );
                    self.ctx
                        .add_transfer(result.records_processed, result.bytes_transferred)
                        .await;
                    let budget = match result.errors.first() {
                        Some(first) => {
                            let affected: usize = result.errors.iter().map(|e| e.records_affected).sum();
                            let err = EtlError::storage(format!(
                                "{} of {} batches failed ({} records), first at batch {}: {}",
                                result.errors.len(),
                                result.batches,
                                affected,
                                first.batch_index,
                                first.error
                            ));
                            self.ctx
                                .record_error(ErrorEntry::from_error(&object, &err, Severity::Warning))
                                .await
                        }
                        None => Ok(()),
                    };
                    checkpoint.record_table(&qualified, result.records_processed, result.checkpoint);
                    synced.push(table.clone());
                    (UnitOutcome::Completed, budget)
                }
                Err(EtlError::Cancelled) => return Err(EtlError::Cancelled),
                Err(err) => (UnitOutcome::Skipped, self.ctx.unit_failed(&object, &err).await),
            };

            checkpoint.advance_to(index + 1);
            checkpoint.error_count = self.ctx.error_count().await;
            self.ctx.unit_done(outcome).await;
            if (index + 1) % interval == 0 {
                self.save_checkpoint(checkpoint).await;
            }
            budget?;
        }
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) {
        match self.deps.stores.checkpoints.save(checkpoint).await {
            Ok(()) => debug!(
                table_index = checkpoint.table_index,
                completed = checkpoint.completed,
                "checkpoint saved"
            ),
            Err(err) => warn!(error = %err, table_index = checkpoint.table_index, "failed to save checkpoint"),
        }
    }

    /// Run the configured checks per table and persist the aggregated report
    async fn assess(&self, connector: &dyn Connector, tables: &[TableDescriptor], quality: &QualityConfig) -> EtlResult<()> {
        let tables: Vec<&TableDescriptor> = tables
            .iter()
            .filter(|t| quality.includes_table(&t.qualified_name()))
            .collect();
        self.ctx.begin_units(tables.len(), 0).await;

        let config = &self.deps.config;
        let executor = QualityExecutor::new(config.max_validation_rows);
        let activity = config.quality_check_activity();
        let cancel = self.ctx.control().cancellation_token().clone();
        let mut reports = Vec::with_capacity(tables.len());

        for table in tables {
            self.ctx.before_unit(&table.object_name()).await?;
            let mut results = Vec::new();
            for check in plan_checks(table, quality) {
                let object = check.object_name();
                self.ctx.before_unit(&object).await?;
                let now = Utc::now();
                match run_activity("quality check", &activity, &cancel, || executor.run_check(connector, table, &check, now)).await {
                    Ok(result) => {
                        debug!(check = %object, score = result.score, passed = result.passed, "check evaluated");
                        results.push(result);
                    }
                    Err(EtlError::Cancelled) => return Err(EtlError::Cancelled),
                    Err(err) => {
                        results.push(check.failed_result(&err));
                        self.ctx.unit_failed(&object, &err).await?;
                    }
                }
            }
            reports.push(table_report(table.qualified_name(), results));
            self.ctx.unit_done(UnitOutcome::Completed).await;
        }

        let report = build_report(self.input.connection_id, &self.workflow_id, self.run_id, reports);
        info!(
            overall_score = report.overall_score,
            critical_issues = report.critical_issues,
            warnings = report.warnings,
            tables = report.tables.len(),
            "quality report built"
        );
        self.deps.stores.reports.save_report(&report).await
    }

    async fn finalize(&self, session: Option<ConnectorSession>, result: EtlResult<()>) -> WorkflowStatus {
        if let Some(session) = session {
            if let Err(err) = session.close().await {
                warn!(error = %err, "connector disconnect failed");
            }
        }

        let phase = match &result {
            Ok(()) => Phase::Completed,
            Err(err) => {
                let entry = self.terminal_entry(err);
                error!(error = %entry.message, "workflow failed");
                self.ctx.push_terminal(entry).await;
                Phase::Failed
            }
        };
        self.ctx.finish(phase).await;

        let status = self.ctx.snapshot().await;
        info!(
            phase = status.phase.as_str(),
            processed_tables = status.progress.processed_tables,
            records = status.metrics.records_transferred,
            tables_skipped = status.metrics.tables_skipped,
            errors = status.errors.len(),
            "workflow finished"
        );
        self.notify(&status).await;
        status
    }

    fn terminal_entry(&self, err: &EtlError) -> ErrorEntry {
        let mut entry = ErrorEntry::from_error(&self.workflow_id, err, Severity::Error);
        if matches!(err, EtlError::ErrorBudgetExceeded { .. }) {
            entry.message = match self.input.kind {
                WorkflowKind::Sync => "too many sync errors, aborting".into(),
                _ => "too many errors, aborting".into(),
            };
        }
        entry
    }

    async fn notify(&self, status: &WorkflowStatus) {
        let Some(config) = &self.input.notification else {
            return;
        };
        let notification = Notification::from_status(status);
        let delivered = match config.build(self.deps.config.notification_timeout()) {
            Ok(notifier) => notifier.notify(&notification).await,
            Err(err) => Err(err),
        };
        if let Err(err) = delivered {
            warn!(
                error = %err,
                notification = notification.notification_type.as_str(),
                "failed to deliver notification"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
