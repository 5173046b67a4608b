//! In-process workflow runtime
//!
//! Starts each run on its own task inside a `workflow` span, routes signals to
//! it and answers status queries from its live state. A workflow id can have
//! at most one active run, so a connection's session is never shared between
//! concurrent runs of the same workflow. Only the most recently finished runs
//! keep their handles; older ones are answered from the [`RunStore`].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use super::context::WorkflowContext;
use super::control::{Signal, WorkflowControl};
use super::machine::{WorkflowDeps, WorkflowRun};
use super::WorkflowInput;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::store::RunStore;
use crate::etl::types::WorkflowStatus;

/// Handle to one started run
#[derive(Clone)]
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub run_id: Uuid,
    control: WorkflowControl,
    status: Arc<RwLock<WorkflowStatus>>,
    done: watch::Receiver<bool>,
}

impl WorkflowHandle {
    pub async fn status(&self) -> WorkflowStatus {
        self.status.read().await.clone()
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }

    /// Deliver a signal; the run observes it at its next suspension point
    pub async fn signal(&self, signal: Signal) -> EtlResult<()> {
        if self.is_finished() {
            return Err(EtlError::validation(format!(
                "workflow {} is not running",
                self.workflow_id
            )));
        }
        info!(workflow_id = %self.workflow_id, signal = signal.as_str(), "signal received");
        self.control.signal(signal);
        match signal {
            Signal::Pause => self.status.write().await.paused = true,
            Signal::Resume => self.status.write().await.paused = false,
            Signal::Cancel => {}
        }
        Ok(())
    }

    /// Wait for the run to finish and return its final status
    pub async fn wait(&self) -> WorkflowStatus {
        let mut done = self.done.clone();
        // An Err here means the task is gone, so the status is already final
        let _ = done.wait_for(|finished| *finished).await;
        self.status().await
    }
}

pub struct WorkflowRuntime {
    deps: Arc<WorkflowDeps>,
    workflows: Mutex<HashMap<String, WorkflowHandle>>,
}

impl WorkflowRuntime {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self {
            deps: Arc::new(deps),
            workflows: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }

    /// Validate the input and start a run
    ///
    /// Fails with `AlreadyRunning` while a previous run of the same workflow
    /// id is still active.
    pub async fn start(&self, input: WorkflowInput) -> EtlResult<WorkflowHandle> {
        input.validate()?;
        let workflow_id = input.workflow_id();

        let mut workflows = self.workflows.lock().await;
        if workflows.get(&workflow_id).is_some_and(|h| !h.is_finished()) {
            return Err(EtlError::AlreadyRunning(workflow_id));
        }
        compact_finished(&mut workflows, self.deps.config.retained_finished_runs).await;

        let run_id = Uuid::new_v4();
        let status = Arc::new(RwLock::new(WorkflowStatus::new(
            workflow_id.clone(),
            run_id,
            input.connection_id,
            input.kind,
        )));
        let control = WorkflowControl::new();
        let (done_tx, done_rx) = watch::channel(false);
        let ctx = WorkflowContext::new(
            status.clone(),
            control.clone(),
            self.deps.config.error_budget,
            self.deps.stores.runs.clone(),
        );

        let span = info_span!(
            "workflow",
            workflow_id = %workflow_id,
            run_id = %run_id,
            connection_id = %input.connection_id,
            kind = %input.kind,
        );
        let run = WorkflowRun::new(self.deps.clone(), input, ctx, run_id);
        tokio::spawn(
            async move {
                run.execute().await;
                done_tx.send_replace(true);
            }
            .instrument(span),
        );

        let handle = WorkflowHandle {
            workflow_id: workflow_id.clone(),
            run_id,
            control,
            status,
            done: done_rx,
        };
        workflows.insert(workflow_id, handle.clone());
        Ok(handle)
    }

    pub async fn handle(&self, workflow_id: &str) -> Option<WorkflowHandle> {
        self.workflows.lock().await.get(workflow_id).cloned()
    }

    pub async fn signal(&self, workflow_id: &str, signal: Signal) -> EtlResult<()> {
        let handle = self
            .handle(workflow_id)
            .await
            .ok_or_else(|| EtlError::NotFound(format!("workflow {}", workflow_id)))?;
        handle.signal(signal).await
    }

    /// Live status of a run started here, else the last persisted one
    pub async fn status(&self, workflow_id: &str) -> EtlResult<WorkflowStatus> {
        if let Some(handle) = self.handle(workflow_id).await {
            return Ok(handle.status().await);
        }
        self.deps
            .stores
            .runs
            .load_status(workflow_id)
            .await?
            .ok_or_else(|| EtlError::NotFound(format!("workflow {}", workflow_id)))
    }

    /// Runs started by this runtime, newest first
    pub async fn list(&self) -> Vec<WorkflowStatus> {
        let handles: Vec<WorkflowHandle> = self.workflows.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.status().await);
        }
        statuses.sort_by(|a, b| b.metrics.start_time.cmp(&a.metrics.start_time));
        statuses
    }

    pub async fn wait(&self, workflow_id: &str) -> EtlResult<WorkflowStatus> {
        let handle = self
            .handle(workflow_id)
            .await
            .ok_or_else(|| EtlError::NotFound(format!("workflow {}", workflow_id)))?;
        Ok(handle.wait().await)
    }

    /// Cancel every active run, for shutdown
    pub async fn cancel_all(&self) {
        for handle in self.workflows.lock().await.values() {
            if !handle.is_finished() {
                handle.control.signal(Signal::Cancel);
            }
        }
    }
}

/// Drop all but the `keep` most recently finished handles
///
/// A finished run persisted its final status before its handle reported
/// done, so dropped runs stay queryable through the run store.
async fn compact_finished(workflows: &mut HashMap<String, WorkflowHandle>, keep: usize) {
    let mut finished = Vec::new();
    for (id, handle) in workflows.iter() {
        if handle.is_finished() {
            finished.push((handle.status().await.metrics.end_time, id.clone()));
        }
    }
    if finished.len() <= keep {
        return;
    }
    finished.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, id) in finished.split_off(keep) {
        debug!(workflow_id = %id, "dropping finished run handle");
        workflows.remove(&id);
    }
}
