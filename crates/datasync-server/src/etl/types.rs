//! Core workflow types: kinds, phases, progress, error log and metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ErrorKind, EtlError};

/// Which executor chain a workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Discovery,
    Sync,
    Quality,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowKind::Discovery => "discovery",
            WorkflowKind::Sync => "sync",
            WorkflowKind::Quality => "quality",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(WorkflowKind::Discovery),
            "sync" => Ok(WorkflowKind::Sync),
            "quality" => Ok(WorkflowKind::Quality),
            other => Err(EtlError::validation(format!("unknown workflow kind: {}", other))),
        }
    }
}

/// Workflow state machine phase
///
/// `initializing → discovering → syncing → validating → completed|failed`.
/// Pausing is orthogonal and tracked on [`WorkflowStatus::paused`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Discovering,
    Syncing,
    Validating,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Discovering => "discovering",
            Phase::Syncing => "syncing",
            Phase::Validating => "validating",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Phase::Initializing),
            "discovering" => Ok(Phase::Discovering),
            "syncing" => Ok(Phase::Syncing),
            "validating" => Ok(Phase::Validating),
            "completed" => Ok(Phase::Completed),
            "failed" => Ok(Phase::Failed),
            other => Err(EtlError::validation(format!("unknown phase: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    Incremental,
    Snapshot,
}

impl SyncMode {
    pub fn as_str(&self) -> &str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_tables: usize,
    pub processed_tables: usize,
    pub records_processed: u64,
    pub current_object: Option<String>,
}

impl Progress {
    /// Get completion percentage (0-100)
    pub fn percentage(&self) -> f64 {
        if self.total_tables == 0 {
            return 0.0;
        }
        (self.processed_tables as f64 / self.total_tables as f64) * 100.0
    }
}

/// One entry in a workflow's error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Qualified name of the failing object (table, column, check)
    pub object: String,
    pub message: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn from_error(object: impl Into<String>, error: &EtlError, severity: Severity) -> Self {
        Self {
            object: object.into(),
            message: error.to_string(),
            kind: error.kind(),
            severity,
            retryable: error.is_retryable(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub records_transferred: u64,
    pub bytes_transferred: u64,
    pub tables_skipped: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Metrics {
    pub fn started_at(start_time: DateTime<Utc>) -> Self {
        Self {
            records_transferred: 0,
            bytes_transferred: 0,
            tables_skipped: 0,
            start_time,
            end_time: None,
        }
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_seconds())
    }
}

/// Snapshot of a workflow run, answered by status queries and persisted per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub run_id: Uuid,
    pub connection_id: Uuid,
    pub kind: WorkflowKind,
    pub phase: Phase,
    pub paused: bool,
    pub progress: Progress,
    pub errors: Vec<ErrorEntry>,
    pub metrics: Metrics,
}

impl WorkflowStatus {
    pub fn new(workflow_id: String, run_id: Uuid, connection_id: Uuid, kind: WorkflowKind) -> Self {
        Self {
            workflow_id,
            run_id,
            connection_id,
            kind,
            phase: Phase::Initializing,
            paused: false,
            progress: Progress::default(),
            errors: Vec::new(),
            metrics: Metrics::started_at(Utc::now()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}
