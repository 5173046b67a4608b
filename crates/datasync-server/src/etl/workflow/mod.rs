//! Workflow state machine and its in-process runtime
//!
//! A workflow run is started with a [`WorkflowInput`], walks its phases on a
//! single task and answers signals and status queries while it runs.

pub mod activity;
pub mod context;
pub mod control;
pub mod machine;
pub mod notification;
pub mod runtime;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::connector::ConnectionConfig;
use super::discovery::DiscoveryOptions;
use super::error::{EtlError, EtlResult};
use super::quality::QualityConfig;
use super::types::{SyncMode, WorkflowKind};

pub use activity::{run_activity, ActivityOptions, RetryPolicy};
pub use control::{Signal, WorkflowControl};
pub use machine::WorkflowDeps;
pub use notification::{Notification, NotificationConfig, NotificationType, Notifier};
pub use runtime::{WorkflowHandle, WorkflowRuntime};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    #[serde(default)]
    pub mode: SyncMode,
    /// Rows per batch; `EtlConfig::default_batch_size` when unset
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Restrict to these `schema.table` names
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    /// Cursor column overrides per `schema.table`
    #[serde(default)]
    pub cursor_columns: BTreeMap<String, String>,
}

impl SyncOptions {
    pub fn wants_table(&self, qualified: &str) -> bool {
        self.tables
            .as_ref()
            .map_or(true, |tables| tables.iter().any(|t| t == qualified))
    }
}

/// Parameters a workflow run is started with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInput {
    /// Defaults to `{kind}-{connection_id}`
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub connection_id: Uuid,
    pub kind: WorkflowKind,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryOptions,
    #[serde(default)]
    pub sync: SyncOptions,
    /// Quality workflows fall back to the defaults; sync workflows validate only when set
    #[serde(default)]
    pub quality: Option<QualityConfig>,
    #[serde(default)]
    pub notification: Option<NotificationConfig>,
}

impl WorkflowInput {
    pub fn new(kind: WorkflowKind, connection_id: Uuid, connection: ConnectionConfig) -> Self {
        Self {
            workflow_id: None,
            connection_id,
            kind,
            connection,
            discovery: DiscoveryOptions::default(),
            sync: SyncOptions::default(),
            quality: None,
            notification: None,
        }
    }

    pub fn workflow_id(&self) -> String {
        match &self.workflow_id {
            Some(id) => id.clone(),
            None => format!("{}-{}", self.kind, self.connection_id),
        }
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.workflow_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(EtlError::validation("workflow_id cannot be empty"));
        }
        if self.sync.batch_size == Some(0) {
            return Err(EtlError::validation("batch_size must be greater than 0"));
        }
        if self.discovery.max_sample_rows == Some(0) && self.discovery.include_sample_data {
            return Err(EtlError::validation(
                "max_sample_rows must be greater than 0 when sampling is enabled",
            ));
        }
        if let Some(quality) = &self.quality {
            quality.validate()?;
        }
        if let Some(notification) = &self.notification {
            notification.validate()?;
        }
        Ok(())
    }
}
