//! API request and response types
//!
//! Mirrors the server's JSON. Only the fields the CLI shows are typed; the
//! `--json` output passes the payload through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Error payload returned with non-2xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub active_workflows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalAccepted {
    pub workflow_id: String,
    pub signal: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total_tables: usize,
    pub processed_tables: usize,
    pub records_processed: u64,
    pub current_object: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub object: String,
    pub message: String,
    pub severity: String,
    #[serde(default)]
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub records_transferred: u64,
    pub bytes_transferred: u64,
    pub tables_skipped: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub run_id: String,
    pub connection_id: String,
    pub kind: String,
    pub phase: String,
    pub paused: bool,
    pub progress: Progress,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    pub metrics: Metrics,
}

impl WorkflowStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self.phase.as_str(), "completed" | "failed")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub database: String,
    pub schema: String,
    pub name: String,
    #[serde(rename = "type")]
    pub table_type: String,
    pub row_count: Option<u64>,
    #[serde(default)]
    pub columns: Vec<ColumnSummary>,
    #[serde(default)]
    pub relationships: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub connection_id: String,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    pub check_type: String,
    pub column: Option<String>,
    pub passed: bool,
    pub score: f64,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableQuality {
    pub table: String,
    pub score: f64,
    pub critical_issues: usize,
    pub warnings: usize,
    #[serde(default)]
    pub checks: Vec<CheckSummary>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub workflow_id: String,
    pub generated_at: DateTime<Utc>,
    pub overall_score: f64,
    pub critical_issues: usize,
    pub warnings: usize,
    #[serde(default)]
    pub tables: Vec<TableQuality>,
}
