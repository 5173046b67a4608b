//! Data-quality assessment over synchronized tables
//!
//! A quality run plans a set of checks per table ([`checks::plan_checks`]),
//! evaluates each through the connector ([`QualityExecutor`]) and folds the
//! results into a [`QualityReport`] ([`aggregate`]).

pub mod aggregate;
pub mod checks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::error::{EtlError, EtlResult};
use super::types::Severity;

pub use aggregate::{build_report, table_report};
pub use checks::{plan_checks, CheckTarget, PlannedCheck, QualityExecutor, ValueFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Completeness,
    Uniqueness,
    Validity,
    Timeliness,
    BusinessRule,
}

impl CheckKind {
    pub fn as_str(&self) -> &str {
        match self {
            CheckKind::Completeness => "completeness",
            CheckKind::Uniqueness => "uniqueness",
            CheckKind::Validity => "validity",
            CheckKind::Timeliness => "timeliness",
            CheckKind::BusinessRule => "business_rule",
        }
    }

    pub fn all() -> Vec<CheckKind> {
        vec![
            CheckKind::Completeness,
            CheckKind::Uniqueness,
            CheckKind::Validity,
            CheckKind::Timeliness,
            CheckKind::BusinessRule,
        ]
    }
}

/// Boolean predicate every row of a table is expected to satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub name: String,
    /// `schema.table`
    pub table: String,
    /// SQL boolean expression over the table's columns
    pub predicate: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_rule_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// Regex a column's values must match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRule {
    pub table: String,
    pub column: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "CheckKind::all")]
    pub checks: Vec<CheckKind>,
    #[serde(default = "default_completeness_threshold")]
    pub completeness_threshold: f64,
    #[serde(default = "default_uniqueness_threshold")]
    pub uniqueness_threshold: f64,
    #[serde(default = "default_validity_threshold")]
    pub validity_threshold: f64,
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: f64,
    /// Restrict to these `schema.table` names
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    /// Extra uniqueness expectations per `schema.table`
    #[serde(default)]
    pub unique_columns: BTreeMap<String, Vec<String>>,
    /// Column holding row freshness per `schema.table`
    #[serde(default)]
    pub timestamp_columns: BTreeMap<String, String>,
    #[serde(default)]
    pub format_rules: Vec<FormatRule>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
}

fn default_rule_threshold() -> f64 {
    1.0
}

fn default_completeness_threshold() -> f64 {
    0.95
}

fn default_uniqueness_threshold() -> f64 {
    1.0
}

fn default_validity_threshold() -> f64 {
    0.95
}

fn default_freshness_hours() -> f64 {
    24.0
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            checks: CheckKind::all(),
            completeness_threshold: default_completeness_threshold(),
            uniqueness_threshold: default_uniqueness_threshold(),
            validity_threshold: default_validity_threshold(),
            freshness_hours: default_freshness_hours(),
            tables: None,
            unique_columns: BTreeMap::new(),
            timestamp_columns: BTreeMap::new(),
            format_rules: Vec::new(),
            business_rules: Vec::new(),
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> EtlResult<()> {
        let ratios = [
            ("completeness_threshold", self.completeness_threshold),
            ("uniqueness_threshold", self.uniqueness_threshold),
            ("validity_threshold", self.validity_threshold),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(EtlError::validation(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.freshness_hours <= 0.0 {
            return Err(EtlError::validation("freshness_hours must be positive"));
        }
        for rule in &self.business_rules {
            if rule.name.trim().is_empty() || rule.predicate.trim().is_empty() {
                return Err(EtlError::validation("business rules need a name and a predicate"));
            }
            if !(0.0..=1.0).contains(&rule.threshold) {
                return Err(EtlError::validation(format!(
                    "rule {} threshold must be within [0, 1]",
                    rule.name
                )));
            }
        }
        for rule in &self.format_rules {
            regex::Regex::new(&rule.pattern).map_err(|e| {
                EtlError::validation(format!("invalid pattern for {}.{}: {}", rule.table, rule.column, e))
            })?;
        }
        Ok(())
    }

    pub fn includes_table(&self, qualified: &str) -> bool {
        self.tables
            .as_ref()
            .map_or(true, |tables| tables.iter().any(|t| t == qualified))
    }

    pub fn runs(&self, kind: CheckKind) -> bool {
        self.checks.contains(&kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckDetails {
    pub total_records: u64,
    pub failed_records: u64,
    #[serde(default)]
    pub sample_failures: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckResult {
    pub check_type: CheckKind,
    pub table: String,
    pub column: Option<String>,
    pub rule_name: Option<String>,
    pub passed: bool,
    pub score: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub details: CheckDetails,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Set when the check could not be evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQualityReport {
    pub table: String,
    pub score: f64,
    pub checks: Vec<QualityCheckResult>,
    pub critical_issues: usize,
    pub warnings: usize,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub overall_score: f64,
    pub critical_issues: usize,
    pub warnings: usize,
    pub tables: Vec<TableQualityReport>,
}

impl QualityReport {
    pub fn table(&self, name: &str) -> Option<&TableQualityReport> {
        self.tables.iter().find(|t| t.table == name)
    }
}
