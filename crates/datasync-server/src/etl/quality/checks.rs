//! Check planning and evaluation
//!
//! [`plan_checks`] decides which checks a table gets from its catalog entry
//! and the [`QualityConfig`]; [`QualityExecutor::run_check`] evaluates one
//! planned check through the connector's structured statements.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use super::{CheckDetails, CheckKind, QualityCheckResult, QualityConfig};
use crate::etl::catalog::{is_integer_type, is_numeric_type, is_timestamp_type, TableDescriptor};
use crate::etl::connector::{Connector, Statement, TableRef};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::sync::cursor::{infer_incremental_column, CursorKind};
use crate::etl::types::Severity;
use crate::etl::values::parse_timestamp;

/// Failing values kept per check
const MAX_SAMPLE_FAILURES: usize = 5;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const URL_PATTERN: &str = r"^https?://[^\s/$.?#][^\s]*$";
const UUID_PATTERN: &str = r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";
const PHONE_PATTERN: &str = r"^\+?[0-9][0-9 ().-]{5,18}[0-9]$";

/// Expected shape of a column's values
#[derive(Debug, Clone, PartialEq)]
pub enum ValueFormat {
    Email,
    Url,
    Uuid,
    Phone,
    Integer,
    Number,
    Boolean,
    Timestamp,
    Pattern(String),
}

impl ValueFormat {
    pub fn as_str(&self) -> &str {
        match self {
            ValueFormat::Email => "email",
            ValueFormat::Url => "url",
            ValueFormat::Uuid => "uuid",
            ValueFormat::Phone => "phone",
            ValueFormat::Integer => "integer",
            ValueFormat::Number => "number",
            ValueFormat::Boolean => "boolean",
            ValueFormat::Timestamp => "timestamp",
            ValueFormat::Pattern(_) => "pattern",
        }
    }

    /// Format implied by a column's name, then by its declared type
    pub fn infer(name: &str, data_type: &str) -> Option<ValueFormat> {
        let name = name.to_lowercase();
        let data_type = data_type.trim().to_lowercase();
        if name.contains("email") {
            return Some(ValueFormat::Email);
        }
        if name.ends_with("url") || name.contains("website") {
            return Some(ValueFormat::Url);
        }
        if name.contains("phone") {
            return Some(ValueFormat::Phone);
        }
        if data_type == "uuid" || name == "uuid" || name.ends_with("_uuid") {
            return Some(ValueFormat::Uuid);
        }
        if is_integer_type(&data_type) {
            return Some(ValueFormat::Integer);
        }
        if is_numeric_type(&data_type) {
            return Some(ValueFormat::Number);
        }
        if data_type == "bool" || data_type == "boolean" {
            return Some(ValueFormat::Boolean);
        }
        if is_timestamp_type(&data_type) {
            return Some(ValueFormat::Timestamp);
        }
        None
    }
}

/// Compiled conformance test for a [`ValueFormat`]
pub struct FormatValidator {
    format: ValueFormat,
    regex: Option<Regex>,
}

impl FormatValidator {
    pub fn new(format: ValueFormat) -> EtlResult<Self> {
        let pattern = match &format {
            ValueFormat::Email => Some(EMAIL_PATTERN),
            ValueFormat::Url => Some(URL_PATTERN),
            ValueFormat::Uuid => Some(UUID_PATTERN),
            ValueFormat::Phone => Some(PHONE_PATTERN),
            ValueFormat::Pattern(pattern) => Some(pattern.as_str()),
            _ => None,
        };
        let regex = pattern
            .map(Regex::new)
            .transpose()
            .map_err(|e| EtlError::validation(format!("invalid {} pattern: {}", format.as_str(), e)))?;
        Ok(Self { format, regex })
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        if let Some(regex) = &self.regex {
            return match value {
                Value::String(s) => regex.is_match(s),
                Value::Number(n) => regex.is_match(&n.to_string()),
                _ => false,
            };
        }
        match self.format {
            ValueFormat::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            ValueFormat::Number => match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok_and(f64::is_finite),
                _ => false,
            },
            ValueFormat::Boolean => match value {
                Value::Bool(_) => true,
                Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "false" | "t" | "f"),
                _ => false,
            },
            ValueFormat::Timestamp => parse_timestamp(value).is_some(),
            _ => false,
        }
    }
}

/// What a planned check evaluates
#[derive(Debug, Clone, PartialEq)]
pub enum CheckTarget {
    Completeness { column: String },
    Uniqueness { column: String },
    Validity { column: String, format: ValueFormat },
    Timeliness { column: String, freshness_hours: f64 },
    BusinessRule { name: String, predicate: String, description: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedCheck {
    pub kind: CheckKind,
    /// `schema.table`
    pub table: String,
    pub threshold: f64,
    pub severity: Severity,
    pub target: CheckTarget,
}

impl PlannedCheck {
    pub fn column(&self) -> Option<&str> {
        match &self.target {
            CheckTarget::Completeness { column }
            | CheckTarget::Uniqueness { column }
            | CheckTarget::Validity { column, .. }
            | CheckTarget::Timeliness { column, .. } => Some(column),
            CheckTarget::BusinessRule { .. } => None,
        }
    }

    pub fn rule_name(&self) -> Option<&str> {
        match &self.target {
            CheckTarget::BusinessRule { name, .. } => Some(name),
            _ => None,
        }
    }

    /// `schema.table.column:kind`, used for error log entries
    pub fn object_name(&self) -> String {
        let target = self.column().or(self.rule_name()).unwrap_or("*");
        format!("{}.{}:{}", self.table, target, self.kind.as_str())
    }

    /// Result for a check whose evaluation itself failed
    pub fn failed_result(&self, error: &EtlError) -> QualityCheckResult {
        let mut result = self.result(0.0, CheckDetails::default(), Vec::new());
        result.passed = false;
        result.error = Some(error.to_string());
        result
    }

    fn result(&self, score: f64, details: CheckDetails, suggestions: Vec<String>) -> QualityCheckResult {
        QualityCheckResult {
            check_type: self.kind,
            table: self.table.clone(),
            column: self.column().map(str::to_string),
            rule_name: self.rule_name().map(str::to_string),
            passed: score >= self.threshold,
            score,
            threshold: self.threshold,
            severity: self.severity,
            details,
            suggestions,
            error: None,
        }
    }
}

/// The checks one table receives, in evaluation order
pub fn plan_checks(table: &TableDescriptor, config: &QualityConfig) -> Vec<PlannedCheck> {
    let qualified = table.qualified_name();
    let mut planned = Vec::new();
    let plan = |kind, threshold, severity, target| PlannedCheck {
        kind,
        table: qualified.clone(),
        threshold,
        severity,
        target,
    };

    if config.runs(CheckKind::Completeness) {
        for column in &table.columns {
            // Nulls in a NOT NULL column mean the copy is broken, not just sparse
            let severity = if column.nullable { Severity::Warning } else { Severity::Error };
            planned.push(plan(
                CheckKind::Completeness,
                config.completeness_threshold,
                severity,
                CheckTarget::Completeness {
                    column: column.name.clone(),
                },
            ));
        }
    }

    if config.runs(CheckKind::Uniqueness) {
        let keys = table.key_columns();
        let mut unique: Vec<(String, Severity)> = Vec::new();
        // Per-column uniqueness only makes sense for single-column keys
        if let [key] = keys.as_slice() {
            unique.push((key.clone(), Severity::Error));
        }
        for column in config.unique_columns.get(&qualified).into_iter().flatten() {
            if table.column(column).is_some() && !unique.iter().any(|(c, _)| c == column) {
                unique.push((column.clone(), Severity::Warning));
            }
        }
        for (column, severity) in unique {
            planned.push(plan(
                CheckKind::Uniqueness,
                config.uniqueness_threshold,
                severity,
                CheckTarget::Uniqueness { column },
            ));
        }
    }

    if config.runs(CheckKind::Validity) {
        for column in &table.columns {
            let explicit = config
                .format_rules
                .iter()
                .find(|rule| rule.table == qualified && rule.column == column.name)
                .map(|rule| ValueFormat::Pattern(rule.pattern.clone()));
            if let Some(format) = explicit.or_else(|| ValueFormat::infer(&column.name, &column.data_type)) {
                planned.push(plan(
                    CheckKind::Validity,
                    config.validity_threshold,
                    Severity::Warning,
                    CheckTarget::Validity {
                        column: column.name.clone(),
                        format,
                    },
                ));
            }
        }
    }

    if config.runs(CheckKind::Timeliness) {
        let column = match config.timestamp_columns.get(&qualified) {
            Some(column) => table.column(column).map(|c| c.name.clone()),
            None => infer_incremental_column(&table.columns)
                .filter(|c| c.kind == CursorKind::Timestamp)
                .map(|c| c.name),
        };
        if let Some(column) = column {
            planned.push(plan(
                CheckKind::Timeliness,
                1.0,
                Severity::Warning,
                CheckTarget::Timeliness {
                    column,
                    freshness_hours: config.freshness_hours,
                },
            ));
        }
    }

    if config.runs(CheckKind::BusinessRule) {
        for rule in config.business_rules.iter().filter(|r| r.table == qualified) {
            planned.push(plan(
                CheckKind::BusinessRule,
                rule.threshold,
                rule.severity,
                CheckTarget::BusinessRule {
                    name: rule.name.clone(),
                    predicate: rule.predicate.clone(),
                    description: rule.description.clone(),
                },
            ));
        }
    }

    planned
}

fn ratio(good: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (good as f64 / total as f64).clamp(0.0, 1.0)
    }
}

fn percent(score: f64) -> String {
    format!("{:.1}%", score * 100.0)
}

/// Evaluates planned checks through a connector
pub struct QualityExecutor {
    max_validation_rows: usize,
}

impl QualityExecutor {
    pub fn new(max_validation_rows: usize) -> Self {
        Self { max_validation_rows }
    }

    pub async fn run_check(
        &self,
        connector: &dyn Connector,
        table: &TableDescriptor,
        check: &PlannedCheck,
        now: DateTime<Utc>,
    ) -> EtlResult<QualityCheckResult> {
        let table_ref = TableRef::from(table);
        match &check.target {
            CheckTarget::Completeness { column } => {
                let profile = connector
                    .execute_statement(&Statement::ColumnProfile {
                        table: table_ref,
                        column: column.clone(),
                    })
                    .await?;
                let total = profile.count("total_rows")?;
                let non_null = profile.count("non_null")?;
                let score = ratio(non_null, total);
                let suggestions = if score < check.threshold {
                    vec![format!(
                        "Column {} is {} populated; backfill missing values or enforce NOT NULL at the source",
                        column,
                        percent(score)
                    )]
                } else {
                    Vec::new()
                };
                let details = CheckDetails {
                    total_records: total,
                    failed_records: total.saturating_sub(non_null),
                    sample_failures: Vec::new(),
                };
                Ok(check.result(score, details, suggestions))
            }
            CheckTarget::Uniqueness { column } => {
                let profile = connector
                    .execute_statement(&Statement::ColumnProfile {
                        table: table_ref.clone(),
                        column: column.clone(),
                    })
                    .await?;
                let total = profile.count("total_rows")?;
                let distinct = profile.count("distinct_values")?;
                let score = ratio(distinct, total);
                let mut details = CheckDetails {
                    total_records: total,
                    failed_records: total.saturating_sub(distinct),
                    sample_failures: Vec::new(),
                };
                let mut suggestions = Vec::new();
                if score < check.threshold {
                    let duplicates = connector
                        .execute_statement(&Statement::DuplicateValues {
                            table: table_ref,
                            column: column.clone(),
                            limit: MAX_SAMPLE_FAILURES,
                        })
                        .await?;
                    details.sample_failures = duplicates
                        .rows
                        .into_iter()
                        .filter_map(|mut row| row.remove("value"))
                        .collect();
                    suggestions.push(format!(
                        "Column {} has duplicate values; deduplicate or add a unique constraint",
                        column
                    ));
                }
                Ok(check.result(score, details, suggestions))
            }
            CheckTarget::Validity { column, format } => {
                let validator = FormatValidator::new(format.clone())?;
                let values = connector
                    .execute_statement(&Statement::NonNullValues {
                        table: table_ref,
                        column: column.clone(),
                        limit: self.max_validation_rows,
                    })
                    .await?;
                let mut checked = 0u64;
                let mut invalid = Vec::new();
                for value in values.rows.iter().filter_map(|row| row.get("value")) {
                    checked += 1;
                    if !validator.is_valid(value) {
                        invalid.push(value.clone());
                    }
                }
                let failed = invalid.len() as u64;
                let score = ratio(checked - failed, checked);
                let suggestions = if score < check.threshold {
                    vec![format!(
                        "Column {} has values that do not match the expected {} format",
                        column,
                        format.as_str()
                    )]
                } else {
                    Vec::new()
                };
                invalid.truncate(MAX_SAMPLE_FAILURES);
                let details = CheckDetails {
                    total_records: checked,
                    failed_records: failed,
                    sample_failures: invalid,
                };
                Ok(check.result(score, details, suggestions))
            }
            CheckTarget::Timeliness {
                column,
                freshness_hours,
            } => {
                let newest = connector
                    .execute_statement(&Statement::MaxValue {
                        table: table_ref,
                        column: column.clone(),
                    })
                    .await?;
                let newest = newest.scalar("max_value").cloned().unwrap_or(Value::Null);
                let age_hours = parse_timestamp(&newest)
                    .map(|ts| (now - ts).num_seconds() as f64 / 3600.0);

                let (score, suggestion) = match age_hours {
                    Some(age) if age <= *freshness_hours => (1.0, None),
                    Some(age) => (
                        0.0,
                        Some(format!(
                            "Newest {} value is {:.1} hours old (limit {}); check that upstream loads are running",
                            column, age, freshness_hours
                        )),
                    ),
                    None => (
                        0.0,
                        Some(format!("Column {} has no usable timestamps; freshness is unknown", column)),
                    ),
                };
                let details = CheckDetails {
                    total_records: 1,
                    failed_records: u64::from(score < 1.0),
                    sample_failures: if score < 1.0 { vec![newest] } else { Vec::new() },
                };
                Ok(check.result(score, details, suggestion.into_iter().collect()))
            }
            CheckTarget::BusinessRule {
                name,
                predicate,
                description,
            } => {
                let violations = connector
                    .execute_statement(&Statement::RuleViolations {
                        table: table_ref,
                        predicate: predicate.clone(),
                    })
                    .await
                    .map_err(|e| EtlError::QualityCheck(format!("rule {} could not be evaluated: {}", name, e)))?;
                let total = violations.count("total_rows")?;
                let failed = violations.count("failed_rows")?;
                let score = ratio(total.saturating_sub(failed), total);
                let suggestions = if score < check.threshold {
                    vec![description
                        .clone()
                        .unwrap_or_else(|| format!("Rule {} failed for {} of {} rows", name, failed, total))]
                } else {
                    Vec::new()
                };
                let details = CheckDetails {
                    total_records: total,
                    failed_records: failed,
                    sample_failures: Vec::new(),
                };
                Ok(check.result(score, details, suggestions))
            }
        }
    }
}
