//! Score aggregation and recommendations
//!
//! A table's score is the unweighted mean of its checks; the report's overall
//! score is the unweighted mean of its tables. Failed checks are tallied by
//! severity: `error` counts as a critical issue, `warning` as a warning.

use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

use super::{CheckKind, QualityCheckResult, QualityReport, TableQualityReport};
use crate::etl::types::Severity;

/// Failures of one kind in a table before a pattern recommendation is made
const RECURRING_FAILURES: usize = 2;

fn mean(scores: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = scores.len();
    if n == 0 {
        return 1.0;
    }
    scores.sum::<f64>() / n as f64
}

fn count_failed(checks: &[QualityCheckResult], severity: Severity) -> usize {
    checks
        .iter()
        .filter(|c| !c.passed && c.severity == severity)
        .count()
}

fn pattern_recommendation(kind: CheckKind) -> &'static str {
    match kind {
        CheckKind::Completeness => "Add NOT NULL validation upstream for frequently incomplete columns",
        CheckKind::Uniqueness => "Enforce unique constraints at the source to prevent duplicate keys",
        CheckKind::Validity => "Validate value formats at data entry; several columns carry malformed values",
        CheckKind::Timeliness => "Review load schedules; data is arriving later than expected",
        CheckKind::BusinessRule => "Review upstream business logic; several rules are being violated",
    }
}

/// Recommendations for one table, de-duplicated in first-seen order
///
/// Recurring failure kinds come first, then each failed check's own
/// suggestions.
pub fn recommendations(checks: &[QualityCheckResult]) -> Vec<String> {
    let mut failures: HashMap<CheckKind, usize> = HashMap::new();
    for check in checks.iter().filter(|c| !c.passed) {
        *failures.entry(check.check_type).or_default() += 1;
    }

    let mut out: Vec<String> = Vec::new();
    let mut push = |text: &str| {
        if !out.iter().any(|existing| existing == text) {
            out.push(text.to_string());
        }
    };

    for kind in CheckKind::all() {
        if failures.get(&kind).copied().unwrap_or(0) >= RECURRING_FAILURES {
            push(pattern_recommendation(kind));
        }
    }
    for check in checks.iter().filter(|c| !c.passed) {
        for suggestion in &check.suggestions {
            push(suggestion);
        }
    }
    out
}

pub fn table_report(table: impl Into<String>, checks: Vec<QualityCheckResult>) -> TableQualityReport {
    TableQualityReport {
        table: table.into(),
        score: mean(checks.iter().map(|c| c.score)),
        critical_issues: count_failed(&checks, Severity::Error),
        warnings: count_failed(&checks, Severity::Warning),
        recommendations: recommendations(&checks),
        checks,
    }
}

pub fn build_report(
    connection_id: Uuid,
    workflow_id: &str,
    run_id: Uuid,
    tables: Vec<TableQualityReport>,
) -> QualityReport {
    QualityReport {
        id: Uuid::new_v4(),
        connection_id,
        workflow_id: workflow_id.to_string(),
        run_id,
        generated_at: Utc::now(),
        overall_score: mean(tables.iter().map(|t| t.score)),
        critical_issues: tables.iter().map(|t| t.critical_issues).sum(),
        warnings: tables.iter().map(|t| t.warnings).sum(),
        tables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::quality::CheckDetails;

    fn check(kind: CheckKind, score: f64, severity: Severity, suggestion: &str) -> QualityCheckResult {
        QualityCheckResult {
            check_type: kind,
            table: "public.orders".into(),
            column: Some("amount".into()),
            rule_name: None,
            passed: score >= 0.95,
            score,
            threshold: 0.95,
            severity,
            details: CheckDetails::default(),
            suggestions: vec![suggestion.to_string()],
            error: None,
        }
    }

    #[test]
    fn test_table_score_is_mean_and_error_counts_once() {
        let report = table_report(
            "public.orders",
            vec![
                check(CheckKind::Completeness, 1.0, Severity::Warning, "unused"),
                check(CheckKind::Validity, 0.5, Severity::Warning, "fix formats"),
                check(CheckKind::Uniqueness, 0.0, Severity::Error, "dedupe"),
            ],
        );
        assert_eq!(report.score, 0.5);
        assert_eq!(report.critical_issues, 1);
        assert_eq!(report.warnings, 1);
    }

    #[test]
    fn test_recommendations_from_recurring_failures_are_deduplicated() {
        let checks = vec![
            check(CheckKind::Completeness, 0.2, Severity::Warning, "backfill a"),
            check(CheckKind::Completeness, 0.4, Severity::Warning, "backfill a"),
            check(CheckKind::Completeness, 0.1, Severity::Warning, "backfill b"),
            check(CheckKind::Uniqueness, 0.9, Severity::Error, "dedupe"),
            check(CheckKind::Validity, 1.0, Severity::Warning, "never shown"),
        ];
        assert_eq!(
            recommendations(&checks),
            vec![
                pattern_recommendation(CheckKind::Completeness).to_string(),
                "backfill a".to_string(),
                "backfill b".to_string(),
                "dedupe".to_string(),
            ]
        );
    }

    #[test]
    fn test_overall_score_and_totals() {
        let a = table_report("public.a", vec![check(CheckKind::Completeness, 1.0, Severity::Warning, "")]);
        let b = table_report(
            "public.b",
            vec![
                check(CheckKind::Uniqueness, 0.0, Severity::Error, "dedupe"),
                check(CheckKind::BusinessRule, 0.5, Severity::Error, "fix rule"),
            ],
        );
        let report = build_report(Uuid::nil(), "quality-x", Uuid::nil(), vec![a, b]);
        assert_eq!(report.overall_score, 0.625);
        assert_eq!(report.critical_issues, 2);
        assert_eq!(report.warnings, 0);
        assert!(report.table("public.b").is_some());
    }

    #[test]
    fn test_empty_report_scores_one() {
        let report = build_report(Uuid::nil(), "quality-x", Uuid::nil(), Vec::new());
        assert_eq!(report.overall_score, 1.0);
        assert_eq!(table_report("public.t", Vec::new()).score, 1.0);
    }
}
