//! Terminal rendering for API payloads

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

use crate::api::types::{Catalog, QualityReport, WorkflowStatus};
use crate::error::Result;

/// Print a raw response body for `--json`
pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);
    table
}

/// Phase label, with `(paused)` appended while a pause is held
pub fn phase_label(status: &WorkflowStatus) -> String {
    let phase = match status.phase.as_str() {
        "completed" => status.phase.green().to_string(),
        "failed" => status.phase.red().to_string(),
        _ => status.phase.yellow().to_string(),
    };
    if status.paused {
        format!("{} (paused)", phase)
    } else {
        phase
    }
}

pub fn status_table(status: &WorkflowStatus) -> Table {
    let progress = &status.progress;
    let mut table = styled_table();
    table.add_row(vec!["Workflow", status.workflow_id.as_str()]);
    table.add_row(vec!["Run", status.run_id.as_str()]);
    table.add_row(vec!["Connection", status.connection_id.as_str()]);
    table.add_row(vec!["Kind", status.kind.as_str()]);
    table.add_row(vec!["Phase".to_string(), phase_label(status)]);
    table.add_row(vec![
        "Tables".to_string(),
        format!("{}/{}", progress.processed_tables, progress.total_tables),
    ]);
    if let Some(current) = &progress.current_object {
        table.add_row(vec!["Current", current.as_str()]);
    }
    table.add_row(vec![
        "Records".to_string(),
        status.metrics.records_transferred.to_string(),
    ]);
    table.add_row(vec![
        "Transferred".to_string(),
        format_bytes(status.metrics.bytes_transferred),
    ]);
    table.add_row(vec![
        "Skipped tables".to_string(),
        status.metrics.tables_skipped.to_string(),
    ]);
    table.add_row(vec!["Started".to_string(), status.metrics.start_time.to_rfc3339()]);
    if let Some(end) = status.metrics.end_time {
        table.add_row(vec!["Ended".to_string(), end.to_rfc3339()]);
    }
    table
}

pub fn runs_table(runs: &[WorkflowStatus]) -> Table {
    let mut table = styled_table();
    table.set_header(vec!["Workflow", "Kind", "Phase", "Tables", "Records", "Errors"]);
    for run in runs {
        table.add_row(vec![
            run.workflow_id.clone(),
            run.kind.clone(),
            phase_label(run),
            format!("{}/{}", run.progress.processed_tables, run.progress.total_tables),
            run.metrics.records_transferred.to_string(),
            run.errors.len().to_string(),
        ]);
    }
    table
}

pub fn catalog_table(catalog: &Catalog) -> Table {
    let mut table = styled_table();
    table.set_header(vec!["Table", "Type", "Rows", "Columns", "Key", "Relationships"]);
    for t in &catalog.tables {
        let key: Vec<&str> = t
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect();
        table.add_row(vec![
            format!("{}.{}.{}", t.database, t.schema, t.name),
            t.table_type.clone(),
            t.row_count.map_or_else(|| "-".to_string(), |n| n.to_string()),
            t.columns.len().to_string(),
            if key.is_empty() { "-".to_string() } else { key.join(", ") },
            t.relationships.len().to_string(),
        ]);
    }
    table
}

pub fn report_table(report: &QualityReport) -> Table {
    let mut table = styled_table();
    table.set_header(vec!["Table", "Score", "Checks", "Critical", "Warnings"]);
    for t in &report.tables {
        let passed = t.checks.iter().filter(|c| c.passed).count();
        table.add_row(vec![
            t.table.clone(),
            format!("{:.1}%", t.score * 100.0),
            format!("{}/{} passed", passed, t.checks.len()),
            t.critical_issues.to_string(),
            t.warnings.to_string(),
        ]);
    }
    table
}

/// Progress bar over a run's tables, used by `workflow watch`
pub fn table_progress_bar(workflow_id: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} tables")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(workflow_id.to_string());
    pb
}

/// Sync the bar with the latest status snapshot
pub fn update_progress_bar(pb: &ProgressBar, status: &WorkflowStatus) {
    pb.set_length(status.progress.total_tables as u64);
    pb.set_position(status.progress.processed_tables as u64);
    let current = status.progress.current_object.as_deref().unwrap_or("");
    pb.set_message(format!("{} {} {}", status.workflow_id, phase_label(status), current));
}
