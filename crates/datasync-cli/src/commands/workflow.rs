//! `datasync workflow` command implementations

use colored::Colorize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::api::ApiClient;
use crate::error::{CliError, Result};
use crate::output::{phase_label, print_json, runs_table, status_table, table_progress_bar, update_progress_bar};

/// Poll interval used by `start --watch`
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Read a workflow input document
///
/// The server validates the content; this only checks that the file is a
/// JSON object.
pub fn read_input(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::InputFile {
        path: path.display().to_string(),
        source,
    })?;
    let input: Value = serde_json::from_str(&raw)?;
    if !input.is_object() {
        return Err(CliError::config(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }
    Ok(input)
}

pub async fn start(client: &ApiClient, file: &Path, watch_run: bool, json: bool) -> Result<()> {
    let input = read_input(file)?;
    let reply = client.start_workflow(&input).await?;

    if json {
        print_json(&reply.raw)?;
    } else {
        println!("{} {}", "Started".green().bold(), reply.data.workflow_id);
        println!("  Run: {}", reply.data.run_id);
    }

    if watch_run {
        watch(client, &reply.data.workflow_id, DEFAULT_WATCH_INTERVAL, json).await?;
    }
    Ok(())
}

pub async fn status(client: &ApiClient, workflow_id: &str, json: bool) -> Result<()> {
    let reply = client.workflow_status(workflow_id).await?;
    if json {
        return print_json(&reply.raw);
    }

    let status = &reply.data;
    println!("{}", status_table(status));
    if !status.errors.is_empty() {
        println!();
        println!("{}", format!("Errors ({}):", status.errors.len()).red().bold());
        for entry in &status.errors {
            let retry = if entry.retryable { " (retryable)" } else { "" };
            println!("  [{}] {}: {}{}", entry.severity, entry.object, entry.message, retry);
        }
    }
    Ok(())
}

pub async fn list(client: &ApiClient, limit: usize, json: bool) -> Result<()> {
    let reply = client.list_workflows(limit).await?;
    if json {
        return print_json(&reply.raw);
    }

    if reply.data.is_empty() {
        println!("No workflow runs found.");
        println!("Run 'datasync workflow start --file <input.json>' to start one.");
        return Ok(());
    }
    println!("{}", runs_table(&reply.data));
    Ok(())
}

/// Send `pause`, `resume` or `cancel`
pub async fn signal(client: &ApiClient, workflow_id: &str, signal: &str, json: bool) -> Result<()> {
    let reply = client.signal(workflow_id, signal).await?;
    if json {
        return print_json(&reply.raw);
    }
    println!("Sent {} to {}", reply.data.signal.bold(), reply.data.workflow_id);
    Ok(())
}

/// Poll until the run reaches `completed` or `failed`
///
/// Returns an error when the run failed so scripts can branch on the exit
/// code.
pub async fn watch(client: &ApiClient, workflow_id: &str, interval: Duration, json: bool) -> Result<()> {
    let pb = (!json).then(|| table_progress_bar(workflow_id));

    let last = loop {
        let reply = client.workflow_status(workflow_id).await?;
        if let Some(pb) = &pb {
            update_progress_bar(pb, &reply.data);
        }
        if reply.data.is_finished() {
            break reply;
        }
        tokio::time::sleep(interval).await;
    };

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    if json {
        print_json(&last.raw)?;
    } else {
        let status = &last.data;
        println!(
            "{} {}: {} tables, {} records, {} errors",
            status.workflow_id,
            phase_label(status),
            status.progress.processed_tables,
            status.metrics.records_transferred,
            status.errors.len()
        );
    }

    if last.data.phase == "failed" {
        return Err(CliError::WorkflowFailed(workflow_id.to_string()));
    }
    Ok(())
}
