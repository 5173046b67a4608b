//! `datasync catalog` and `datasync report` command implementations

use colored::Colorize;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::error::Result;
use crate::output::{catalog_table, print_json, report_table};

/// Show the discovered catalog of a connection
pub async fn show(client: &ApiClient, connection_id: Uuid, json: bool) -> Result<()> {
    let reply = client.catalog(&connection_id.to_string()).await?;
    if json {
        return print_json(&reply.raw);
    }

    let catalog = &reply.data;
    println!("{}", format!("Catalog for {}", catalog.connection_id).cyan().bold());
    println!("Discovered: {}", catalog.discovered_at.to_rfc3339());
    if !catalog.databases.is_empty() {
        println!("Databases:  {}", catalog.databases.join(", "));
    }
    println!();

    if catalog.tables.is_empty() {
        println!("No tables discovered.");
    } else {
        println!("{}", catalog_table(catalog));
    }
    Ok(())
}

/// Show the latest quality report of a connection
pub async fn report(client: &ApiClient, connection_id: Uuid, json: bool) -> Result<()> {
    let reply = client.quality_report(&connection_id.to_string()).await?;
    if json {
        return print_json(&reply.raw);
    }

    let report = &reply.data;
    println!("{}", format!("Quality report for {}", connection_id).cyan().bold());
    println!("Workflow:  {}", report.workflow_id);
    println!("Generated: {}", report.generated_at.to_rfc3339());
    println!("Score:     {:.1}%", report.overall_score * 100.0);
    println!(
        "Issues:    {} critical, {} warnings",
        report.critical_issues.to_string().red(),
        report.warnings.to_string().yellow()
    );
    println!();
    println!("{}", report_table(report));

    let recommendations: Vec<(&str, &str)> = report
        .tables
        .iter()
        .flat_map(|t| t.recommendations.iter().map(move |r| (t.table.as_str(), r.as_str())))
        .collect();
    if !recommendations.is_empty() {
        println!();
        println!("{}", "Recommendations:".cyan().bold());
        for (table, recommendation) in recommendations {
            println!("  {} {}", format!("[{}]", table).dimmed(), recommendation);
        }
    }
    Ok(())
}
