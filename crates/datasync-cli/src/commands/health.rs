//! `datasync health` command implementation

use colored::Colorize;

use crate::api::ApiClient;
use crate::error::{CliError, Result};
use crate::output::print_json;

pub async fn run(client: &ApiClient, json: bool) -> Result<()> {
    let reply = client.health().await?;
    let health = &reply.data;

    if json {
        print_json(&reply.raw)?;
    } else {
        let status = if health.status == "healthy" {
            health.status.green()
        } else {
            health.status.red()
        };
        println!("Server:    {} ({})", status, client.base_url());
        println!("Database:  {}", health.database);
        println!("Workflows: {} active", health.active_workflows);
    }

    if health.status == "healthy" {
        Ok(())
    } else {
        Err(CliError::api("UNHEALTHY", format!("database is {}", health.database)))
    }
}
