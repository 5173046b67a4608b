//! Datasync CLI - Main entry point

use clap::Parser;
use datasync_cli::api::ApiClient;
use datasync_cli::commands::{catalog, health, workflow};
use datasync_cli::{Cli, Commands, WorkflowCommand};
use datasync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use std::time::Duration;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = &cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    // Verbose mode logs debug to the console; otherwise only warnings
    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Warn };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("datasync-cli")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli, command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

async fn execute_command(cli: &Cli, command: &Commands) -> datasync_cli::Result<()> {
    let client = ApiClient::new(cli.server_url.clone())?;
    let json = cli.json;

    match command {
        Commands::Workflow { command } => match command {
            WorkflowCommand::Start { file, watch } => workflow::start(&client, file, *watch, json).await,
            WorkflowCommand::Status { id } => workflow::status(&client, id, json).await,
            WorkflowCommand::List { limit } => workflow::list(&client, *limit, json).await,
            WorkflowCommand::Watch { id, interval_ms } => {
                workflow::watch(&client, id, Duration::from_millis(*interval_ms), json).await
            }
            WorkflowCommand::Pause { id } => workflow::signal(&client, id, "pause", json).await,
            WorkflowCommand::Resume { id } => workflow::signal(&client, id, "resume", json).await,
            WorkflowCommand::Cancel { id } => workflow::signal(&client, id, "cancel", json).await,
        },

        Commands::Catalog { connection_id } => catalog::show(&client, *connection_id, json).await,

        Commands::Report { connection_id } => catalog::report(&client, *connection_id, json).await,

        Commands::Health => health::run(&client, json).await,
    }
}
