//! Datasync Server - Main entry point

use anyhow::{Context, Result};
use datasync_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::info;

use datasync_server::{
    api::{self, AppState},
    config::Config,
    etl::{ConnectorRegistry, Stores, WorkflowDeps, WorkflowRuntime},
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("datasync-server".to_string())
        .filter_directives("datasync_server=debug,tower_http=debug,sqlx=info".to_string())
        .build();

    // Environment variables take precedence over the defaults above
    let log_config = log_config.merge_env()?;

    let _guard = init_logging(&log_config)?;

    info!("Starting Datasync Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("failed to connect to the database")?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let deps = WorkflowDeps {
        registry: Arc::new(ConnectorRegistry::with_defaults(config.etl.stream_channel_capacity)),
        stores: Stores::postgres(db_pool.clone()),
        config: Arc::new(config.etl.clone()),
    };
    let runtime = Arc::new(WorkflowRuntime::new(deps));
    info!(
        error_budget = config.etl.error_budget,
        checkpoint_interval = config.etl.checkpoint_interval,
        "Workflow runtime ready"
    );

    api::serve(&config, AppState::new(runtime, Some(db_pool))).await?;

    info!("Server shut down gracefully");

    Ok(())
}
