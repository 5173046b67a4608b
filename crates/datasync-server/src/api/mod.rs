//! HTTP status and control surface
//!
//! Starts workflows, relays signals to them and serves their status, the
//! discovered catalogs and the latest quality reports.

pub mod response;
pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tracing::info;

use crate::config::{Config, CorsConfig};
use crate::etl::WorkflowRuntime;
use crate::middleware;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<WorkflowRuntime>,
    /// Absent when the server runs on in-memory stores
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(runtime: Arc<WorkflowRuntime>, db: Option<PgPool>) -> Self {
        Self { runtime, db }
    }
}

/// Create the application router with all routes and middleware
pub fn router(state: AppState, cors: &CorsConfig) -> Router {
    let api_v1 = Router::new()
        .route("/workflows", post(routes::start_workflow).get(routes::list_workflows))
        .route("/workflows/:id", get(routes::workflow_status))
        .route("/workflows/:id/:signal", post(routes::signal_workflow))
        .route("/connections/:id/catalog", get(routes::connection_catalog))
        .route("/connections/:id/quality-report", get(routes::quality_report));

    Router::new()
        .route("/health", get(routes::health_check))
        .nest("/api/v1", api_v1)
        .with_state(state)
        // Apply layers from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

/// Bind and serve until a shutdown signal arrives, then cancel active runs
pub async fn serve(config: &Config, state: AppState) -> anyhow::Result<()> {
    let runtime = state.runtime.clone();
    let app = router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    info!("Cancelling active workflows");
    runtime.cancel_all().await;

    Ok(())
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
