//! Datasync Server Library
//!
//! ETL orchestration for external data sources: discover what a source
//! contains, synchronize its tables in resumable batches and assess the
//! quality of what arrived.
//!
//! # Overview
//!
//! - **ETL core** ([`etl`]): connectors, the discovery/sync/quality executors,
//!   the phased workflow state machine and its in-process runtime
//! - **Persistence**: checkpoints, catalogs, quality reports, run status and
//!   synced records in PostgreSQL through SQLx (in memory for tests)
//! - **API** ([`api`]): start workflows, signal them and read their status
//! - **Configuration** ([`config`]): environment-based, validated at load
//! - **Middleware** ([`middleware`]): CORS and request tracing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use datasync_server::api::{self, AppState};
//! use datasync_server::config::Config;
//! use datasync_server::etl::{ConnectorRegistry, Stores, WorkflowDeps, WorkflowRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let (stores, _memory) = Stores::in_memory();
//!     let deps = WorkflowDeps {
//!         registry: Arc::new(ConnectorRegistry::with_defaults(config.etl.stream_channel_capacity)),
//!         stores,
//!         config: Arc::new(config.etl.clone()),
//!     };
//!     let state = AppState::new(Arc::new(WorkflowRuntime::new(deps)), None);
//!     api::serve(&config, state).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod etl;
pub mod middleware;

pub use error::{ApiResult, AppError};
