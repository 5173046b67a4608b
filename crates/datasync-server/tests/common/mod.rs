//! Shared fixtures for Datasync server integration tests
//!
//! Most tests run entirely in process: a [`MemorySource`] stands in for the
//! external system and a [`MemoryStore`] for PostgreSQL. [`TestPostgres`]
//! starts a real database through testcontainers for the `#[ignore]`d tests.

#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

use datasync_server::etl::connector::{ConnectionConfig, MemorySource, MemoryTable, SourceKind};
use datasync_server::etl::store::{MemoryStore, RecordSink};
use datasync_server::etl::{
    ConnectorRegistry, EtlConfig, Stores, WorkflowDeps, WorkflowInput, WorkflowKind, WorkflowRuntime,
};

// ============================================================================
// In-process harness
// ============================================================================

/// ETL settings with millisecond retry backoff so failure tests stay fast
pub fn test_config() -> EtlConfig {
    EtlConfig {
        retry_initial_interval_ms: 1,
        retry_max_interval_ms: 5,
        table_sync_timeout_secs: 10,
        discovery_timeout_secs: 10,
        quality_check_timeout_secs: 10,
        notification_timeout_secs: 2,
        ..EtlConfig::default()
    }
}

pub struct Harness {
    pub runtime: Arc<WorkflowRuntime>,
    pub store: Arc<MemoryStore>,
    pub source: MemorySource,
}

impl Harness {
    pub fn new(source: MemorySource) -> Self {
        Self::build(source, test_config(), None)
    }

    pub fn with_config(source: MemorySource, config: EtlConfig) -> Self {
        Self::build(source, config, None)
    }

    /// Route synchronized batches to `sink` instead of the memory store
    pub fn with_sink(source: MemorySource, sink: Arc<dyn RecordSink>) -> Self {
        Self::build(source, test_config(), Some(sink))
    }

    fn build(source: MemorySource, config: EtlConfig, sink: Option<Arc<dyn RecordSink>>) -> Self {
        let (stores, store) = Stores::in_memory();
        let stores = match sink {
            Some(sink) => stores.with_sink(sink),
            None => stores,
        };
        let mut registry = ConnectorRegistry::new();
        registry.register_memory(source.clone());

        let deps = WorkflowDeps {
            registry: Arc::new(registry),
            stores,
            config: Arc::new(config),
        };
        Self {
            runtime: Arc::new(WorkflowRuntime::new(deps)),
            store,
            source,
        }
    }
}

/// Input for a memory-backed workflow without sampling
///
/// Sampling reads rows during discovery, which would consume failures
/// injected for the sync phase.
pub fn memory_input(kind: WorkflowKind, connection_id: Uuid) -> WorkflowInput {
    let mut input = WorkflowInput::new(kind, connection_id, ConnectionConfig::new(SourceKind::Memory));
    input.discovery.include_sample_data = false;
    input
}

/// `count` rows of `{id, name, updated_at}` starting at `first_id`
pub fn event_rows(first_id: i64, count: usize) -> Vec<Value> {
    (0..count as i64)
        .map(|offset| {
            let id = first_id + offset;
            json!({
                "id": id,
                "name": format!("event-{}", id),
                "updated_at": format!("2026-03-01T{:02}:{:02}:00Z", (id / 60) % 24, id % 60),
            })
        })
        .collect()
}

pub fn events_table(schema: &str, name: &str, rows: Vec<Value>) -> MemoryTable {
    MemoryTable::new(schema, name)
        .primary_key("id", "integer")
        .column("name", "text")
        .column("updated_at", "timestamp with time zone")
        .rows(rows)
}

/// A source with `tables` event tables named `t00`, `t01`, ... of `rows` rows each
pub fn numbered_source(tables: usize, rows: usize) -> MemorySource {
    let source = MemorySource::new("app");
    for i in 0..tables {
        source.add_table(events_table("public", &format!("t{:02}", i), event_rows(1, rows)));
    }
    source
}

/// Like [`numbered_source`], but every row selection sleeps for `delay`
pub fn delayed_source(tables: usize, rows: usize, delay: Duration) -> MemorySource {
    let source = MemorySource::with_query_delay("app", delay);
    for i in 0..tables {
        source.add_table(events_table("public", &format!("t{:02}", i), event_rows(1, rows)));
    }
    source
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;
        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
