//! PostgreSQL source connector
//!
//! Rows are projected through `to_jsonb` so every query yields a JSON object
//! per row regardless of column types. Streaming runs the query on a spawned
//! task that feeds a bounded channel.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::query::QueryScalar;
use sqlx::Postgres;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{
    ColumnInfo, ConnectionConfig, Connector, Credentials, ForeignKey, QueryParam, QueryResult, Row,
    RowStream, SourceKind, TableInfo,
};
use crate::etl::catalog::TableType;
use crate::etl::config::DEFAULT_STREAM_CHANNEL_CAPACITY;
use crate::etl::error::{EtlError, EtlResult};

const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

const SYSTEM_SCHEMA_FILTER: &str = "NOT IN ('information_schema', 'pg_catalog', 'pg_toast') \
     AND {col} NOT LIKE 'pg_temp_%' AND {col} NOT LIKE 'pg_toast_temp_%'";

type JsonQuery<'q> = QueryScalar<'q, Postgres, Value, PgArguments>;

pub struct PostgresConnector {
    config: ConnectionConfig,
    pool: Option<PgPool>,
    stream_capacity: usize,
}

impl PostgresConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: None,
            stream_capacity: DEFAULT_STREAM_CHANNEL_CAPACITY,
        }
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    fn connect_options(&self, credentials: &Credentials) -> EtlResult<PgConnectOptions> {
        let mut options = match self.config.setting("url") {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|e| EtlError::validation(format!("invalid postgres url: {}", e)))?,
            None => {
                let host = self.config.setting("host").ok_or_else(|| {
                    EtlError::validation("postgres connection needs either `url` or `host`")
                })?;
                let mut options = PgConnectOptions::new().host(host);
                if let Some(port) = self.config.setting("port") {
                    let port: u16 = port
                        .parse()
                        .map_err(|_| EtlError::validation(format!("invalid postgres port: {}", port)))?;
                    options = options.port(port);
                }
                if let Some(database) = self.config.setting("database") {
                    options = options.database(database);
                }
                options
            }
        };
        if let Some(username) = &credentials.username {
            options = options.username(username);
        }
        if let Some(password) = &credentials.password {
            options = options.password(password);
        }
        Ok(options)
    }

    async fn open_pool(&self, credentials: &Credentials, max_connections: u32) -> EtlResult<PgPool> {
        let options = self.connect_options(credentials)?;
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await
            .map_err(classify)
    }

    fn pool(&self) -> EtlResult<&PgPool> {
        self.pool.as_ref().ok_or_else(|| EtlError::Connection {
            message: "postgres connector is not connected".into(),
            retryable: false,
        })
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Postgres
    }

    async fn test_connection(&self, credentials: &Credentials) -> EtlResult<()> {
        let pool = self.open_pool(credentials, 1).await?;
        let result = sqlx::query("SELECT 1").execute(&pool).await.map_err(classify);
        pool.close().await;
        result.map(|_| ())
    }

    async fn connect(&mut self, credentials: &Credentials) -> EtlResult<()> {
        let max_connections = match self.config.setting("max_connections") {
            Some(raw) => raw
                .parse()
                .map_err(|_| EtlError::validation(format!("invalid max_connections: {}", raw)))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        let pool = self.open_pool(credentials, max_connections).await?;
        tracing::debug!(max_connections, "Postgres source pool established");
        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) -> EtlResult<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        Ok(())
    }

    async fn list_databases(&self) -> EtlResult<Vec<String>> {
        let database: String = sqlx::query_scalar("SELECT current_database()::text")
            .fetch_one(self.pool()?)
            .await
            .map_err(classify)?;
        Ok(vec![database])
    }

    async fn list_schemas(&self, _database: Option<&str>) -> EtlResult<Vec<String>> {
        let sql = format!(
            "SELECT schema_name::text FROM information_schema.schemata \
             WHERE schema_name {} ORDER BY schema_name",
            SYSTEM_SCHEMA_FILTER.replace("{col}", "schema_name")
        );
        sqlx::query_scalar(&sql)
            .fetch_all(self.pool()?)
            .await
            .map_err(classify)
    }

    async fn list_tables(&self, _database: Option<&str>, schema: Option<&str>) -> EtlResult<Vec<TableInfo>> {
        let database = self.list_databases().await?.into_iter().next().unwrap_or_default();
        let sql = format!(
            "SELECT t.table_schema::text, t.table_name::text, t.table_type::text, \
                    (SELECT c.reltuples::bigint FROM pg_class c \
                       JOIN pg_namespace n ON n.oid = c.relnamespace \
                      WHERE n.nspname = t.table_schema AND c.relname = t.table_name) AS estimated_rows \
             FROM information_schema.tables t \
             WHERE ($1::text IS NULL OR t.table_schema = $1) AND t.table_schema {} \
             ORDER BY t.table_schema, t.table_name",
            SYSTEM_SCHEMA_FILTER.replace("{col}", "t.table_schema")
        );
        let rows: Vec<(String, String, String, Option<i64>)> = sqlx::query_as(&sql)
            .bind(schema)
            .fetch_all(self.pool()?)
            .await
            .map_err(classify)?;

        Ok(rows
            .into_iter()
            .map(|(schema, name, table_type, estimated_rows)| TableInfo {
                database: database.clone(),
                schema,
                name,
                table_type: if table_type == "VIEW" {
                    TableType::View
                } else {
                    TableType::Table
                },
                last_modified: None,
                // reltuples is -1 until the table has been analyzed
                row_count: estimated_rows.filter(|n| *n >= 0).map(|n| n as u64),
            })
            .collect())
    }

    async fn list_columns(&self, _database: &str, schema: &str, table: &str) -> EtlResult<Vec<ColumnInfo>> {
        let rows: Vec<(String, String, bool, bool)> = sqlx::query_as(
            r#"
            SELECT c.column_name::text,
                   c.data_type::text,
                   c.is_nullable = 'YES',
                   EXISTS (
                       SELECT 1
                       FROM information_schema.table_constraints tc
                       JOIN information_schema.key_column_usage kcu
                         ON tc.constraint_name = kcu.constraint_name
                        AND tc.table_schema = kcu.table_schema
                        AND tc.table_name = kcu.table_name
                       WHERE tc.constraint_type = 'PRIMARY KEY'
                         AND tc.table_schema = c.table_schema
                         AND tc.table_name = c.table_name
                         AND kcu.column_name = c.column_name
                   )
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(self.pool()?)
        .await
        .map_err(classify)?;

        if rows.is_empty() {
            return Err(EtlError::query(format!("relation {}.{} has no visible columns", schema, table)));
        }

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, primary_key)| ColumnInfo {
                name,
                data_type,
                nullable,
                primary_key,
            })
            .collect())
    }

    async fn list_foreign_keys(&self, _database: Option<&str>, schema: Option<&str>) -> EtlResult<Vec<ForeignKey>> {
        let rows: Vec<(String, String, String, String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT tc.constraint_name::text,
                   tc.table_schema::text,
                   tc.table_name::text,
                   kcu.column_name::text,
                   ccu.table_schema::text,
                   ccu.table_name::text,
                   ccu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON ccu.constraint_name = tc.constraint_name
             AND ccu.constraint_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND ($1::text IS NULL OR tc.table_schema = $1)
            ORDER BY tc.table_schema, tc.table_name, tc.constraint_name
            "#,
        )
        .bind(schema)
        .fetch_all(self.pool()?)
        .await
        .map_err(classify)?;

        Ok(rows
            .into_iter()
            .map(
                |(constraint_name, schema, table, column, target_schema, target_table, target_column)| {
                    ForeignKey {
                        constraint_name,
                        schema,
                        table,
                        column,
                        target_schema,
                        target_table,
                        target_column,
                    }
                },
            )
            .collect())
    }

    async fn execute_query(&self, sql: &str, params: &[QueryParam]) -> EtlResult<QueryResult> {
        let wrapped = json_projection(sql);
        let values = bind_params(sqlx::query_scalar(&wrapped), params)
            .fetch_all(self.pool()?)
            .await
            .map_err(classify)?;
        let rows = values.into_iter().map(into_row).collect::<EtlResult<Vec<_>>>()?;
        Ok(QueryResult::from_rows(rows))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn execute_streaming_query(&self, sql: &str, params: &[QueryParam]) -> EtlResult<RowStream> {
        let pool = self.pool()?.clone();
        let wrapped = json_projection(sql);
        let params = params.to_vec();
        let (tx, rx) = mpsc::channel(self.stream_capacity);

        tokio::spawn(async move {
            let mut rows = bind_params(sqlx::query_scalar(&wrapped), &params).fetch(&pool);
            while let Some(item) = rows.next().await {
                let item = item.map_err(classify).and_then(into_row);
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn ping(&self) -> EtlResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool()?)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn get_version(&self) -> EtlResult<String> {
        sqlx::query_scalar("SELECT version()")
            .fetch_one(self.pool()?)
            .await
            .map_err(classify)
    }
}

fn json_projection(sql: &str) -> String {
    format!("SELECT to_jsonb(q) AS row FROM ({}) q", sql)
}

fn bind_params<'q>(mut query: JsonQuery<'q>, params: &[QueryParam]) -> JsonQuery<'q> {
    for param in params {
        query = match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(b) => query.bind(*b),
            QueryParam::Int(i) => query.bind(*i),
            QueryParam::Float(f) => query.bind(*f),
            QueryParam::Text(s) => query.bind(s.clone()),
            QueryParam::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

fn into_row(value: Value) -> EtlResult<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(EtlError::query(format!("expected a row object, got {}", other))),
    }
}

/// Map a driver error onto the retry taxonomy using SQLSTATE classes
fn classify(err: sqlx::Error) -> EtlError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            match code.as_str() {
                "28000" | "28P01" => EtlError::Authentication(db.message().to_string()),
                // serialization_failure, deadlock_detected, too_many_connections
                "40001" | "40P01" | "53300" => EtlError::transient_query(db.message().to_string()),
                c if c.starts_with("08") || c.starts_with("57P") => EtlError::connection(db.message().to_string()),
                _ => EtlError::query(format!("{} (SQLSTATE {})", db.message(), code)),
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
            EtlError::connection(err.to_string())
        }
        sqlx::Error::PoolClosed => EtlError::Connection {
            message: err.to_string(),
            retryable: false,
        },
        sqlx::Error::Configuration(_) => EtlError::validation(err.to_string()),
        _ => EtlError::query(err.to_string()),
    }
}
