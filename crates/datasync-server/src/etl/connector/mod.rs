//! Connector contract consumed by the executors
//!
//! Every external source kind implements [`Connector`]. Implementations are
//! selected through the [`ConnectorRegistry`] keyed by [`SourceKind`], and a
//! workflow owns exactly one [`ConnectorSession`] for its whole run.

pub mod memory;
pub mod postgres;
pub mod registry;
pub mod statement;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::catalog::TableType;
use super::error::{EtlError, EtlResult};

pub use memory::{MemoryConnector, MemorySource, MemoryTable};
pub use postgres::PostgresConnector;
pub use registry::ConnectorRegistry;
pub use statement::{CursorFilter, Statement, TableRef};

/// A row as a JSON object keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows produced by a streaming query
pub type RowStream = BoxStream<'static, EtlResult<Row>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Postgres,
    Memory,
}

impl SourceKind {
    pub fn as_str(&self) -> &str {
        match self {
            SourceKind::Postgres => "postgres",
            SourceKind::Memory => "memory",
        }
    }
}

/// Typed query parameter, bound positionally as `$1..$n`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl QueryParam {
    /// JSON form, comparable with row values
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            QueryParam::Null => serde_json::Value::Null,
            QueryParam::Bool(b) => serde_json::Value::Bool(*b),
            QueryParam::Int(i) => serde_json::Value::from(*i),
            QueryParam::Float(f) => serde_json::Value::from(*f),
            QueryParam::Text(s) => serde_json::Value::String(s.clone()),
            QueryParam::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
        }
    }

    /// First row's value for `column`, for single-row aggregate statements
    pub fn scalar(&self, column: &str) -> Option<&serde_json::Value> {
        self.rows.first().and_then(|row| row.get(column))
    }

    /// First row's value for `column` as a non-negative count
    pub fn count(&self, column: &str) -> EtlResult<u64> {
        match self.scalar(column) {
            Some(serde_json::Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .ok_or_else(|| EtlError::query(format!("column {} is not a count: {}", column, n))),
            Some(serde_json::Value::String(s)) => s
                .parse()
                .map_err(|_| EtlError::query(format!("column {} is not a count: {}", column, s))),
            Some(serde_json::Value::Null) | None => Ok(0),
            Some(other) => Err(EtlError::query(format!(
                "column {} is not a count: {}",
                column, other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub database: String,
    pub schema: String,
    pub name: String,
    pub table_type: TableType,
    pub last_modified: Option<DateTime<Utc>>,
    pub row_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Declared foreign-key constraint, one row per column pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub constraint_name: String,
    pub schema: String,
    pub table: String,
    pub column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// How to reach one external source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub kind: SourceKind,
    /// Kind-specific settings (`url`, `host`, `port`, `database`, ...)
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub credentials: Credentials,
}

impl ConnectionConfig {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            settings: BTreeMap::new(),
            credentials: Credentials::default(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

/// Capability interface every source adapter implements
///
/// All methods fail with an [`EtlError`] whose retryable flag drives the
/// activity retry policy.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn test_connection(&self, credentials: &Credentials) -> EtlResult<()>;

    async fn connect(&mut self, credentials: &Credentials) -> EtlResult<()>;

    async fn disconnect(&mut self) -> EtlResult<()>;

    async fn list_databases(&self) -> EtlResult<Vec<String>>;

    async fn list_schemas(&self, database: Option<&str>) -> EtlResult<Vec<String>>;

    async fn list_tables(&self, database: Option<&str>, schema: Option<&str>) -> EtlResult<Vec<TableInfo>>;

    async fn list_columns(&self, database: &str, schema: &str, table: &str) -> EtlResult<Vec<ColumnInfo>>;

    async fn list_foreign_keys(&self, database: Option<&str>, schema: Option<&str>) -> EtlResult<Vec<ForeignKey>>;

    async fn execute_query(&self, sql: &str, params: &[QueryParam]) -> EtlResult<QueryResult>;

    /// Whether [`Connector::execute_streaming_query`] is available
    fn supports_streaming(&self) -> bool {
        false
    }

    async fn execute_streaming_query(&self, _sql: &str, _params: &[QueryParam]) -> EtlResult<RowStream> {
        Err(EtlError::Unsupported(format!(
            "{} connector does not stream",
            self.kind().as_str()
        )))
    }

    /// Run a structured statement; SQL sources render it, others may evaluate it natively
    async fn execute_statement(&self, statement: &Statement) -> EtlResult<QueryResult> {
        let (sql, params) = statement.to_sql();
        self.execute_query(&sql, &params).await
    }

    async fn stream_statement(&self, statement: &Statement) -> EtlResult<RowStream> {
        let (sql, params) = statement.to_sql();
        self.execute_streaming_query(&sql, &params).await
    }

    /// Sources that authenticate with OAuth tokens override this
    fn supports_oauth(&self) -> bool {
        false
    }

    async fn ping(&self) -> EtlResult<()>;

    async fn get_version(&self) -> EtlResult<String>;
}

/// A connected connector owned by one workflow run
///
/// Closing consumes the session, so a run can disconnect at most once.
pub struct ConnectorSession {
    connector: Box<dyn Connector>,
}

impl ConnectorSession {
    /// Connect and wrap; a failed connect leaves nothing to disconnect
    pub async fn open(mut connector: Box<dyn Connector>, credentials: &Credentials) -> EtlResult<Self> {
        connector.connect(credentials).await?;
        Ok(Self { connector })
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub async fn close(mut self) -> EtlResult<()> {
        self.connector.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_result_count() {
        let row = json!({"total_rows": 12, "failed_rows": "3", "missing": null});
        let result = QueryResult::from_rows(vec![row.as_object().cloned().unwrap()]);
        assert_eq!(result.count("total_rows").unwrap(), 12);
        assert_eq!(result.count("failed_rows").unwrap(), 3);
        assert_eq!(result.count("missing").unwrap(), 0);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns.len(), 3);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials {
            username: Some("etl".into()),
            password: Some("hunter2".into()),
            token: None,
        };
        let printed = format!("{:?}", creds);
        assert!(printed.contains("etl"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_connection_config_deserializes() {
        let config: ConnectionConfig = serde_json::from_value(json!({
            "kind": "postgres",
            "settings": {"url": "postgres://localhost/app"},
            "credentials": {"username": "etl"}
        }))
        .unwrap();
        assert_eq!(config.kind, SourceKind::Postgres);
        assert_eq!(config.setting("url"), Some("postgres://localhost/app"));
        assert_eq!(config.credentials.username.as_deref(), Some("etl"));
    }
}
