//! In-process connector over fixed tables
//!
//! [`MemorySource`] holds the data and is shared (cheaply cloned) between the
//! test or dry-run that builds it and every [`MemoryConnector`] session opened
//! on it. It evaluates [`Statement`]s natively; raw SQL is unsupported.
//! Failure injection and call counters make executor behaviour observable.

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use super::{
    ColumnInfo, Connector, Credentials, ForeignKey, QueryParam, QueryResult, Row, RowStream,
    SourceKind, Statement, TableInfo,
};
use crate::etl::catalog::TableType;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::values::{compare_values, value_key};

type RulePredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub schema: String,
    pub name: String,
    pub table_type: TableType,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl MemoryTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            table_type: TableType::Table,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            primary_key: false,
        });
        self
    }

    pub fn primary_key(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push(ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
            primary_key: true,
        });
        self
    }

    pub fn view(mut self) -> Self {
        self.table_type = TableType::View;
        self
    }

    /// Append rows given as JSON objects; non-objects are ignored
    pub fn rows(mut self, rows: impl IntoIterator<Item = Value>) -> Self {
        self.rows
            .extend(rows.into_iter().filter_map(|row| row.as_object().cloned()));
        self
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

struct InjectedFailure {
    error: EtlError,
    /// `None` fails forever
    remaining: Option<usize>,
}

#[derive(Default)]
struct SourceState {
    tables: Vec<MemoryTable>,
    foreign_keys: Vec<ForeignKey>,
    rules: HashMap<String, RulePredicate>,
    table_failures: HashMap<String, InjectedFailure>,
    connect_failure: Option<EtlError>,
    select_log: Vec<String>,
}

struct SourceInner {
    database: String,
    streaming: bool,
    query_delay: Option<Duration>,
    state: RwLock<SourceState>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Shared backing data for memory connectors
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<SourceInner>,
}

impl MemorySource {
    pub fn new(database: impl Into<String>) -> Self {
        Self::build(database.into(), false, None)
    }

    fn build(database: String, streaming: bool, query_delay: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(SourceInner {
                database,
                streaming,
                query_delay,
                state: RwLock::new(SourceState::default()),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            }),
        }
    }

    /// Same data model but rows are served through the streaming interface
    pub fn streaming(database: impl Into<String>) -> Self {
        Self::build(database.into(), true, None)
    }

    /// Sleep before serving each row selection, to leave room for signals
    pub fn with_query_delay(database: impl Into<String>, delay: Duration) -> Self {
        Self::build(database.into(), false, Some(delay))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SourceState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SourceState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    pub fn add_table(&self, table: MemoryTable) {
        self.write().tables.push(table);
    }

    /// Append rows to an existing table (`schema.table`)
    pub fn insert_rows(&self, qualified: &str, rows: impl IntoIterator<Item = Value>) -> EtlResult<()> {
        let mut state = self.write();
        let table = state
            .tables
            .iter_mut()
            .find(|t| t.qualified_name() == qualified)
            .ok_or_else(|| EtlError::query(format!("relation {} does not exist", qualified)))?;
        table
            .rows
            .extend(rows.into_iter().filter_map(|row| row.as_object().cloned()));
        Ok(())
    }

    pub fn add_foreign_key(&self, foreign_key: ForeignKey) {
        self.write().foreign_keys.push(foreign_key);
    }

    /// Register how to evaluate a business-rule predicate
    pub fn add_rule<F>(&self, predicate: &str, rule: F)
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        self.write().rules.insert(predicate.to_string(), Arc::new(rule));
    }

    /// Fail every column listing and row selection on `schema.table`
    pub fn fail_table(&self, qualified: &str, error: EtlError) {
        self.write().table_failures.insert(
            qualified.to_string(),
            InjectedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` row selections on `schema.table`, then recover
    pub fn fail_table_times(&self, qualified: &str, error: EtlError, times: usize) {
        self.write().table_failures.insert(
            qualified.to_string(),
            InjectedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    pub fn fail_connect(&self, error: EtlError) {
        self.write().connect_failure = Some(error);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Tables whose rows were selected, in call order
    pub fn selected_tables(&self) -> Vec<String> {
        self.read().select_log.clone()
    }

    fn check_failure(&self, qualified: &str) -> EtlResult<()> {
        let mut state = self.write();
        let Some(failure) = state.table_failures.get_mut(qualified) else {
            return Ok(());
        };
        match failure.remaining {
            None => Err(failure.error.clone()),
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                Err(failure.error.clone())
            }
        }
    }

    fn table(&self, qualified: &str) -> EtlResult<MemoryTable> {
        self.read()
            .tables
            .iter()
            .find(|t| t.qualified_name() == qualified)
            .cloned()
            .ok_or_else(|| EtlError::query(format!("relation {} does not exist", qualified)))
    }

    fn evaluate(&self, statement: &Statement) -> EtlResult<QueryResult> {
        let qualified = statement.table().qualified_name();
        let table = self.table(&qualified)?;

        match statement {
            Statement::SelectRows {
                filter,
                order_by,
                limit,
                offset,
                ..
            } => {
                self.check_failure(&qualified)?;
                self.write().select_log.push(qualified.clone());

                let mut rows: Vec<Row> = match filter {
                    Some(filter) => {
                        let after = filter.after.to_json();
                        table
                            .rows
                            .into_iter()
                            .filter(|row| {
                                row.get(&filter.column)
                                    .and_then(|v| compare_values(v, &after))
                                    .is_some_and(|o| o.is_gt())
                            })
                            .collect()
                    }
                    None => table.rows,
                };
                if let Some(column) = order_by {
                    rows.sort_by(|a, b| {
                        match (a.get(column), b.get(column)) {
                            (Some(x), Some(y)) => compare_values(x, y),
                            _ => None,
                        }
                        .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                if let Some(offset) = offset {
                    let skip = (*offset).min(rows.len());
                    rows.drain(..skip);
                }
                if let Some(limit) = limit {
                    rows.truncate(*limit);
                }
                Ok(QueryResult::from_rows(rows))
            }
            Statement::ColumnProfile { column, .. } => {
                let values: Vec<&Value> = non_null(&table.rows, column).collect();
                let distinct: BTreeSet<String> = values.iter().map(|v| value_key(v)).collect();
                Ok(single_row([
                    ("total_rows", Value::from(table.rows.len())),
                    ("non_null", Value::from(values.len())),
                    ("distinct_values", Value::from(distinct.len())),
                ]))
            }
            Statement::DuplicateValues { column, limit, .. } => {
                let mut counts: Vec<(Value, usize)> = Vec::new();
                for value in non_null(&table.rows, column) {
                    match counts.iter_mut().find(|(v, _)| v == value) {
                        Some((_, n)) => *n += 1,
                        None => counts.push((value.clone(), 1)),
                    }
                }
                counts.retain(|(_, n)| *n > 1);
                counts.sort_by(|a, b| b.1.cmp(&a.1));
                counts.truncate(*limit);
                let rows = counts
                    .into_iter()
                    .map(|(value, n)| {
                        let mut row = Row::new();
                        row.insert("value".into(), value);
                        row.insert("occurrences".into(), Value::from(n));
                        row
                    })
                    .collect();
                Ok(QueryResult::from_rows(rows))
            }
            Statement::NonNullValues { column, limit, .. } => {
                let rows = non_null(&table.rows, column)
                    .take(*limit)
                    .map(|value| {
                        let mut row = Row::new();
                        row.insert("value".into(), value.clone());
                        row
                    })
                    .collect();
                Ok(QueryResult::from_rows(rows))
            }
            Statement::MaxValue { column, .. } => {
                let max = non_null(&table.rows, column)
                    .fold(None::<&Value>, |acc, v| match acc {
                        Some(current) if compare_values(v, current).is_some_and(|o| o.is_le()) => acc,
                        _ => Some(v),
                    })
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(single_row([("max_value", max)]))
            }
            Statement::RuleViolations { predicate, .. } => {
                let rule = self.read().rules.get(predicate).cloned().ok_or_else(|| {
                    EtlError::Unsupported(format!("no evaluator registered for predicate: {}", predicate))
                })?;
                let failed = table.rows.iter().filter(|row| !rule(row)).count();
                Ok(single_row([
                    ("total_rows", Value::from(table.rows.len())),
                    ("failed_rows", Value::from(failed)),
                ]))
            }
        }
    }
}

fn non_null<'a>(rows: &'a [Row], column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    rows.iter()
        .filter_map(move |row| row.get(column))
        .filter(|v| !v.is_null())
}

fn single_row<const N: usize>(fields: [(&str, Value); N]) -> QueryResult {
    let row: Row = fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    QueryResult::from_rows(vec![row])
}

/// Connector session over a [`MemorySource`]
pub struct MemoryConnector {
    source: MemorySource,
    connected: bool,
}

impl MemoryConnector {
    pub fn new(source: MemorySource) -> Self {
        Self {
            source,
            connected: false,
        }
    }

    fn ensure_connected(&self) -> EtlResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(EtlError::Connection {
                message: "memory connector is not connected".into(),
                retryable: false,
            })
        }
    }

    async fn delay(&self) {
        if let Some(delay) = self.source.inner.query_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn kind(&self) -> SourceKind {
        SourceKind::Memory
    }

    async fn test_connection(&self, _credentials: &Credentials) -> EtlResult<()> {
        match &self.source.read().connect_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn connect(&mut self, credentials: &Credentials) -> EtlResult<()> {
        self.test_connection(credentials).await?;
        self.source.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> EtlResult<()> {
        if self.connected {
            self.source.inner.disconnects.fetch_add(1, Ordering::SeqCst);
            self.connected = false;
        }
        Ok(())
    }

    async fn list_databases(&self) -> EtlResult<Vec<String>> {
        self.ensure_connected()?;
        Ok(vec![self.source.database().to_string()])
    }

    async fn list_schemas(&self, database: Option<&str>) -> EtlResult<Vec<String>> {
        self.ensure_connected()?;
        if database.is_some_and(|db| db != self.source.database()) {
            return Ok(Vec::new());
        }
        let schemas: BTreeSet<String> = self.source.read().tables.iter().map(|t| t.schema.clone()).collect();
        Ok(schemas.into_iter().collect())
    }

    async fn list_tables(&self, database: Option<&str>, schema: Option<&str>) -> EtlResult<Vec<TableInfo>> {
        self.ensure_connected()?;
        if database.is_some_and(|db| db != self.source.database()) {
            return Ok(Vec::new());
        }
        Ok(self
            .source
            .read()
            .tables
            .iter()
            .filter(|t| schema.map_or(true, |s| s == t.schema))
            .map(|t| TableInfo {
                database: self.source.database().to_string(),
                schema: t.schema.clone(),
                name: t.name.clone(),
                table_type: t.table_type,
                last_modified: None,
                row_count: Some(t.rows.len() as u64),
            })
            .collect())
    }

    async fn list_columns(&self, _database: &str, schema: &str, table: &str) -> EtlResult<Vec<ColumnInfo>> {
        self.ensure_connected()?;
        let qualified = format!("{}.{}", schema, table);
        if let Some(failure) = self.source.read().table_failures.get(&qualified) {
            if failure.remaining.is_none() {
                return Err(failure.error.clone());
            }
        }
        Ok(self.source.table(&qualified)?.columns)
    }

    async fn list_foreign_keys(&self, _database: Option<&str>, schema: Option<&str>) -> EtlResult<Vec<ForeignKey>> {
        self.ensure_connected()?;
        Ok(self
            .source
            .read()
            .foreign_keys
            .iter()
            .filter(|fk| schema.map_or(true, |s| s == fk.schema))
            .cloned()
            .collect())
    }

    async fn execute_query(&self, sql: &str, _params: &[QueryParam]) -> EtlResult<QueryResult> {
        Err(EtlError::Unsupported(format!(
            "memory connector cannot run raw SQL: {}",
            sql
        )))
    }

    fn supports_streaming(&self) -> bool {
        self.source.inner.streaming
    }

    async fn execute_statement(&self, statement: &Statement) -> EtlResult<QueryResult> {
        self.ensure_connected()?;
        if matches!(statement, Statement::SelectRows { .. }) {
            self.delay().await;
        }
        self.source.evaluate(statement)
    }

    async fn stream_statement(&self, statement: &Statement) -> EtlResult<RowStream> {
        if !self.supports_streaming() {
            return Err(EtlError::Unsupported("memory source is not streaming".into()));
        }
        let result = self.execute_statement(statement).await?;
        Ok(Box::pin(stream::iter(result.rows.into_iter().map(Ok))))
    }

    async fn ping(&self) -> EtlResult<()> {
        self.ensure_connected()
    }

    async fn get_version(&self) -> EtlResult<String> {
        Ok(format!("memory {}", env!("CARGO_PKG_VERSION")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::connector::{CursorFilter, TableRef};
    use serde_json::json;

    fn source() -> MemorySource {
        let source = MemorySource::new("shop");
        source.add_table(
            MemoryTable::new("public", "orders")
                .primary_key("id", "integer")
                .column("status", "text")
                .rows([
                    json!({"id": 3, "status": "paid"}),
                    json!({"id": 1, "status": null}),
                    json!({"id": 2, "status": "paid"}),
                ]),
        );
        source
    }

    async fn connected(source: &MemorySource) -> MemoryConnector {
        let mut connector = MemoryConnector::new(source.clone());
        connector.connect(&Credentials::default()).await.unwrap();
        connector
    }

    #[tokio::test]
    async fn test_select_with_cursor_filter_and_order() {
        let source = source();
        let connector = connected(&source).await;
        let result = connector
            .execute_statement(&Statement::SelectRows {
                table: TableRef::new("public", "orders"),
                filter: Some(CursorFilter {
                    column: "id".into(),
                    after: QueryParam::Int(1),
                }),
                order_by: Some("id".into()),
                limit: None,
                offset: None,
            })
            .await
            .unwrap();
        let ids: Vec<_> = result.rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(2), json!(3)]);
        assert_eq!(source.selected_tables(), vec!["public.orders"]);
    }

    #[tokio::test]
    async fn test_profile_duplicates_and_max() {
        let source = source();
        let connector = connected(&source).await;
        let table = TableRef::new("public", "orders");

        let profile = connector
            .execute_statement(&Statement::ColumnProfile {
                table: table.clone(),
                column: "status".into(),
            })
            .await
            .unwrap();
        assert_eq!(profile.count("total_rows").unwrap(), 3);
        assert_eq!(profile.count("non_null").unwrap(), 2);
        assert_eq!(profile.count("distinct_values").unwrap(), 1);

        let dups = connector
            .execute_statement(&Statement::DuplicateValues {
                table: table.clone(),
                column: "status".into(),
                limit: 5,
            })
            .await
            .unwrap();
        assert_eq!(dups.rows[0]["value"], json!("paid"));
        assert_eq!(dups.rows[0]["occurrences"], json!(2));

        let max = connector
            .execute_statement(&Statement::MaxValue {
                table,
                column: "id".into(),
            })
            .await
            .unwrap();
        assert_eq!(max.scalar("max_value"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_rule_violations_use_registered_predicate() {
        let source = source();
        source.add_rule("status IS NOT NULL", |row| {
            row.get("status").is_some_and(|v| !v.is_null())
        });
        let connector = connected(&source).await;
        let result = connector
            .execute_statement(&Statement::RuleViolations {
                table: TableRef::new("public", "orders"),
                predicate: "status IS NOT NULL".into(),
            })
            .await
            .unwrap();
        assert_eq!(result.count("failed_rows").unwrap(), 1);

        let missing = connector
            .execute_statement(&Statement::RuleViolations {
                table: TableRef::new("public", "orders"),
                predicate: "id > 0".into(),
            })
            .await;
        assert!(matches!(missing, Err(EtlError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let source = source();
        source.fail_table_times("public.orders", EtlError::connection("reset"), 1);
        let connector = connected(&source).await;
        let select = Statement::SelectRows {
            table: TableRef::new("public", "orders"),
            filter: None,
            order_by: None,
            limit: None,
            offset: None,
        };
        assert!(connector.execute_statement(&select).await.is_err());
        assert_eq!(connector.execute_statement(&select).await.unwrap().row_count, 3);
    }

    #[tokio::test]
    async fn test_disconnect_counts_once_per_session() {
        let source = source();
        let mut connector = connected(&source).await;
        connector.disconnect().await.unwrap();
        connector.disconnect().await.unwrap();
        assert_eq!(source.connect_count(), 1);
        assert_eq!(source.disconnect_count(), 1);
        assert!(connector.list_databases().await.is_err());
    }
}
