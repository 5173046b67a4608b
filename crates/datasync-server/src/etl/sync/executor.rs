//! Per-table synchronization
//!
//! Rows are read (streamed when the connector can, otherwise as a sequence
//! of bounded pages), grouped into fixed-size batches and written to
//! the [`RecordSink`]. A failed batch is recorded and the next batch is still
//! processed.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cursor::{resolve_cursor_column, CursorColumn, CursorTracker};
use crate::etl::catalog::TableDescriptor;
use crate::etl::checkpoint::Cursor;
use crate::etl::connector::{Connector, Row, Statement, TableRef};
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::store::RecordSink;
use crate::etl::types::SyncMode;

/// One table to synchronize
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub connection_id: Uuid,
    pub table: &'a TableDescriptor,
    pub mode: SyncMode,
    pub batch_size: usize,
    /// Cursor persisted by an earlier run for this table
    pub cursor: Option<&'a Cursor>,
    pub cursor_column: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub batch_index: usize,
    pub error: String,
    pub records_affected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Rows written by successful batches
    pub records_processed: u64,
    /// Serialized JSON size of the rows written
    pub bytes_transferred: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Mode actually used; incremental falls back to full without a cursor column
    pub mode: SyncMode,
    pub batches: usize,
    /// High-water mark, set for incremental syncs only
    pub checkpoint: Option<Cursor>,
    pub errors: Vec<BatchError>,
}

impl SyncResult {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub struct SyncExecutor {
    sink: Arc<dyn RecordSink>,
    max_rows_per_query: usize,
}

impl SyncExecutor {
    pub fn new(sink: Arc<dyn RecordSink>, max_rows_per_query: usize) -> Self {
        Self {
            sink,
            max_rows_per_query: max_rows_per_query.max(1),
        }
    }

    pub async fn sync_table(&self, connector: &dyn Connector, request: SyncRequest<'_>) -> EtlResult<SyncResult> {
        if request.batch_size == 0 {
            return Err(EtlError::validation("batch_size must be greater than 0"));
        }
        let start_time = Utc::now();
        let table = request.table;
        let qualified = table.qualified_name();

        let (mode, cursor_column) = match request.mode {
            SyncMode::Incremental => match resolve_cursor_column(&table.columns, request.cursor_column) {
                Some(column) => (SyncMode::Incremental, Some(column)),
                None => {
                    warn!(table = %qualified, "no incremental cursor column, falling back to full sync");
                    (SyncMode::Full, None)
                }
            },
            mode => (mode, None),
        };

        let streaming = connector.supports_streaming();
        let filter = cursor_column
            .as_ref()
            .and_then(|column| column.filter_after(request.cursor));
        debug!(table = %qualified, mode = mode.as_str(), streaming, "reading rows");

        let mut tracker = cursor_column.as_ref().map(|column| CursorTracker::new(column.clone()));
        let mut writer = BatchWriter::new(self.sink.as_ref(), request.connection_id, table, request.batch_size);

        if streaming {
            let statement = Statement::SelectRows {
                table: TableRef::from(table),
                filter,
                order_by: cursor_column.map(|column| column.name),
                limit: None,
                offset: None,
            };
            let mut rows = connector.stream_statement(&statement).await?;
            while let Some(row) = rows.next().await {
                let row = row?;
                if let Some(tracker) = tracker.as_mut() {
                    tracker.observe(&row);
                }
                writer.push(row).await;
            }
        } else {
            // Bounded reads, paged until a short page. Pages are ordered by
            // the cursor column, else the first key column.
            let order_by = cursor_column
                .map(|column| column.name)
                .or_else(|| table.key_columns().into_iter().next());
            if order_by.is_none() {
                debug!(table = %qualified, "no cursor or key column, paging in source order");
            }
            let mut offset = 0;
            loop {
                let page = Statement::SelectRows {
                    table: TableRef::from(table),
                    filter: filter.clone(),
                    order_by: order_by.clone(),
                    limit: Some(self.max_rows_per_query),
                    offset: Some(offset),
                };
                let result = connector.execute_statement(&page).await?;
                let fetched = result.rows.len();
                for row in result.rows {
                    if let Some(tracker) = tracker.as_mut() {
                        tracker.observe(&row);
                    }
                    writer.push(row).await;
                }
                if fetched < self.max_rows_per_query {
                    break;
                }
                offset += fetched;
                debug!(table = %qualified, offset, "row limit reached, reading next page");
            }
        }
        writer.flush().await;

        let checkpoint = match (mode, tracker) {
            (SyncMode::Incremental, Some(tracker)) => Some(tracker.finish(request.cursor)),
            _ => None,
        };

        Ok(SyncResult {
            records_processed: writer.records,
            bytes_transferred: writer.bytes,
            start_time,
            end_time: Utc::now(),
            mode,
            batches: writer.batch_index,
            checkpoint,
            errors: writer.errors,
        })
    }

    /// The cursor column a table would use in incremental mode
    pub fn cursor_column(table: &TableDescriptor, override_column: Option<&str>) -> Option<CursorColumn> {
        resolve_cursor_column(&table.columns, override_column)
    }
}

/// Groups rows into batches and accounts for each batch's outcome
struct BatchWriter<'a> {
    sink: &'a dyn RecordSink,
    connection_id: Uuid,
    table: &'a TableDescriptor,
    batch_size: usize,
    pending: Vec<Row>,
    batch_index: usize,
    records: u64,
    bytes: u64,
    errors: Vec<BatchError>,
}

impl<'a> BatchWriter<'a> {
    fn new(sink: &'a dyn RecordSink, connection_id: Uuid, table: &'a TableDescriptor, batch_size: usize) -> Self {
        Self {
            sink,
            connection_id,
            table,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            batch_index: 0,
            records: 0,
            bytes: 0,
            errors: Vec::new(),
        }
    }

    async fn push(&mut self, row: Row) {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        let index = self.batch_index;
        self.batch_index += 1;

        match self.sink.write_batch(self.connection_id, self.table, &batch).await {
            Ok(written) => {
                self.records += written;
                self.bytes += batch
                    .iter()
                    .map(|row| serde_json::to_vec(row).map_or(0, |bytes| bytes.len() as u64))
                    .sum::<u64>();
            }
            Err(err) => {
                warn!(
                    table = %self.table.qualified_name(),
                    batch_index = index,
                    records = batch.len(),
                    error = %err,
                    "batch failed, continuing with next batch"
                );
                self.errors.push(BatchError {
                    batch_index: index,
                    error: err.to_string(),
                    records_affected: batch.len(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::catalog::ColumnDescriptor;
    use crate::etl::connector::{Credentials, MemoryConnector, MemorySource, MemoryTable};
    use crate::etl::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the listed (0-based) write calls, delegates the rest
    struct FailingSink {
        inner: MemoryStore,
        fail_calls: Vec<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordSink for FailingSink {
        async fn write_batch(&self, connection_id: Uuid, table: &TableDescriptor, rows: &[Row]) -> EtlResult<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_calls.contains(&call) {
                return Err(EtlError::storage("disk full"));
            }
            self.inner.write_batch(connection_id, table, rows).await
        }
    }

    fn events_source(streaming: bool, rows: usize) -> MemorySource {
        let source = if streaming {
            MemorySource::streaming("app")
        } else {
            MemorySource::new("app")
        };
        source.add_table(
            MemoryTable::new("public", "events")
                .primary_key("id", "integer")
                .column("updated_at", "timestamp")
                .rows((1..=rows).map(|i| {
                    json!({"id": i, "updated_at": format!("2026-01-01T00:00:{:02}Z", i % 60)})
                })),
        );
        source
    }

    fn events_table() -> TableDescriptor {
        let mut table = TableDescriptor::new("app", "public", "events");
        table.columns = vec![
            ColumnDescriptor::new("id", "integer").primary_key(),
            ColumnDescriptor::new("updated_at", "timestamp"),
        ];
        table
    }

    async fn connector(source: &MemorySource) -> MemoryConnector {
        let mut connector = MemoryConnector::new(source.clone());
        connector.connect(&Credentials::default()).await.unwrap();
        connector
    }

    fn request<'a>(table: &'a TableDescriptor, mode: SyncMode, cursor: Option<&'a Cursor>) -> SyncRequest<'a> {
        SyncRequest {
            connection_id: Uuid::nil(),
            table,
            mode,
            batch_size: 10,
            cursor,
            cursor_column: None,
        }
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        for streaming in [false, true] {
            let source = events_source(streaming, 50);
            let connector = connector(&source).await;
            let sink = Arc::new(FailingSink {
                inner: MemoryStore::new(),
                fail_calls: vec![2],
                calls: AtomicUsize::new(0),
            });
            let executor = SyncExecutor::new(sink.clone(), 1_000);
            let table = events_table();

            let result = executor
                .sync_table(&connector, request(&table, SyncMode::Full, None))
                .await
                .unwrap();

            assert_eq!(result.batches, 5);
            assert_eq!(result.records_processed, 40);
            assert_eq!(result.errors.len(), 1);
            assert_eq!(result.errors[0].batch_index, 2);
            assert_eq!(result.errors[0].records_affected, 10);
            assert_eq!(sink.inner.record_count(Uuid::nil(), "public.events").await, 40);
            assert!(result.checkpoint.is_none());
        }
    }

    #[tokio::test]
    async fn test_bounded_reads_page_past_the_row_limit() {
        for mode in [SyncMode::Full, SyncMode::Snapshot, SyncMode::Incremental] {
            let source = events_source(false, 30);
            let connector = connector(&source).await;
            let store = Arc::new(MemoryStore::new());
            let executor = SyncExecutor::new(store.clone(), 20);
            let table = events_table();

            let result = executor
                .sync_table(&connector, request(&table, mode, None))
                .await
                .unwrap();

            assert_eq!(result.records_processed, 30, "mode {}", mode.as_str());
            assert!(result.errors.is_empty());
            assert_eq!(store.record_count(Uuid::nil(), "public.events").await, 30);
            assert_eq!(source.selected_tables().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_incremental_sync_advances_cursor() {
        let source = MemorySource::new("app");
        source.add_table(
            MemoryTable::new("public", "events")
                .primary_key("id", "integer")
                .column("updated_at", "timestamp")
                .rows([
                    json!({"id": 1, "updated_at": "2026-01-01T00:00:00Z"}),
                    json!({"id": 2, "updated_at": "2026-01-02T00:00:00Z"}),
                ]),
        );
        let connector = connector(&source).await;
        let store = Arc::new(MemoryStore::new());
        let executor = SyncExecutor::new(store.clone(), 1_000);
        let table = events_table();

        let first = executor
            .sync_table(&connector, request(&table, SyncMode::Incremental, None))
            .await
            .unwrap();
        assert_eq!(first.records_processed, 2);
        let cursor = first.checkpoint.unwrap();
        assert_eq!(cursor.last_sync_timestamp.unwrap().to_rfc3339(), "2026-01-02T00:00:00+00:00");

        source
            .insert_rows("public.events", [json!({"id": 3, "updated_at": "2026-01-03T00:00:00Z"})])
            .unwrap();
        let second = executor
            .sync_table(&connector, request(&table, SyncMode::Incremental, Some(&cursor)))
            .await
            .unwrap();
        assert_eq!(second.records_processed, 1);
        assert!(second.checkpoint.unwrap().last_sync_timestamp > cursor.last_sync_timestamp);
    }

    #[tokio::test]
    async fn test_incremental_without_cursor_column_falls_back_to_full() {
        let source = MemorySource::new("app");
        source.add_table(
            MemoryTable::new("public", "tags")
                .column("label", "text")
                .rows([json!({"label": "a"}), json!({"label": "b"})]),
        );
        let connector = connector(&source).await;
        let executor = SyncExecutor::new(Arc::new(MemoryStore::new()), 1_000);
        let mut table = TableDescriptor::new("app", "public", "tags");
        table.columns = vec![ColumnDescriptor::new("label", "text")];

        let result = executor
            .sync_table(&connector, request(&table, SyncMode::Incremental, None))
            .await
            .unwrap();
        assert_eq!(result.mode, SyncMode::Full);
        assert_eq!(result.records_processed, 2);
        assert!(result.checkpoint.is_none());
        assert!(result.bytes_transferred > 0);
    }

    #[tokio::test]
    async fn test_read_failure_fails_the_table() {
        let source = events_source(false, 3);
        source.fail_table("public.events", EtlError::query("permission denied"));
        let connector = connector(&source).await;
        let executor = SyncExecutor::new(Arc::new(MemoryStore::new()), 1_000);
        let table = events_table();

        let err = executor
            .sync_table(&connector, request(&table, SyncMode::Full, None))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Query { .. }));
    }
}
