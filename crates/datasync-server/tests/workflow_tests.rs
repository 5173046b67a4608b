//! End-to-end workflow behaviour against the in-memory source and stores
//!
//! Each test drives a real [`WorkflowRuntime`] and observes it only through
//! its public surface: handles, status snapshots and the stores.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use datasync_server::etl::catalog::TableDescriptor;
use datasync_server::etl::connector::{MemorySource, MemoryTable, Row};
use datasync_server::etl::quality::{table_report, CheckDetails, CheckKind, QualityCheckResult};
use datasync_server::etl::store::{
    CatalogStore, CheckpointStore, MemoryStore, QualityReportStore, RecordSink, RunStore,
};
use datasync_server::etl::types::Severity;
use datasync_server::etl::workflow::NotificationConfig;
use datasync_server::etl::{
    Checkpoint, Cursor, EtlError, EtlResult, Phase, QualityConfig, Signal, SyncMode, WorkflowHandle,
    WorkflowKind, WorkflowStatus,
};

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::{delayed_source, event_rows, events_table, memory_input, numbered_source, test_config, Harness};

const WAIT: Duration = Duration::from_secs(10);

async fn finished(handle: &WorkflowHandle) -> WorkflowStatus {
    tokio::time::timeout(WAIT, handle.wait())
        .await
        .expect("workflow did not finish in time")
}

/// Poll until `pred` holds for the live status
async fn wait_until<F>(handle: &WorkflowHandle, pred: F) -> WorkflowStatus
where
    F: Fn(&WorkflowStatus) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let status = handle.status().await;
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Poll until the persisted status shows the run paused
///
/// A paused run persists its status when it parks before its next unit.
async fn suspended(store: &MemoryStore, workflow_id: &str) -> WorkflowStatus {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(status) = store.load_status(workflow_id).await.unwrap() {
                if status.paused {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("run did not suspend in time")
}

/// Fails the listed (0-based) write calls, delegates the rest
struct FailingSink {
    inner: Arc<MemoryStore>,
    fail_calls: Vec<usize>,
    calls: AtomicUsize,
}

#[async_trait]
impl RecordSink for FailingSink {
    async fn write_batch(&self, connection_id: Uuid, table: &TableDescriptor, rows: &[Row]) -> EtlResult<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_calls.contains(&call) {
            return Err(EtlError::storage("could not extend file: no space left on device"));
        }
        self.inner.write_batch(connection_id, table, rows).await
    }
}

#[tokio::test]
async fn test_full_sync_completes() {
    let harness = Harness::new(numbered_source(3, 25));
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Sync, connection_id);
    input.sync.batch_size = Some(10);

    let handle = harness.runtime.start(input).await.unwrap();
    let status = finished(&handle).await;

    assert_eq!(status.phase, Phase::Completed);
    assert!(status.errors.is_empty());
    assert_eq!(status.progress.total_tables, 3);
    assert_eq!(status.progress.processed_tables, 3);
    assert_eq!(status.metrics.records_transferred, 75);
    assert!(status.metrics.bytes_transferred > 0);
    assert!(status.metrics.end_time.is_some());
    assert_eq!(harness.store.record_count(connection_id, "public.t01").await, 25);

    let checkpoint = harness.store.load(&handle.workflow_id).await.unwrap().unwrap();
    assert!(checkpoint.completed);
    assert_eq!(checkpoint.table_index, 3);
    assert_eq!(harness.source.connect_count(), 1);
    assert_eq!(harness.source.disconnect_count(), 1);
}

#[tokio::test]
async fn test_incremental_sync_never_reprocesses_rows() {
    let source = MemorySource::new("app");
    source.add_table(events_table("public", "events", event_rows(1, 10)));
    let harness = Harness::new(source.clone());
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Sync, connection_id);
    input.sync.mode = SyncMode::Incremental;

    let first = finished(&harness.runtime.start(input.clone()).await.unwrap()).await;
    assert_eq!(first.phase, Phase::Completed);
    assert_eq!(first.metrics.records_transferred, 10);

    let workflow_id = input.workflow_id();
    let watermark = |checkpoint: &Checkpoint| {
        checkpoint
            .cursor_for("public.events")
            .and_then(|c| c.last_sync_timestamp)
    };
    let after_first = watermark(&harness.store.load(&workflow_id).await.unwrap().unwrap());
    assert_eq!(after_first, Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 10, 0).unwrap()));

    source.insert_rows("public.events", event_rows(11, 5)).unwrap();
    let second = finished(&harness.runtime.start(input.clone()).await.unwrap()).await;
    assert_eq!(second.metrics.records_transferred, 5);

    let after_second = watermark(&harness.store.load(&workflow_id).await.unwrap().unwrap());
    assert!(after_second > after_first);

    let third = finished(&harness.runtime.start(input).await.unwrap()).await;
    assert_eq!(third.phase, Phase::Completed);
    assert_eq!(third.metrics.records_transferred, 0);
    assert_eq!(harness.store.record_count(connection_id, "public.events").await, 15);
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_later_batches() {
    let source = MemorySource::new("app");
    source.add_table(events_table("public", "events", event_rows(1, 50)));
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(FailingSink {
        inner: store.clone(),
        fail_calls: vec![2],
        calls: AtomicUsize::new(0),
    });
    let harness = Harness::with_sink(source, sink);
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Sync, connection_id);
    input.sync.batch_size = Some(10);

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;

    assert_eq!(status.phase, Phase::Completed);
    assert_eq!(status.metrics.records_transferred, 40);
    assert_eq!(store.record_count(connection_id, "public.events").await, 40);
    assert_eq!(status.errors.len(), 1);
    let entry = &status.errors[0];
    assert_eq!(entry.severity, Severity::Warning);
    assert!(entry.message.contains("1 of 5 batches failed"), "{}", entry.message);
    assert!(entry.message.contains("10 records"));
}

#[tokio::test]
async fn test_processed_never_exceeds_total() {
    let source = delayed_source(6, 5, Duration::from_millis(5));
    source.fail_table_times("public.t02", EtlError::query("permission denied for table t02"), 1);
    source.fail_table_times("public.t04", EtlError::query("permission denied for table t04"), 1);
    let harness = Harness::new(source);
    let input = memory_input(WorkflowKind::Sync, Uuid::new_v4());

    let handle = harness.runtime.start(input).await.unwrap();
    let observer = {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut snapshots = Vec::new();
            while !handle.is_finished() {
                snapshots.push(handle.status().await.progress);
                tokio::task::yield_now().await;
            }
            snapshots
        })
    };

    let status = finished(&handle).await;
    let snapshots = observer.await.unwrap();

    assert!(!snapshots.is_empty());
    for progress in snapshots.iter().chain(std::iter::once(&status.progress)) {
        assert!(progress.processed_tables <= progress.total_tables, "{:?}", progress);
    }
    assert_eq!(status.phase, Phase::Completed);
    assert_eq!(status.progress.processed_tables, 6);
    assert_eq!(status.metrics.tables_skipped, 2);
    assert_eq!(status.errors.len(), 2);
}

#[tokio::test]
async fn test_pause_holds_progress_until_resume() {
    let source = delayed_source(8, 3, Duration::from_millis(30));
    let harness = Harness::new(source.clone());
    let input = memory_input(WorkflowKind::Sync, Uuid::new_v4());

    let handle = harness.runtime.start(input).await.unwrap();
    wait_until(&handle, |s| s.phase == Phase::Syncing && s.progress.processed_tables >= 1).await;
    handle.signal(Signal::Pause).await.unwrap();

    suspended(&harness.store, &handle.workflow_id).await;
    let held = handle.status().await;
    let selected = source.selected_tables().len();
    assert!(held.paused);
    assert_eq!(held.phase, Phase::Syncing);
    assert!(held.progress.processed_tables < 8);

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let again = handle.status().await;
        assert_eq!(again.progress.processed_tables, held.progress.processed_tables);
        assert_eq!(source.selected_tables().len(), selected);
    }

    let paused_checkpoint = harness
        .store
        .checkpoint_writes()
        .await
        .into_iter()
        .find(|c| !c.completed)
        .expect("checkpoint written on pause");
    assert_eq!(paused_checkpoint.table_index, held.progress.processed_tables);

    handle.signal(Signal::Resume).await.unwrap();
    let status = finished(&handle).await;
    assert_eq!(status.phase, Phase::Completed);
    assert!(!status.paused);
    assert_eq!(status.progress.processed_tables, 8);
    assert_eq!(source.selected_tables().len(), 8);
}

#[tokio::test]
async fn test_cancel_fails_run_and_disconnects_once() {
    let source = delayed_source(8, 3, Duration::from_millis(30));
    let harness = Harness::new(source.clone());
    let input = memory_input(WorkflowKind::Sync, Uuid::new_v4());

    let handle = harness.runtime.start(input).await.unwrap();
    wait_until(&handle, |s| s.progress.processed_tables >= 1 && s.phase == Phase::Syncing).await;
    handle.signal(Signal::Cancel).await.unwrap();

    let status = finished(&handle).await;
    assert_eq!(status.phase, Phase::Failed);
    assert!(status.progress.processed_tables < 8);
    let last = status.errors.last().unwrap();
    assert!(last.message.contains("cancelled"), "{}", last.message);
    assert_eq!(source.connect_count(), 1);
    assert_eq!(source.disconnect_count(), 1);

    // The cancelled run leaves a resumable checkpoint behind
    let checkpoint = harness.store.load(&handle.workflow_id).await.unwrap().unwrap();
    assert!(!checkpoint.completed);
    assert_eq!(checkpoint.table_index, status.progress.processed_tables);
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let source = delayed_source(4, 2, Duration::from_millis(20));
    let harness = Harness::new(source.clone());
    let handle = harness
        .runtime
        .start(memory_input(WorkflowKind::Sync, Uuid::new_v4()))
        .await
        .unwrap();

    handle.signal(Signal::Pause).await.unwrap();
    suspended(&harness.store, &handle.workflow_id).await;
    assert!(!handle.is_finished());
    handle.signal(Signal::Cancel).await.unwrap();

    let status = finished(&handle).await;
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.errors.last().unwrap().message, "cancelled by user");
    assert_eq!(source.disconnect_count(), 1);
    assert!(handle.signal(Signal::Resume).await.is_err());
}

#[tokio::test]
async fn test_error_budget_aborts_remaining_tables() {
    let source = numbered_source(14, 2);
    for i in 0..14 {
        let table = format!("public.t{:02}", i);
        source.fail_table_times(&table, EtlError::query(format!("relation {} is locked", table)), 1);
    }
    let harness = Harness::new(source.clone());
    let input = memory_input(WorkflowKind::Sync, Uuid::new_v4());

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;

    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.progress.processed_tables, 11);
    assert_eq!(status.progress.total_tables, 14);
    assert_eq!(source.selected_tables().len(), 11);
    assert_eq!(status.metrics.tables_skipped, 11);
    // 11 unit failures plus the terminal entry
    assert_eq!(status.errors.len(), 12);
    assert_eq!(status.errors.last().unwrap().message, "too many sync errors, aborting");
    assert_eq!(source.disconnect_count(), 1);
}

#[tokio::test]
async fn test_error_budget_is_configurable() {
    let source = numbered_source(5, 2);
    for i in 0..3 {
        source.fail_table_times(&format!("public.t{:02}", i), EtlError::query("locked"), 1);
    }
    let config = datasync_server::etl::EtlConfig {
        error_budget: 2,
        ..test_config()
    };
    let harness = Harness::with_config(source, config);

    let status = finished(
        &harness
            .runtime
            .start(memory_input(WorkflowKind::Sync, Uuid::new_v4()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.progress.processed_tables, 3);
}

#[tokio::test]
async fn test_resume_from_checkpoint_at_table_nine() {
    let source = numbered_source(12, 8);
    let harness = Harness::new(source.clone());
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Sync, connection_id);
    input.sync.mode = SyncMode::Incremental;
    let workflow_id = input.workflow_id();

    let mut interrupted = Checkpoint::new(workflow_id.clone(), Uuid::new_v4());
    interrupted.advance_to(9);
    interrupted.per_table_cursor.insert(
        "public.t09".into(),
        Cursor {
            last_sync_timestamp: Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 5, 0).unwrap()),
            ..Cursor::default()
        },
    );
    harness.store.save(&interrupted).await.unwrap();

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;

    assert_eq!(status.phase, Phase::Completed);
    assert_eq!(source.selected_tables(), vec!["public.t09", "public.t10", "public.t11"]);
    assert_eq!(harness.store.record_count(connection_id, "public.t00").await, 0);
    // t09 continues after its persisted cursor: rows 6..=8 only
    assert_eq!(harness.store.record_count(connection_id, "public.t09").await, 3);
    assert_eq!(harness.store.record_count(connection_id, "public.t10").await, 8);
    assert_eq!(status.metrics.records_transferred, 3 + 8 + 8);
    assert_eq!(status.progress.processed_tables, 12);

    let checkpoint = harness.store.load(&workflow_id).await.unwrap().unwrap();
    assert!(checkpoint.completed);
    assert_eq!(checkpoint.table_index, 12);
}

#[tokio::test]
async fn test_discovery_infers_primary_keys_and_relationships() {
    let source = MemorySource::new("shop");
    source.add_table(
        MemoryTable::new("public", "customers")
            .primary_key("id", "integer")
            .column("email", "text")
            .rows([json!({"id": 1, "email": "a@x.io"}), json!({"id": 2, "email": "b@x.io"})]),
    );
    source.add_table(
        MemoryTable::new("public", "orders")
            .column("order_id", "integer")
            .column("customer_id", "integer")
            .column("notes", "text")
            .rows([
                json!({"order_id": 10, "customer_id": 1, "notes": "gift"}),
                json!({"order_id": 11, "customer_id": 2, "notes": "rush"}),
                json!({"order_id": 12, "customer_id": 2, "notes": "late"}),
            ]),
    );
    let harness = Harness::new(source);
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Discovery, connection_id);
    input.discovery.include_sample_data = true;

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;
    assert_eq!(status.phase, Phase::Completed);

    let snapshot = harness.store.load_snapshot(connection_id).await.unwrap().unwrap();
    let orders = snapshot.tables.iter().find(|t| t.name == "orders").unwrap();
    let candidates: Vec<(&str, f64)> = orders
        .primary_key_candidates
        .iter()
        .map(|c| (c.columns[0].as_str(), c.confidence))
        .collect();
    assert_eq!(candidates, vec![("order_id", 0.95), ("notes", 0.8)]);
    assert_eq!(orders.sample_rows.len(), 3);
    assert!(orders
        .relationships
        .iter()
        .any(|r| r.target_table == "customers" && r.confidence == 0.7));

    let customers = snapshot.tables.iter().find(|t| t.name == "customers").unwrap();
    assert_eq!(customers.primary_key_candidates[0].confidence, 1.0);
    assert!(customers.primary_key_candidates[0].explicit);
}

fn scored(kind: CheckKind, score: f64, severity: Severity) -> QualityCheckResult {
    QualityCheckResult {
        check_type: kind,
        table: "public.orders".into(),
        column: Some("amount".into()),
        rule_name: None,
        passed: score >= 0.95,
        score,
        threshold: 0.95,
        severity,
        details: CheckDetails::default(),
        suggestions: Vec::new(),
        error: None,
    }
}

#[test]
fn test_table_score_is_mean_of_checks() {
    let report = table_report(
        "public.orders",
        vec![
            scored(CheckKind::Completeness, 1.0, Severity::Warning),
            scored(CheckKind::Validity, 0.5, Severity::Warning),
            scored(CheckKind::Uniqueness, 0.0, Severity::Error),
        ],
    );
    assert!((report.score - 0.5).abs() < 1e-9);
    assert_eq!(report.critical_issues, 1);
    assert_eq!(report.warnings, 1);
}

#[tokio::test]
async fn test_quality_workflow_aggregates_and_persists_report() {
    let source = MemorySource::new("app");
    source.add_table(
        MemoryTable::new("public", "customers")
            .primary_key("id", "integer")
            .column("email", "text")
            .rows([
                json!({"id": 1, "email": "a@x.io"}),
                json!({"id": 2, "email": null}),
                json!({"id": 3, "email": "c@x.io"}),
                json!({"id": 4, "email": null}),
            ]),
    );
    let harness = Harness::new(source);
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Quality, connection_id);
    input.quality = Some(QualityConfig {
        checks: vec![CheckKind::Completeness, CheckKind::Uniqueness],
        ..QualityConfig::default()
    });

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;
    assert_eq!(status.phase, Phase::Completed);

    let report = harness.store.latest_report(connection_id).await.unwrap().unwrap();
    assert_eq!(report.tables.len(), 1);
    let table = &report.tables[0];
    assert!(!table.checks.is_empty());
    let mean = table.checks.iter().map(|c| c.score).sum::<f64>() / table.checks.len() as f64;
    assert!((table.score - mean).abs() < 1e-9);
    assert!((report.overall_score - table.score).abs() < 1e-9);

    let email = table
        .checks
        .iter()
        .find(|c| c.check_type == CheckKind::Completeness && c.column.as_deref() == Some("email"))
        .unwrap();
    assert!((email.score - 0.5).abs() < 1e-9);
    assert!(!email.passed);
    assert_eq!(
        report.critical_issues + report.warnings,
        table.checks.iter().filter(|c| !c.passed).count()
    );
}

#[tokio::test]
async fn test_second_start_of_running_workflow_is_rejected() {
    let source = MemorySource::with_query_delay("app", Duration::from_millis(30));
    source.add_table(events_table("public", "events", event_rows(1, 3)));
    let harness = Harness::new(source);
    let input = memory_input(WorkflowKind::Sync, Uuid::new_v4());

    let handle = harness.runtime.start(input.clone()).await.unwrap();
    let second = harness.runtime.start(input.clone()).await;
    assert!(matches!(second, Err(EtlError::AlreadyRunning(_))));

    finished(&handle).await;
    let rerun = harness.runtime.start(input).await.unwrap();
    assert_ne!(rerun.run_id, handle.run_id);
    finished(&rerun).await;
}

#[tokio::test]
async fn test_connect_failure_fails_run_with_terminal_error() {
    let source = numbered_source(1, 1);
    source.fail_connect(EtlError::Authentication("password authentication failed".into()));
    let harness = Harness::new(source.clone());

    let status = finished(
        &harness
            .runtime
            .start(memory_input(WorkflowKind::Discovery, Uuid::new_v4()))
            .await
            .unwrap(),
    )
    .await;

    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.errors.len(), 1);
    assert!(status.errors[0].message.contains("password authentication failed"));
    assert_eq!(source.disconnect_count(), 0);
}

#[tokio::test]
async fn test_status_query_after_finish() {
    let harness = Harness::new(numbered_source(1, 2));
    let input = memory_input(WorkflowKind::Sync, Uuid::new_v4());
    let handle = harness.runtime.start(input).await.unwrap();
    let live = finished(&handle).await;

    let status = harness.runtime.status(&handle.workflow_id).await.unwrap();
    assert_eq!(status, live);
    assert!(matches!(
        harness.runtime.status("missing").await,
        Err(EtlError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_finished_run_sends_webhook_notification() {
    let server = MockServer::start().await;
    let connection_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/hooks/etl"))
        .and(body_partial_json(json!({
            "type": "sync_completed",
            "connection_id": connection_id,
            "workflow_id": format!("sync-{}", connection_id),
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(numbered_source(2, 3));
    let mut input = memory_input(WorkflowKind::Sync, connection_id);
    input.notification = Some(NotificationConfig::Webhook {
        url: format!("{}/hooks/etl", server.uri()),
    });

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;
    assert_eq!(status.phase, Phase::Completed);

    server.verify().await;
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["payload"]["metrics"]["records_transferred"], 6);
}

#[tokio::test]
async fn test_failed_run_notifies_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"type": "sync_failed"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let source = numbered_source(1, 2);
    source.fail_connect(EtlError::Authentication("password authentication failed".into()));
    let harness = Harness::new(source);
    let mut input = memory_input(WorkflowKind::Sync, Uuid::new_v4());
    input.notification = Some(NotificationConfig::Webhook { url: server.uri() });

    let status = finished(&harness.runtime.start(input).await.unwrap()).await;
    assert_eq!(status.phase, Phase::Failed);
    server.verify().await;
}

#[tokio::test]
async fn test_notification_failure_keeps_terminal_phase() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(numbered_source(1, 4));
    let connection_id = Uuid::new_v4();
    let mut input = memory_input(WorkflowKind::Sync, connection_id);
    input.notification = Some(NotificationConfig::Webhook { url: server.uri() });

    let handle = harness.runtime.start(input).await.unwrap();
    let status = finished(&handle).await;

    assert_eq!(status.phase, Phase::Completed);
    assert!(status.errors.is_empty());
    assert_eq!(harness.store.record_count(connection_id, "public.t00").await, 4);
    let persisted = harness.store.load_status(&handle.workflow_id).await.unwrap().unwrap();
    assert_eq!(persisted.phase, Phase::Completed);
    server.verify().await;
}

#[tokio::test]
async fn test_finished_handles_beyond_retention_are_dropped() {
    let config = datasync_server::etl::EtlConfig {
        retained_finished_runs: 1,
        ..test_config()
    };
    let harness = Harness::with_config(numbered_source(1, 2), config);

    let mut workflow_ids = Vec::new();
    for _ in 0..3 {
        let handle = harness
            .runtime
            .start(memory_input(WorkflowKind::Sync, Uuid::new_v4()))
            .await
            .unwrap();
        finished(&handle).await;
        workflow_ids.push(handle.workflow_id.clone());
    }

    // The third start kept only the newest finished run alongside itself
    assert!(harness.runtime.handle(&workflow_ids[0]).await.is_none());
    assert!(harness.runtime.handle(&workflow_ids[1]).await.is_some());
    assert!(harness.runtime.handle(&workflow_ids[2]).await.is_some());
    assert_eq!(harness.runtime.list().await.len(), 2);

    // Dropped runs are still answered from the run store
    let status = harness.runtime.status(&workflow_ids[0]).await.unwrap();
    assert_eq!(status.phase, Phase::Completed);
    assert_eq!(status.metrics.records_transferred, 2);
}
