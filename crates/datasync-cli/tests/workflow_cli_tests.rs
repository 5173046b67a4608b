//! End-to-end tests for the datasync binary against a mocked server
//!
//! Covers the workflow commands, catalog/report views, `--json` passthrough
//! and the mapping of server errors to exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_partial_json, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use datasync_cli::api::ApiClient;
use datasync_cli::CliError;

const CONNECTION_ID: &str = "6f1c2a4e-8d0b-4c5e-9a37-2b1d0e7f4c11";

fn status_body(phase: &str, paused: bool, processed: usize) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "data": {
            "workflow_id": "sync-1",
            "run_id": "0d6a3a9c-1111-4f9e-8c55-7d3f2c1b0a99",
            "connection_id": CONNECTION_ID,
            "kind": "sync",
            "phase": phase,
            "paused": paused,
            "progress": {
                "total_tables": 3,
                "processed_tables": processed,
                "records_processed": 120,
                "current_object": "public.orders"
            },
            "errors": [{
                "object": "app.public.invoices",
                "message": "relation does not exist",
                "kind": "query",
                "severity": "error",
                "retryable": false
            }],
            "metrics": {
                "records_transferred": 120,
                "bytes_transferred": 4096,
                "tables_skipped": 1,
                "start_time": "2026-03-01T10:00:00Z",
                "end_time": null
            }
        }
    })
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": { "code": code, "message": message }
    })
}

fn datasync(server: &MockServer) -> Command {
    let mut cmd = Command::cargo_bin("datasync").unwrap();
    cmd.env_remove("DATASYNC_SERVER_URL")
        .arg("--server-url")
        .arg(server.uri());
    cmd
}

#[tokio::test]
async fn test_workflow_start_posts_input_file() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .and(body_partial_json(serde_json::json!({"kind": "sync"})))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
            "success": true,
            "data": {"workflow_id": "sync-1", "run_id": "0d6a3a9c-1111-4f9e-8c55-7d3f2c1b0a99"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.json");
    fs::write(
        &input,
        format!(r#"{{"connection_id": "{}", "kind": "sync", "connection": {{"kind": "memory"}}}}"#, CONNECTION_ID),
    )
    .unwrap();

    datasync(&mock_server)
        .args(["workflow", "start", "--file"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Started"))
        .stdout(predicate::str::contains("sync-1"));
}

#[tokio::test]
async fn test_workflow_start_missing_file() {
    let mock_server = MockServer::start().await;

    datasync(&mock_server)
        .args(["workflow", "start", "--file", "/nonexistent/input.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Cannot read"));
}

#[tokio::test]
async fn test_workflow_status_table() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/sync-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("syncing", true, 2)))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .env("NO_COLOR", "1")
        .args(["workflow", "status", "sync-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("syncing (paused)"))
        .stdout(predicate::str::contains("2/3"))
        .stdout(predicate::str::contains("relation does not exist"));
}

#[tokio::test]
async fn test_workflow_status_json_passthrough() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/sync-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("completed", false, 3)))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .args(["workflow", "status", "sync-1", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""phase": "completed""#))
        .stdout(predicate::str::contains(r#""kind": "query""#));
}

#[tokio::test]
async fn test_unknown_workflow_exits_with_not_found() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(error_body("NOT_FOUND", "workflow missing not found")),
        )
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .args(["workflow", "status", "missing"])
        .assert()
        .failure()
        .code(4)
        .stderr(predicate::str::contains("workflow missing not found"));
}

#[tokio::test]
async fn test_signals_hit_their_endpoints() {
    let mock_server = MockServer::start().await;
    for signal in ["pause", "resume", "cancel"] {
        Mock::given(method("POST"))
            .and(path(format!("/api/v1/workflows/sync-1/{}", signal)))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "success": true,
                "data": {"workflow_id": "sync-1", "signal": signal}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    for signal in ["pause", "resume", "cancel"] {
        datasync(&mock_server)
            .args(["workflow", signal, "sync-1"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!("Sent {} to sync-1", signal)));
    }
}

#[tokio::test]
async fn test_workflow_list_passes_limit() {
    let mock_server = MockServer::start().await;
    let mut run = status_body("completed", false, 3)["data"].clone();
    run["workflow_id"] = "sync-9".into();
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": [run],
            "meta": {"count": 1, "limit": 5}
        })))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .args(["workflow", "list", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sync-9"));
}

#[tokio::test]
async fn test_watch_fails_when_run_fails() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/workflows/sync-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("failed", false, 1)))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .args(["workflow", "watch", "sync-1", "--interval-ms", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Workflow sync-1 failed"));
}

#[tokio::test]
async fn test_catalog_view() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/connections/{}/catalog", CONNECTION_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {
                "connection_id": CONNECTION_ID,
                "discovered_at": "2026-03-01T10:00:00Z",
                "databases": ["app"],
                "schemas": [{"database": "app", "schema": "public"}],
                "tables": [{
                    "database": "app",
                    "schema": "public",
                    "name": "orders",
                    "type": "table",
                    "last_modified": null,
                    "row_count": 42,
                    "columns": [
                        {"name": "order_id", "type": "integer", "nullable": false, "primary_key": true},
                        {"name": "customer_id", "type": "integer", "nullable": true}
                    ],
                    "primary_key_candidates": [],
                    "relationships": []
                }]
            }
        })))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .args(["catalog", CONNECTION_ID])
        .assert()
        .success()
        .stdout(predicate::str::contains("app.public.orders"))
        .stdout(predicate::str::contains("order_id"))
        .stdout(predicate::str::contains("42"));
}

#[tokio::test]
async fn test_report_missing_is_not_found() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/connections/{}/quality-report", CONNECTION_ID)))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_body("NOT_FOUND", "no quality report")))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .args(["report", CONNECTION_ID])
        .assert()
        .failure()
        .code(4);
}

#[tokio::test]
async fn test_health_reports_unreachable_database() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "status": "unhealthy",
            "database": "unreachable",
            "active_workflows": 0
        })))
        .mount(&mock_server)
        .await;

    datasync(&mock_server)
        .arg("health")
        .assert()
        .failure()
        .stdout(predicate::str::contains("unreachable"));
}

#[tokio::test]
async fn test_client_maps_conflict_to_api_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/workflows"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(error_body("CONFLICT", "workflow sync-1 is already running")),
        )
        .mount(&mock_server)
        .await;

    let client = ApiClient::new(mock_server.uri()).unwrap();
    let err = client
        .start_workflow(&serde_json::json!({"kind": "sync"}))
        .await
        .unwrap_err();

    match err {
        CliError::Api { code, message } => {
            assert_eq!(code, "CONFLICT");
            assert!(message.contains("already running"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_client_unreachable_server() {
    // Nothing listens on port 9 locally
    let client = ApiClient::new("http://127.0.0.1:9").unwrap();
    let err = client.workflow_status("sync-1").await.unwrap_err();

    assert!(matches!(err, CliError::Unreachable { .. }));
    assert_eq!(err.exit_code(), 3);
}
