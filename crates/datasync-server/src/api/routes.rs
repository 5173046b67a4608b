//! Route handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use super::response::ApiResponse;
use super::AppState;
use crate::error::{ApiResult, AppError};
use crate::etl::store::{CatalogStore, QualityReportStore, RunStore};
use crate::etl::{Signal, WorkflowInput, WorkflowStatus};

const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Serialize, Deserialize)]
pub struct StartedWorkflow {
    pub workflow_id: String,
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let active = state
        .runtime
        .list()
        .await
        .iter()
        .filter(|status| !status.is_finished())
        .count();

    let Some(db) = &state.db else {
        return (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "not_configured", "active_workflows": active })),
        );
    };

    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected", "active_workflows": active })),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "database": "unreachable", "active_workflows": active })),
            )
        },
    }
}

pub async fn start_workflow(
    State(state): State<AppState>,
    Json(input): Json<WorkflowInput>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.runtime.start(input).await?;
    tracing::info!(workflow_id = %handle.workflow_id, run_id = %handle.run_id, "workflow started");

    let started = StartedWorkflow {
        workflow_id: handle.workflow_id,
        run_id: handle.run_id,
    };
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(started))))
}

/// Runs started by this process first, then persisted runs not seen live
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ApiResponse<Vec<WorkflowStatus>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(1);

    let mut statuses = state.runtime.list().await;
    let live: HashSet<String> = statuses.iter().map(|s| s.workflow_id.clone()).collect();
    let persisted = state.runtime.deps().stores.runs.list_runs(limit).await?;
    statuses.extend(persisted.into_iter().filter(|s| !live.contains(&s.workflow_id)));
    statuses.truncate(limit);

    let count = statuses.len();
    Ok(ApiResponse::success_with_meta(statuses, json!({ "count": count, "limit": limit })))
}

pub async fn workflow_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<WorkflowStatus>> {
    Ok(ApiResponse::success(state.runtime.status(&id).await?))
}

pub async fn signal_workflow(
    State(state): State<AppState>,
    Path((id, signal)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let signal: Signal = signal
        .parse()
        .map_err(|_| AppError::NotFound(format!("no such workflow action: {}", signal)))?;
    state.runtime.signal(&id, signal).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({ "workflow_id": id, "signal": signal.as_str() }))),
    ))
}

pub async fn connection_catalog(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .runtime
        .deps()
        .stores
        .catalog
        .load_snapshot(connection_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no catalog for connection {}", connection_id)))?;
    Ok(ApiResponse::success(snapshot))
}

pub async fn quality_report(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .runtime
        .deps()
        .stores
        .reports
        .latest_report(connection_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no quality report for connection {}", connection_id)))?;
    Ok(ApiResponse::success(report))
}
