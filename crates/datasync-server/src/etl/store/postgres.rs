//! PostgreSQL implementation of every persistence seam
//!
//! Tables are created by `migrations/20260301000001_etl_core.sql`.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{record_key, CatalogStore, CheckpointStore, QualityReportStore, RecordSink, RunStore};
use crate::etl::catalog::{CatalogSnapshot, TableDescriptor};
use crate::etl::checkpoint::Checkpoint;
use crate::etl::connector::Row;
use crate::etl::error::{EtlError, EtlResult};
use crate::etl::quality::QualityReport;
use crate::etl::types::WorkflowStatus;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_i32(value: usize, what: &str) -> EtlResult<i32> {
    i32::try_from(value).map_err(|_| EtlError::storage(format!("{} out of range: {}", what, value)))
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn load(&self, workflow_id: &str) -> EtlResult<Option<Checkpoint>> {
        let row: Option<(Json<Checkpoint>, i32)> = sqlx::query_as(
            "SELECT checkpoint, table_index FROM etl_checkpoints WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        // The guarded column is authoritative over the JSON copy
        Ok(row.map(|(Json(mut checkpoint), table_index)| {
            checkpoint.table_index = table_index.max(0) as usize;
            checkpoint
        }))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO etl_checkpoints (workflow_id, run_id, table_index, completed, checkpoint, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (workflow_id) DO UPDATE SET
                table_index = CASE
                    WHEN etl_checkpoints.run_id = EXCLUDED.run_id
                        THEN GREATEST(etl_checkpoints.table_index, EXCLUDED.table_index)
                    ELSE EXCLUDED.table_index
                END,
                run_id = EXCLUDED.run_id,
                completed = EXCLUDED.completed,
                checkpoint = EXCLUDED.checkpoint,
                updated_at = NOW()
            "#,
        )
        .bind(&checkpoint.workflow_id)
        .bind(checkpoint.run_id)
        .bind(to_i32(checkpoint.table_index, "table_index")?)
        .bind(checkpoint.completed)
        .bind(Json(checkpoint))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, workflow_id: &str) -> EtlResult<()> {
        sqlx::query("DELETE FROM etl_checkpoints WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn replace_snapshot(&self, snapshot: &CatalogSnapshot) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO etl_catalog_snapshots (connection_id, discovered_at, table_count, snapshot)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (connection_id) DO UPDATE SET
                discovered_at = EXCLUDED.discovered_at,
                table_count = EXCLUDED.table_count,
                snapshot = EXCLUDED.snapshot
            "#,
        )
        .bind(snapshot.connection_id)
        .bind(snapshot.discovered_at)
        .bind(to_i32(snapshot.tables.len(), "table_count")?)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_snapshot(&self, connection_id: Uuid) -> EtlResult<Option<CatalogSnapshot>> {
        let row: Option<(Json<CatalogSnapshot>,)> =
            sqlx::query_as("SELECT snapshot FROM etl_catalog_snapshots WHERE connection_id = $1")
                .bind(connection_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(snapshot),)| snapshot))
    }
}

#[async_trait]
impl QualityReportStore for PgStore {
    async fn save_report(&self, report: &QualityReport) -> EtlResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO etl_quality_reports
                (id, connection_id, workflow_id, run_id, overall_score, critical_issues, warnings, generated_at, report)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(report.id)
        .bind(report.connection_id)
        .bind(&report.workflow_id)
        .bind(report.run_id)
        .bind(report.overall_score)
        .bind(to_i32(report.critical_issues, "critical_issues")?)
        .bind(to_i32(report.warnings, "warnings")?)
        .bind(report.generated_at)
        .bind(Json(report))
        .execute(&mut *tx)
        .await?;

        for table in &report.tables {
            for check in &table.checks {
                sqlx::query(
                    r#"
                    INSERT INTO etl_quality_check_results
                        (report_id, table_name, check_type, column_name, rule_name,
                         passed, score, threshold, severity, details)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(report.id)
                .bind(&check.table)
                .bind(check.check_type.as_str())
                .bind(check.column.as_deref())
                .bind(check.rule_name.as_deref())
                .bind(check.passed)
                .bind(check.score)
                .bind(check.threshold)
                .bind(check.severity.as_str())
                .bind(Json(&check.details))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn latest_report(&self, connection_id: Uuid) -> EtlResult<Option<QualityReport>> {
        let row: Option<(Json<QualityReport>,)> = sqlx::query_as(
            r#"
            SELECT report FROM etl_quality_reports
            WHERE connection_id = $1
            ORDER BY generated_at DESC
            LIMIT 1
            "#,
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(report),)| report))
    }
}

#[async_trait]
impl RunStore for PgStore {
    async fn save_status(&self, status: &WorkflowStatus) -> EtlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO etl_workflow_runs
                (run_id, workflow_id, connection_id, kind, phase, started_at, ended_at, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (run_id) DO UPDATE SET
                phase = EXCLUDED.phase,
                ended_at = EXCLUDED.ended_at,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(status.run_id)
        .bind(&status.workflow_id)
        .bind(status.connection_id)
        .bind(status.kind.as_str())
        .bind(status.phase.as_str())
        .bind(status.metrics.start_time)
        .bind(status.metrics.end_time)
        .bind(Json(status))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_status(&self, workflow_id: &str) -> EtlResult<Option<WorkflowStatus>> {
        let row: Option<(Json<WorkflowStatus>,)> = sqlx::query_as(
            r#"
            SELECT status FROM etl_workflow_runs
            WHERE workflow_id = $1
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(status),)| status))
    }

    async fn list_runs(&self, limit: usize) -> EtlResult<Vec<WorkflowStatus>> {
        let rows: Vec<(Json<WorkflowStatus>,)> =
            sqlx::query_as("SELECT status FROM etl_workflow_runs ORDER BY started_at DESC LIMIT $1")
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(Json(status),)| status).collect())
    }
}

#[async_trait]
impl RecordSink for PgStore {
    async fn write_batch(&self, connection_id: Uuid, table: &TableDescriptor, rows: &[Row]) -> EtlResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // One row per key: ON CONFLICT cannot touch the same row twice in a statement
        let keys = table.key_columns();
        let deduped: BTreeMap<String, serde_json::Value> = rows
            .iter()
            .map(|row| (record_key(&keys, row), serde_json::Value::Object(row.clone())))
            .collect();
        let (record_keys, records): (Vec<String>, Vec<serde_json::Value>) = deduped.into_iter().unzip();

        sqlx::query(
            r#"
            INSERT INTO etl_synced_records (connection_id, table_name, record_key, record)
            SELECT $1, $2, k, r FROM UNNEST($3::text[], $4::jsonb[]) AS t(k, r)
            ON CONFLICT (connection_id, table_name, record_key) DO UPDATE SET
                record = EXCLUDED.record,
                synced_at = NOW()
            "#,
        )
        .bind(connection_id)
        .bind(table.qualified_name())
        .bind(&record_keys)
        .bind(&records)
        .execute(&self.pool)
        .await?;

        Ok(rows.len() as u64)
    }
}
