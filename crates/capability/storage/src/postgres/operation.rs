//! Postgres 操作记录存储实现
//!
//! ## 设计要点
//!
//! - **终态保护**：update 的 where 子句限定 `status in ('pending','in_progress')`，
//!   受影响行数为 0 且记录存在时报 TerminalState

use crate::error::StorageError;
use crate::models::{OperationPatch, OperationRecord, OperationStatus};
use crate::traits::OperationStore;
use sqlx::{PgPool, Row};

const OPERATION_COLUMNS: &str = "operation_id, device_id, kind, payload, status, created_at_ms, \
     started_at_ms, completed_at_ms, timeout_at_ms, result, error, retry_count";

/// PostgreSQL 操作记录存储实现
pub struct PgOperationStore {
    pub pool: PgPool,
}

impl PgOperationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_operation(row: &sqlx::postgres::PgRow) -> Result<OperationRecord, StorageError> {
    let status: String = row.try_get("status")?;
    Ok(OperationRecord {
        operation_id: row.try_get("operation_id")?,
        device_id: row.try_get("device_id")?,
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        status: OperationStatus::parse(&status)?,
        created_at_ms: row.try_get("created_at_ms")?,
        started_at_ms: row.try_get("started_at_ms")?,
        completed_at_ms: row.try_get("completed_at_ms")?,
        timeout_at_ms: row.try_get("timeout_at_ms")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        retry_count: row.try_get("retry_count")?,
    })
}

#[async_trait::async_trait]
impl OperationStore for PgOperationStore {
    async fn record_operation(&self, record: OperationRecord) -> Result<(), StorageError> {
        sqlx::query(
            "insert into operations (operation_id, device_id, kind, payload, status, created_at_ms, \
             started_at_ms, completed_at_ms, timeout_at_ms, result, error, retry_count) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&record.operation_id)
        .bind(&record.device_id)
        .bind(&record.kind)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(record.created_at_ms)
        .bind(record.started_at_ms)
        .bind(record.completed_at_ms)
        .bind(record.timeout_at_ms)
        .bind(&record.result)
        .bind(&record.error)
        .bind(record.retry_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_operation(
        &self,
        operation_id: &str,
        patch: OperationPatch,
    ) -> Result<OperationRecord, StorageError> {
        let row = sqlx::query(&format!(
            "update operations set \
             status = coalesce($1, status), \
             started_at_ms = coalesce($2, started_at_ms), \
             completed_at_ms = coalesce($3, completed_at_ms), \
             result = coalesce($4, result), \
             error = coalesce($5, error), \
             retry_count = coalesce($6, retry_count) \
             where operation_id = $7 and status in ('pending', 'in_progress') \
             returning {}",
            OPERATION_COLUMNS
        ))
        .bind(patch.status.map(|status| status.as_str()))
        .bind(patch.started_at_ms)
        .bind(patch.completed_at_ms)
        .bind(&patch.result)
        .bind(&patch.error)
        .bind(patch.retry_count)
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return row_to_operation(&row);
        }
        // 未更新到行：区分不存在与终态拒绝
        let exists = sqlx::query("select 1 from operations where operation_id = $1")
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            Err(StorageError::TerminalState(operation_id.to_string()))
        } else {
            Err(StorageError::NotFound(operation_id.to_string()))
        }
    }

    async fn get_operation(
        &self,
        operation_id: &str,
    ) -> Result<Option<OperationRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from operations where operation_id = $1",
            OPERATION_COLUMNS
        ))
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row_to_operation(&row)?))
    }

    async fn list_operations(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<OperationRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from operations where device_id = $1 \
             order by created_at_ms desc limit $2",
            OPERATION_COLUMNS
        ))
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut operations = Vec::with_capacity(rows.len());
        for row in rows {
            operations.push(row_to_operation(&row)?);
        }
        Ok(operations)
    }
}
