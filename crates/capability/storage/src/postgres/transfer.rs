//! Postgres 文件传输存储实现

use crate::error::StorageError;
use crate::models::TransferRecord;
use crate::traits::TransferStore;
use sqlx::{PgPool, Row};

const TRANSFER_COLUMNS: &str = "device_id, command_key, direction, url, file_type, username, \
     password, file_size, target_file_name, delay_seconds, status, started_at_ms, \
     completed_at_ms, fault";

/// PostgreSQL 文件传输存储实现
pub struct PgTransferStore {
    pub pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_transfer(row: &sqlx::postgres::PgRow) -> Result<TransferRecord, StorageError> {
    Ok(TransferRecord {
        device_id: row.try_get("device_id")?,
        command_key: row.try_get("command_key")?,
        direction: row.try_get("direction")?,
        url: row.try_get("url")?,
        file_type: row.try_get("file_type")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        file_size: row.try_get("file_size")?,
        target_file_name: row.try_get("target_file_name")?,
        delay_seconds: row.try_get("delay_seconds")?,
        status: row.try_get("status")?,
        started_at_ms: row.try_get("started_at_ms")?,
        completed_at_ms: row.try_get("completed_at_ms")?,
        fault: row.try_get("fault")?,
    })
}

#[async_trait::async_trait]
impl TransferStore for PgTransferStore {
    async fn create_transfer(&self, record: TransferRecord) -> Result<(), StorageError> {
        let result = sqlx::query(
            "insert into transfers (device_id, command_key, direction, url, file_type, username, \
             password, file_size, target_file_name, delay_seconds, status, started_at_ms, \
             completed_at_ms, fault) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             on conflict do nothing",
        )
        .bind(&record.device_id)
        .bind(&record.command_key)
        .bind(&record.direction)
        .bind(&record.url)
        .bind(&record.file_type)
        .bind(&record.username)
        .bind(&record.password)
        .bind(record.file_size)
        .bind(&record.target_file_name)
        .bind(record.delay_seconds)
        .bind(&record.status)
        .bind(record.started_at_ms)
        .bind(record.completed_at_ms)
        .bind(&record.fault)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(record.command_key));
        }
        Ok(())
    }

    async fn find_transfer(
        &self,
        device_id: &str,
        command_key: &str,
    ) -> Result<Option<TransferRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from transfers where device_id = $1 and command_key = $2",
            TRANSFER_COLUMNS
        ))
        .bind(device_id)
        .bind(command_key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row_to_transfer(&row)?))
    }

    async fn update_transfer_status(
        &self,
        device_id: &str,
        command_key: &str,
        status: &str,
        fault: Option<String>,
        completed_at_ms: Option<i64>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "update transfers set \
             status = $1, \
             fault = coalesce($2, fault), \
             completed_at_ms = coalesce($3, completed_at_ms) \
             where device_id = $4 and command_key = $5 \
             and status not in ('completed', 'failed')",
        )
        .bind(status)
        .bind(&fault)
        .bind(completed_at_ms)
        .bind(device_id)
        .bind(command_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        let exists =
            sqlx::query("select 1 from transfers where device_id = $1 and command_key = $2")
                .bind(device_id)
                .bind(command_key)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_some() {
            Err(StorageError::TerminalState(command_key.to_string()))
        } else {
            Err(StorageError::NotFound(command_key.to_string()))
        }
    }

    async fn list_transfers(&self, device_id: &str) -> Result<Vec<TransferRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from transfers where device_id = $1 order by command_key",
            TRANSFER_COLUMNS
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        let mut transfers = Vec::with_capacity(rows.len());
        for row in rows {
            transfers.push(row_to_transfer(&row)?);
        }
        Ok(transfers)
    }
}
