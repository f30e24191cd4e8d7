//! Postgres 订阅存储实现

use crate::error::StorageError;
use crate::models::SubscriptionRecord;
use crate::traits::SubscriptionStore;
use sqlx::{PgPool, Row};

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, device_id, event_type, path_pattern, \
     delivery_target, status, created_at_ms, last_delivery_ms";

/// PostgreSQL 订阅存储实现
pub struct PgSubscriptionStore {
    pub pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<SubscriptionRecord, StorageError> {
    Ok(SubscriptionRecord {
        subscription_id: row.try_get("subscription_id")?,
        device_id: row.try_get("device_id")?,
        event_type: row.try_get("event_type")?,
        path_pattern: row.try_get("path_pattern")?,
        delivery_target: row.try_get("delivery_target")?,
        status: row.try_get("status")?,
        created_at_ms: row.try_get("created_at_ms")?,
        last_delivery_ms: row.try_get("last_delivery_ms")?,
    })
}

#[async_trait::async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn save_subscription(
        &self,
        record: SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StorageError> {
        // 同元组已存在时返回既有记录（幂等）
        let existing = sqlx::query(&format!(
            "select {} from subscriptions where \
             device_id is not distinct from $1 and event_type = $2 \
             and path_pattern = $3 and delivery_target = $4",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(&record.device_id)
        .bind(&record.event_type)
        .bind(&record.path_pattern)
        .bind(&record.delivery_target)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = existing {
            return row_to_subscription(&row);
        }

        sqlx::query(
            "insert into subscriptions (subscription_id, device_id, event_type, path_pattern, \
             delivery_target, status, created_at_ms, last_delivery_ms) \
             values ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&record.subscription_id)
        .bind(&record.device_id)
        .bind(&record.event_type)
        .bind(&record.path_pattern)
        .bind(&record.delivery_target)
        .bind(&record.status)
        .bind(record.created_at_ms)
        .bind(record.last_delivery_ms)
        .execute(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_subscriptions(
        &self,
        device_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<SubscriptionRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from subscriptions where \
             ($1::text is null or device_id = $1) and \
             ($2::text is null or event_type = $2) \
             order by subscription_id",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(device_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            subscriptions.push(row_to_subscription(&row)?);
        }
        Ok(subscriptions)
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("delete from subscriptions where subscription_id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn touch_delivery(&self, subscription_id: &str, ts_ms: i64) -> Result<(), StorageError> {
        let result =
            sqlx::query("update subscriptions set last_delivery_ms = $1 where subscription_id = $2")
                .bind(ts_ms)
                .bind(subscription_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(subscription_id.to_string()));
        }
        Ok(())
    }
}
