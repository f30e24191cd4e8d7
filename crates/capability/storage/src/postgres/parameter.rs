//! Postgres 参数与对象实例存储实现
//!
//! ## 设计要点
//!
//! - **批量写入原子性**：`upsert_parameters` 整批放在单个事务内
//! - **模式匹配分工**：SQL 侧只做非通配前缀的 `like` 预筛，
//!   精确匹配交给 `PathPattern::matches`（模式语义属于领域层）

use crate::error::StorageError;
use crate::models::{InstanceRecord, ParameterRecord};
use crate::traits::{InstanceStore, ParameterStore};
use domain::{ParamType, PathPattern};
use sqlx::{PgPool, Row};

/// PostgreSQL 参数存储实现
pub struct PgParameterStore {
    pub pool: PgPool,
}

impl PgParameterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 模式里第一个 `*` 之前的字面前缀，用于 SQL 预筛。
fn literal_prefix(pattern: &PathPattern) -> String {
    let raw = pattern.as_str();
    match raw.find('*') {
        Some(index) => raw[..index].to_string(),
        None => raw.trim_end_matches('.').to_string(),
    }
}

fn row_to_parameter(row: &sqlx::postgres::PgRow) -> Result<ParameterRecord, StorageError> {
    let param_type: String = row.try_get("param_type")?;
    Ok(ParameterRecord {
        device_id: row.try_get("device_id")?,
        path: row.try_get("path")?,
        value: row.try_get("value")?,
        param_type: ParamType::parse(&param_type),
        writable: row.try_get("writable")?,
        last_update_ms: row.try_get("last_update_ms")?,
    })
}

#[async_trait::async_trait]
impl ParameterStore for PgParameterStore {
    async fn upsert_parameters(
        &self,
        device_id: &str,
        parameters: &[ParameterRecord],
    ) -> Result<(), StorageError> {
        if parameters.is_empty() {
            return Ok(());
        }
        // 单事务保证整批 all-or-nothing
        let mut tx = self.pool.begin().await?;
        for parameter in parameters {
            sqlx::query(
                "insert into parameters (device_id, path, value, param_type, writable, last_update_ms) \
                 values ($1, $2, $3, $4, $5, $6) \
                 on conflict (device_id, path) do update set \
                 value = excluded.value, \
                 param_type = excluded.param_type, \
                 writable = excluded.writable, \
                 last_update_ms = excluded.last_update_ms",
            )
            .bind(device_id)
            .bind(&parameter.path)
            .bind(&parameter.value)
            .bind(parameter.param_type.to_string())
            .bind(parameter.writable)
            .bind(parameter.last_update_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_parameters(
        &self,
        device_id: &str,
        pattern: &PathPattern,
    ) -> Result<Vec<ParameterRecord>, StorageError> {
        let prefix = literal_prefix(pattern);
        let rows = sqlx::query(
            "select device_id, path, value, param_type, writable, last_update_ms \
             from parameters where device_id = $1 and path like $2 || '%' order by path",
        )
        .bind(device_id)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        let mut parameters = Vec::new();
        for row in rows {
            let record = row_to_parameter(&row)?;
            if pattern.matches(&record.path) {
                parameters.push(record);
            }
        }
        Ok(parameters)
    }

    async fn get_parameter(
        &self,
        device_id: &str,
        path: &str,
    ) -> Result<Option<ParameterRecord>, StorageError> {
        let row = sqlx::query(
            "select device_id, path, value, param_type, writable, last_update_ms \
             from parameters where device_id = $1 and path = $2",
        )
        .bind(device_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row_to_parameter(&row)?))
    }

    async fn delete_parameters_by_prefix(
        &self,
        device_id: &str,
        prefix: &str,
    ) -> Result<u64, StorageError> {
        let result =
            sqlx::query("delete from parameters where device_id = $1 and path like $2 || '%'")
                .bind(device_id)
                .bind(prefix)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_parameters(&self, device_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("delete from parameters where device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// PostgreSQL 对象实例存储实现
pub struct PgInstanceStore {
    pub pool: PgPool,
}

impl PgInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InstanceStore for PgInstanceStore {
    async fn create_instance(&self, record: InstanceRecord) -> Result<(), StorageError> {
        let result = sqlx::query(
            "insert into instances (device_id, object_path, instance_number, created_at_ms) \
             values ($1, $2, $3, $4) on conflict do nothing",
        )
        .bind(&record.device_id)
        .bind(&record.object_path)
        .bind(record.instance_number as i64)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "instance {}{} exists",
                record.object_path, record.instance_number
            )));
        }
        Ok(())
    }

    async fn delete_instance(
        &self,
        device_id: &str,
        object_path: &str,
        instance_number: u32,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "delete from instances where device_id = $1 and object_path = $2 and instance_number = $3",
        )
        .bind(device_id)
        .bind(object_path)
        .bind(instance_number as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_instances(
        &self,
        device_id: &str,
        object_path: &str,
    ) -> Result<Vec<InstanceRecord>, StorageError> {
        let rows = sqlx::query(
            "select device_id, object_path, instance_number, created_at_ms from instances \
             where device_id = $1 and object_path = $2 order by instance_number",
        )
        .bind(device_id)
        .bind(object_path)
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let instance_number: i64 = row.try_get("instance_number")?;
            instances.push(InstanceRecord {
                device_id: row.try_get("device_id")?,
                object_path: row.try_get("object_path")?,
                instance_number: instance_number as u32,
                created_at_ms: row.try_get("created_at_ms")?,
            });
        }
        Ok(instances)
    }
}
