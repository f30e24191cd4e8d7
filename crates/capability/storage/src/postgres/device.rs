//! Postgres 设备存储实现
//!
//! 通过 SQL 查询实现设备的插入替换与条件查询，实现 [`DeviceStore`] trait。
//!
//! ## 设计要点
//!
//! - **插入即替换**：`insert ... on conflict (device_id) do update` 实现原子 upsert
//! - **参数化查询**：使用 sqlx 的参数绑定防止 SQL 注入
//! - **正则过滤**：manufacturer / product_class 使用 Postgres `~` 运算符

use crate::error::StorageError;
use crate::models::{DeviceFilter, DeviceRecord};
use crate::traits::DeviceStore;
use domain::{now_epoch_ms, DeviceKind};
use sqlx::{PgPool, Row};

const DEVICE_COLUMNS: &str = "device_id, kind, manufacturer, oui, product_class, serial_number, \
     model_name, hardware_version, software_version, spec_version, provisioning_code, \
     connection_request_url, connection_request_username, connection_request_password, \
     periodic_inform_enable, periodic_inform_interval, transport_kind, transport_address, \
     ip_address, registered_at_ms, last_contact_ms, last_bootstrap_ms, connection_request_failures";

/// PostgreSQL 设备存储实现
pub struct PgDeviceStore {
    pub pool: PgPool,
}

impl PgDeviceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<DeviceRecord, StorageError> {
    let kind: String = row.try_get("kind")?;
    Ok(DeviceRecord {
        device_id: row.try_get("device_id")?,
        kind: if kind == "cwmp" {
            DeviceKind::Cwmp
        } else {
            DeviceKind::Usp
        },
        manufacturer: row.try_get("manufacturer")?,
        oui: row.try_get("oui")?,
        product_class: row.try_get("product_class")?,
        serial_number: row.try_get("serial_number")?,
        model_name: row.try_get("model_name")?,
        hardware_version: row.try_get("hardware_version")?,
        software_version: row.try_get("software_version")?,
        spec_version: row.try_get("spec_version")?,
        provisioning_code: row.try_get("provisioning_code")?,
        connection_request_url: row.try_get("connection_request_url")?,
        connection_request_username: row.try_get("connection_request_username")?,
        connection_request_password: row.try_get("connection_request_password")?,
        periodic_inform_enable: row.try_get("periodic_inform_enable")?,
        periodic_inform_interval: row.try_get("periodic_inform_interval")?,
        transport_kind: row.try_get("transport_kind")?,
        transport_address: row.try_get("transport_address")?,
        ip_address: row.try_get("ip_address")?,
        registered_at_ms: row.try_get("registered_at_ms")?,
        last_contact_ms: row.try_get("last_contact_ms")?,
        last_bootstrap_ms: row.try_get("last_bootstrap_ms")?,
        connection_request_failures: row.try_get("connection_request_failures")?,
    })
}

#[async_trait::async_trait]
impl DeviceStore for PgDeviceStore {
    async fn upsert_device(&self, record: DeviceRecord) -> Result<(), StorageError> {
        let kind = match record.kind {
            DeviceKind::Cwmp => "cwmp",
            DeviceKind::Usp => "usp",
        };
        sqlx::query(
            "insert into devices (device_id, kind, manufacturer, oui, product_class, serial_number, \
             model_name, hardware_version, software_version, spec_version, provisioning_code, \
             connection_request_url, connection_request_username, connection_request_password, \
             periodic_inform_enable, periodic_inform_interval, transport_kind, transport_address, \
             ip_address, registered_at_ms, last_contact_ms, last_bootstrap_ms, connection_request_failures) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23) \
             on conflict (device_id) do update set \
             manufacturer = excluded.manufacturer, \
             oui = excluded.oui, \
             product_class = excluded.product_class, \
             serial_number = excluded.serial_number, \
             model_name = excluded.model_name, \
             hardware_version = excluded.hardware_version, \
             software_version = excluded.software_version, \
             spec_version = excluded.spec_version, \
             provisioning_code = excluded.provisioning_code, \
             connection_request_url = excluded.connection_request_url, \
             connection_request_username = excluded.connection_request_username, \
             connection_request_password = excluded.connection_request_password, \
             periodic_inform_enable = excluded.periodic_inform_enable, \
             periodic_inform_interval = excluded.periodic_inform_interval, \
             transport_kind = excluded.transport_kind, \
             transport_address = excluded.transport_address, \
             ip_address = excluded.ip_address, \
             last_contact_ms = excluded.last_contact_ms, \
             last_bootstrap_ms = excluded.last_bootstrap_ms, \
             connection_request_failures = excluded.connection_request_failures",
        )
        .bind(&record.device_id)
        .bind(kind)
        .bind(&record.manufacturer)
        .bind(&record.oui)
        .bind(&record.product_class)
        .bind(&record.serial_number)
        .bind(&record.model_name)
        .bind(&record.hardware_version)
        .bind(&record.software_version)
        .bind(&record.spec_version)
        .bind(&record.provisioning_code)
        .bind(&record.connection_request_url)
        .bind(&record.connection_request_username)
        .bind(&record.connection_request_password)
        .bind(record.periodic_inform_enable)
        .bind(record.periodic_inform_interval)
        .bind(&record.transport_kind)
        .bind(&record.transport_address)
        .bind(&record.ip_address)
        .bind(record.registered_at_ms)
        .bind(record.last_contact_ms)
        .bind(record.last_bootstrap_ms)
        .bind(record.connection_request_failures)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from devices where device_id = $1",
            DEVICE_COLUMNS
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(row_to_record(&row)?))
    }

    async fn find_devices(&self, filter: &DeviceFilter) -> Result<Vec<DeviceRecord>, StorageError> {
        // 各条件合取；未给出的条件用恒真分支跳过
        let oldest = filter
            .online_within_ms
            .map(|window| now_epoch_ms().saturating_sub(window));
        let rows = sqlx::query(&format!(
            "select {} from devices where \
             ($1::text is null or device_id like $1 || '%') and \
             ($2::text is null or manufacturer ~ $2) and \
             ($3::text is null or product_class ~ $3) and \
             ($4::bigint is null or last_contact_ms >= $4) \
             order by device_id",
            DEVICE_COLUMNS
        ))
        .bind(&filter.id_prefix)
        .bind(&filter.manufacturer_regex)
        .bind(&filter.product_class_regex)
        .bind(oldest)
        .fetch_all(&self.pool)
        .await?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            devices.push(row_to_record(&row)?);
        }
        Ok(devices)
    }

    async fn update_last_contact(&self, device_id: &str, ts_ms: i64) -> Result<(), StorageError> {
        let result = sqlx::query("update devices set last_contact_ms = $1 where device_id = $2")
            .bind(ts_ms)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(device_id.to_string()));
        }
        Ok(())
    }

    async fn bump_connreq_failures(&self, device_id: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            "update devices set connection_request_failures = connection_request_failures + 1 \
             where device_id = $1",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(device_id.to_string()));
        }
        Ok(())
    }

    async fn delete_device(&self, device_id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("delete from devices where device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
