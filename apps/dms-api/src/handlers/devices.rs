//! 设备查询 handlers
//!
//! - GET /api/devices - 条件查询设备（前缀 / 厂商正则 / 活性窗口）
//! - GET /api/devices/{device_id} - 设备详情

use crate::utils::response::{device_to_dto, not_found, storage_error};
use crate::AppState;
use api_contract::{ApiResponse, DeviceDto};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dms_storage::{DeviceFilter, DeviceStore};

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product_class: Option<String>,
    #[serde(default)]
    pub online_within_ms: Option<i64>,
}

/// 条件查询设备。各条件取合取；不带条件时返回全部。
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let filter = DeviceFilter {
        id_prefix: query.prefix,
        manufacturer_regex: query.manufacturer,
        product_class_regex: query.product_class,
        online_within_ms: query.online_within_ms,
    };
    match state.devices.find_devices(&filter).await {
        Ok(items) => {
            let data: Vec<DeviceDto> = items
                .into_iter()
                .map(|record| device_to_dto(record, state.liveness_window_ms))
                .collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => storage_error(err),
    }
}

/// 设备详情。
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.devices.get_device(&device_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(device_to_dto(
                record,
                state.liveness_window_ms,
            ))),
        )
            .into_response(),
        Ok(None) => not_found("device not found"),
        Err(err) => storage_error(err),
    }
}
