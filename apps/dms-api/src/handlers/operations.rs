//! 操作记录与命令执行 handlers。

use crate::utils::response::{not_found, operation_to_dto, ops_error};
use crate::AppState;
use api_contract::{ApiResponse, OperateRequest, OperationDto};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// 执行命令（命令空间即设备数据模型，如 `Device.Reboot()`）。
pub async fn operate(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<OperateRequest>,
) -> Response {
    match state
        .ops
        .operate(&device_id, &req.command, req.arguments, req.timeout_ms)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))).into_response(),
        Err(err) => ops_error(err),
    }
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Response {
    match state.ops.get_operation(&operation_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(operation_to_dto(record))),
        )
            .into_response(),
        Ok(None) => not_found("operation not found"),
        Err(err) => ops_error(err),
    }
}

pub async fn list_operations(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.ops.list_operations(&device_id, 100).await {
        Ok(records) => {
            let data: Vec<OperationDto> = records.into_iter().map(operation_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => ops_error(err),
    }
}
