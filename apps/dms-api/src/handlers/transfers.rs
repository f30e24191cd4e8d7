//! 文件传输 handlers。
//!
//! 终态通过订阅投递或在此轮询。

use crate::utils::response::{not_found, ops_error, transfer_to_dto};
use crate::AppState;
use api_contract::{ApiResponse, TransferDto, TransferRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dms_ops::TransferSpec;

pub async fn schedule_transfer(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<TransferRequest>,
) -> Response {
    let spec = TransferSpec {
        direction: req.direction,
        url: req.url,
        file_type: req.file_type,
        username: req.username,
        password: req.password,
        delay_seconds: req.delay_seconds,
        command_key: req.command_key,
        target_file_name: req.target_file_name,
        file_size: req.file_size,
    };
    match state.ops.schedule_transfer(&device_id, spec, None).await {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(transfer_to_dto(record))),
        )
            .into_response(),
        Err(err) => ops_error(err),
    }
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Path((device_id, command_key)): Path<(String, String)>,
) -> Response {
    match state.ops.get_transfer(&device_id, &command_key).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(ApiResponse::success(transfer_to_dto(record))),
        )
            .into_response(),
        Ok(None) => not_found("transfer not found"),
        Err(err) => ops_error(err),
    }
}

pub async fn list_transfers(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Response {
    match state.ops.list_transfers(&device_id).await {
        Ok(records) => {
            let data: Vec<TransferDto> = records.into_iter().map(transfer_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => ops_error(err),
    }
}
