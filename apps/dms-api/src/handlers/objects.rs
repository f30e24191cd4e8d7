//! 对象实例 handlers
//!
//! - POST /api/devices/{device_id}/objects - AddObject
//! - POST /api/devices/{device_id}/objects/delete - DeleteObject

use crate::utils::response::ops_error;
use crate::AppState;
use api_contract::{AddObjectRequest, AddObjectResponse, ApiResponse, DeleteObjectRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dms_ops::SetItem;

pub async fn add_object(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<AddObjectRequest>,
) -> Response {
    let seed: Vec<SetItem> = req
        .seed_parameters
        .into_iter()
        .map(|item| SetItem {
            path: item.path,
            value: item.value,
            param_type: item.param_type,
        })
        .collect();
    match state
        .ops
        .add_object(&device_id, &req.object_path, seed, req.timeout_ms)
        .await
    {
        Ok(instance_number) => {
            let data = AddObjectResponse {
                instance_number,
                instance_path: format!("{}{}", req.object_path, instance_number),
            };
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => ops_error(err),
    }
}

pub async fn delete_object(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<DeleteObjectRequest>,
) -> Response {
    match state
        .ops
        .delete_object(&device_id, &req.instance_path, req.timeout_ms)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "deleted": true }))),
        )
            .into_response(),
        Err(err) => ops_error(err),
    }
}
