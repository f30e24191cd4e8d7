//! 参数读写 handlers
//!
//! - POST /api/devices/{device_id}/parameters/get - 按模式取参数
//! - POST /api/devices/{device_id}/parameters - 写参数（可带幂等键）

use crate::utils::response::{ops_error, parameter_to_dto};
use crate::AppState;
use api_contract::{
    ApiResponse, GetParametersRequest, ParameterDto, SetParameterResultDto, SetParametersRequest,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dms_ops::SetItem;

/// 按模式取参数。
///
/// 模式既可以是字面路径，也可以带 `*` 单段通配或 `.` 结尾的子树
/// 前缀；结果按路径排序返回。
pub async fn get_parameters(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<GetParametersRequest>,
) -> Response {
    match state
        .ops
        .get_parameters(&device_id, &req.patterns, req.timeout_ms)
        .await
    {
        Ok(records) => {
            let data: Vec<ParameterDto> = records.into_iter().map(parameter_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => ops_error(err),
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    pub path: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 数据模型发现：路径 + 可写性。
pub async fn discover_parameters(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<DiscoverRequest>,
) -> Response {
    match state
        .ops
        .discover_parameters(&device_id, &req.path, req.timeout_ms)
        .await
    {
        Ok(items) => {
            let data: Vec<serde_json::Value> = items
                .into_iter()
                .map(|item| serde_json::json!({ "path": item.path, "writable": item.writable }))
                .collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => ops_error(err),
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesQuery {
    pub object_path: String,
}

/// 列出对象的现存实例路径。
pub async fn get_instances(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    axum::extract::Query(query): axum::extract::Query<InstancesQuery>,
) -> Response {
    match state
        .ops
        .get_instances(&device_id, &query.object_path, None)
        .await
    {
        Ok(paths) => (StatusCode::OK, Json(ApiResponse::success(paths))).into_response(),
        Err(err) => ops_error(err),
    }
}

/// 写参数。
///
/// `atomic` 要求整批一起成败（CWMP 天然如此，USP 关掉
/// allow_partial）；`idempotencyKey` 在配置窗口内合并重试。
pub async fn set_parameters(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(req): Json<SetParametersRequest>,
) -> Response {
    let items: Vec<SetItem> = req
        .parameters
        .into_iter()
        .map(|item| SetItem {
            path: item.path,
            value: item.value,
            param_type: item.param_type,
        })
        .collect();
    match state
        .ops
        .set_parameters(&device_id, items, req.atomic, req.idempotency_key, req.timeout_ms)
        .await
    {
        Ok(results) => {
            let data: Vec<SetParameterResultDto> = results
                .into_iter()
                .map(|result| SetParameterResultDto {
                    path: result.path,
                    ok: result.ok,
                    failure: result.failure.map(|failure| failure.to_dto()),
                })
                .collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => ops_error(err),
    }
}
