//! 订阅 handlers。

use crate::utils::response::{ops_error, storage_error, subscription_to_dto};
use crate::AppState;
use api_contract::{ApiResponse, SubscribeRequest, SubscriptionDto};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dms_storage::SubscriptionStore;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionQuery {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// 创建订阅（同元组重复创建幂等）。
pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Response {
    match state
        .ops
        .subscribe(
            req.device_id,
            &req.event_type,
            &req.path_pattern,
            &req.delivery_target,
        )
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(subscription_to_dto(record))),
        )
            .into_response(),
        Err(err) => ops_error(err),
    }
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<SubscriptionQuery>,
) -> Response {
    match state
        .subscriptions
        .list_subscriptions(query.device_id.as_deref(), query.event_type.as_deref())
        .await
    {
        Ok(records) => {
            let data: Vec<SubscriptionDto> =
                records.into_iter().map(subscription_to_dto).collect();
            (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
        }
        Err(err) => storage_error(err),
    }
}

pub async fn delete_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Response {
    match state.subscriptions.delete_subscription(&subscription_id).await {
        Ok(deleted) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "deleted": deleted }))),
        )
            .into_response(),
        Err(err) => storage_error(err),
    }
}
