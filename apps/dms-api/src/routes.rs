//! 路由表。

use crate::handlers;
use crate::AppState;
use axum::routing::{delete, get, post};
use axum::Router;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // 设备面（CWMP ACS 端点）
        .route("/", post(handlers::acs::cwmp_endpoint))
        .route("/cwmp", post(handlers::acs::cwmp_endpoint))
        // 操作员面
        .route("/api/devices", get(handlers::devices::list_devices))
        .route("/api/devices/{device_id}", get(handlers::devices::get_device))
        .route(
            "/api/devices/{device_id}/parameters/get",
            post(handlers::parameters::get_parameters),
        )
        .route(
            "/api/devices/{device_id}/parameters",
            post(handlers::parameters::set_parameters),
        )
        .route(
            "/api/devices/{device_id}/parameters/discover",
            post(handlers::parameters::discover_parameters),
        )
        .route(
            "/api/devices/{device_id}/instances",
            get(handlers::parameters::get_instances),
        )
        .route(
            "/api/devices/{device_id}/objects",
            post(handlers::objects::add_object),
        )
        .route(
            "/api/devices/{device_id}/objects/delete",
            post(handlers::objects::delete_object),
        )
        .route(
            "/api/devices/{device_id}/operate",
            post(handlers::operations::operate),
        )
        .route(
            "/api/devices/{device_id}/operations",
            get(handlers::operations::list_operations),
        )
        .route(
            "/api/operations/{operation_id}",
            get(handlers::operations::get_operation),
        )
        .route(
            "/api/devices/{device_id}/transfers",
            post(handlers::transfers::schedule_transfer).get(handlers::transfers::list_transfers),
        )
        .route(
            "/api/devices/{device_id}/transfers/{command_key}",
            get(handlers::transfers::get_transfer),
        )
        .route(
            "/api/subscriptions",
            post(handlers::subscriptions::subscribe).get(handlers::subscriptions::list_subscriptions),
        )
        .route(
            "/api/subscriptions/{subscription_id}",
            delete(handlers::subscriptions::delete_subscription),
        )
        .route("/api/metrics", get(handlers::metrics::metrics_snapshot))
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "ok": true }))
}
