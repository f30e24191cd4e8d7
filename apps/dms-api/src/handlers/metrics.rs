//! 计数器快照 handler。

use crate::AppState;
use api_contract::ApiResponse;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub async fn metrics_snapshot(State(state): State<AppState>) -> Response {
    let snapshot = dms_telemetry::metrics().snapshot();
    let data = serde_json::json!({
        "framesIn": snapshot.frames_in,
        "framesOut": snapshot.frames_out,
        "orphanResponses": snapshot.orphan_responses,
        "droppedEvents": snapshot.dropped_events,
        "informs": snapshot.informs,
        "sessionsOpened": snapshot.sessions_opened,
        "sessionsClosed": snapshot.sessions_closed,
        "sessionsFaulted": snapshot.sessions_faulted,
        "openSessions": state.acs.open_sessions(),
        "rpcCompleted": snapshot.rpc_completed,
        "rpcFailed": snapshot.rpc_failed,
        "rpcTimeout": snapshot.rpc_timeout,
        "notifyDelivered": snapshot.notify_delivered,
        "notifyUnmatched": snapshot.notify_unmatched,
        "connreqAttempts": snapshot.connreq_attempts,
        "connreqFailures": snapshot.connreq_failures,
        "storeRetries": snapshot.store_retries,
        "storeWriteFailures": snapshot.store_write_failures,
        "pushback": snapshot.pushback,
        "registeredDevices": state.registry.len(),
    });
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}
