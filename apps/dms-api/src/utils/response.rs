//! 响应转换与错误映射。

use api_contract::{
    ApiResponse, DeviceDto, OperationDto, ParameterDto, SubscriptionDto, TransferDto,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dms_ops::{ErrorKind, OpsError};
use dms_storage::{
    DeviceRecord, OperationRecord, ParameterRecord, StorageError, SubscriptionRecord,
    TransferRecord,
};
use domain::now_epoch_ms;

pub fn device_to_dto(record: DeviceRecord, liveness_window_ms: i64) -> DeviceDto {
    let is_online = record.is_online(liveness_window_ms, now_epoch_ms());
    DeviceDto {
        device_id: record.device_id,
        kind: record.kind,
        manufacturer: record.manufacturer,
        model_name: record.model_name,
        software_version: record.software_version,
        hardware_version: record.hardware_version,
        last_contact_ms: record.last_contact_ms,
        is_online,
    }
}

pub fn parameter_to_dto(record: ParameterRecord) -> ParameterDto {
    ParameterDto {
        path: record.path,
        value: record.value,
        param_type: record.param_type,
        writable: record.writable,
        last_update_ms: record.last_update_ms,
    }
}

pub fn operation_to_dto(record: OperationRecord) -> OperationDto {
    OperationDto {
        operation_id: record.operation_id,
        device_id: record.device_id,
        kind: record.kind,
        status: record.status.to_string(),
        created_at_ms: record.created_at_ms,
        completed_at_ms: record.completed_at_ms,
        result: record
            .result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        failure: record
            .error
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
    }
}

pub fn transfer_to_dto(record: TransferRecord) -> TransferDto {
    TransferDto {
        device_id: record.device_id,
        command_key: record.command_key,
        direction: record.direction,
        url: record.url,
        file_type: record.file_type,
        status: record.status,
        started_at_ms: record.started_at_ms,
        completed_at_ms: record.completed_at_ms,
        fault: record.fault,
    }
}

pub fn subscription_to_dto(record: SubscriptionRecord) -> SubscriptionDto {
    SubscriptionDto {
        subscription_id: record.subscription_id,
        device_id: record.device_id,
        event_type: record.event_type,
        path_pattern: record.path_pattern,
        delivery_target: record.delivery_target,
        status: record.status,
    }
}

/// 门面错误 → HTTP 响应（结构化失败体放在 error.message 之外单独给出）。
pub fn ops_error(err: OpsError) -> Response {
    let status = match err.kind {
        ErrorKind::Lifecycle => StatusCode::NOT_FOUND,
        ErrorKind::Semantic | ErrorKind::Protocol => StatusCode::BAD_REQUEST,
        ErrorKind::Control if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Control => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Store => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Transport | ErrorKind::Session => StatusCode::BAD_GATEWAY,
    };
    let code = match err.kind {
        ErrorKind::Lifecycle => api_contract::error_codes::DEVICE_UNKNOWN,
        ErrorKind::Store => api_contract::error_codes::STORE_UNAVAILABLE,
        ErrorKind::Control if err.is_timeout() => api_contract::error_codes::OPERATION_TIMEOUT,
        ErrorKind::Control => api_contract::error_codes::OPERATION_PUSHBACK,
        ErrorKind::Semantic => api_contract::error_codes::INVALID_REQUEST,
        _ => api_contract::error_codes::ENGINE_ERROR,
    };
    let body = ApiResponse {
        success: false,
        data: Some(err.to_dto()),
        error: Some(api_contract::ApiError {
            code: code.to_string(),
            message: err.message.clone(),
        }),
    };
    (status, Json(body)).into_response()
}

pub fn storage_error(err: StorageError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(
            api_contract::error_codes::STORE_UNAVAILABLE,
            err.to_string(),
        )),
    )
        .into_response()
}

pub fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            api_contract::error_codes::RESOURCE_NOT_FOUND,
            message,
        )),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_http_status() {
        let timeout = OpsError::timeout("agent-1");
        assert_eq!(ops_error(timeout).status(), StatusCode::GATEWAY_TIMEOUT);

        let unknown = OpsError::device_unknown("agent-1");
        assert_eq!(ops_error(unknown).status(), StatusCode::NOT_FOUND);

        let pushback = OpsError::pushback();
        assert_eq!(ops_error(pushback).status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn online_flag_derives_from_window() {
        let record = dms_storage::DeviceRecord::new(&domain::DeviceId::usp("os::a"));
        let dto = device_to_dto(record, 60_000);
        assert!(dto.is_online);
    }
}
