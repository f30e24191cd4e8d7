//! 稳定的 DTO 与 API 响应契约。

use domain::{DeviceKind, ParamType};
use serde::{Deserialize, Serialize};

/// 稳定错误码清单（跨前后端对齐）。
pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID.REQUEST";
    pub const INVALID_PATH: &str = "INVALID.PATH";
    pub const DEVICE_UNKNOWN: &str = "DEVICE.UNKNOWN";
    pub const DEVICE_CONFLICT: &str = "DEVICE.CONFLICT";
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE.NOT_FOUND";
    pub const OPERATION_TIMEOUT: &str = "OPERATION.TIMEOUT";
    pub const OPERATION_PUSHBACK: &str = "OPERATION.PUSHBACK";
    pub const STORE_UNAVAILABLE: &str = "STORE.UNAVAILABLE";
    pub const ENGINE_ERROR: &str = "ENGINE.ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL.ERROR";
}

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 结构化操作失败体（§错误设计：kind + code + message + 可重试标记）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDto {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub retryable: bool,
}

/// 设备返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDto {
    pub device_id: String,
    pub kind: DeviceKind,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
    pub last_contact_ms: i64,
    pub is_online: bool,
}

/// 参数返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDto {
    pub path: String,
    pub value: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub writable: bool,
    pub last_update_ms: i64,
}

/// 参数读取请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetParametersRequest {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 单条参数写入项。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParameterItem {
    pub path: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
}

/// 参数写入请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParametersRequest {
    pub parameters: Vec<SetParameterItem>,
    /// CWMP 侧的 all-or-nothing 语义开关
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 单路径写入结果。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParameterResultDto {
    pub path: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDto>,
}

/// 新增对象实例请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddObjectRequest {
    pub object_path: String,
    #[serde(default)]
    pub seed_parameters: Vec<SetParameterItem>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 新增对象实例响应体。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddObjectResponse {
    pub instance_number: u32,
    pub instance_path: String,
}

/// 删除对象实例请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteObjectRequest {
    pub instance_path: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 命令执行请求体（命令空间即设备数据模型，如 `Device.Reboot()`）。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperateRequest {
    pub command: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 文件传输调度请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// download | upload
    pub direction: String,
    pub url: String,
    pub file_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub delay_seconds: u32,
    pub command_key: String,
    #[serde(default)]
    pub target_file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// 文件传输返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDto {
    pub device_id: String,
    pub command_key: String,
    pub direction: String,
    pub url: String,
    pub file_type: String,
    pub status: String,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// 订阅创建请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// 为空表示订阅全部设备
    #[serde(default)]
    pub device_id: Option<String>,
    pub event_type: String,
    pub path_pattern: String,
    pub delivery_target: String,
}

/// 订阅返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDto {
    pub subscription_id: String,
    pub device_id: Option<String>,
    pub event_type: String,
    pub path_pattern: String,
    pub delivery_target: String,
    pub status: String,
}

/// 操作记录返回结构。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDto {
    pub operation_id: String,
    pub device_id: String,
    pub kind: String,
    pub status: String,
    pub created_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDto>,
}
