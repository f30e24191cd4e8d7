//! 数据模型
//!
//! 定义所有存储相关的数据模型与更新结构：
//! - 设备模型：DeviceRecord（身份、描述符、传输线索、活性）
//! - 参数模型：ParameterRecord（(device_id, path) 唯一）
//! - 实例模型：InstanceRecord（(device_id, object_path, instance_number) 唯一）
//! - 操作模型：OperationRecord / OperationPatch / OperationStatus
//! - 传输模型：TransferRecord
//! - 订阅模型：SubscriptionRecord
//! - 设备查询过滤：DeviceFilter

use crate::error::StorageError;
use domain::{now_epoch_ms, DeviceId, DeviceKind, ParamType};

/// 设备记录。
///
/// `device_id` 为规范化字符串主键；CWMP 四元组字段仅对传统设备有值。
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: String,
    pub kind: DeviceKind,
    pub manufacturer: Option<String>,
    pub oui: Option<String>,
    pub product_class: Option<String>,
    pub serial_number: Option<String>,
    pub model_name: Option<String>,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub spec_version: Option<String>,
    pub provisioning_code: Option<String>,
    /// 传统设备的连接请求回调地址与凭据
    pub connection_request_url: Option<String>,
    pub connection_request_username: Option<String>,
    pub connection_request_password: Option<String>,
    pub periodic_inform_enable: bool,
    pub periodic_inform_interval: Option<i64>,
    /// 现代 Agent 最近一次出现的传输地址（适配器名 + 端点地址）
    pub transport_kind: Option<String>,
    pub transport_address: Option<String>,
    pub ip_address: Option<String>,
    pub registered_at_ms: i64,
    /// 初始值等于注册时间
    pub last_contact_ms: i64,
    pub last_bootstrap_ms: Option<i64>,
    pub connection_request_failures: i64,
}

impl DeviceRecord {
    /// 以最小字段构造新设备（其余描述符后续由 Inform/握手补全）。
    pub fn new(id: &DeviceId) -> Self {
        let now = now_epoch_ms();
        let (manufacturer, oui, product_class, serial_number) = match id {
            DeviceId::CwmpCpe {
                manufacturer,
                oui,
                product_class,
                serial_number,
            } => (
                Some(manufacturer.clone()),
                Some(oui.clone()),
                Some(product_class.clone()),
                Some(serial_number.clone()),
            ),
            DeviceId::UspAgent(_) => (None, None, None, None),
        };
        Self {
            device_id: id.canonical(),
            kind: id.kind(),
            manufacturer,
            oui,
            product_class,
            serial_number,
            model_name: None,
            hardware_version: None,
            software_version: None,
            spec_version: None,
            provisioning_code: None,
            connection_request_url: None,
            connection_request_username: None,
            connection_request_password: None,
            periodic_inform_enable: false,
            periodic_inform_interval: None,
            transport_kind: None,
            transport_address: None,
            ip_address: None,
            registered_at_ms: now,
            last_contact_ms: now,
            last_bootstrap_ms: None,
            connection_request_failures: 0,
        }
    }

    /// 按活性窗口判断在线状态。
    pub fn is_online(&self, window_ms: i64, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_contact_ms) <= window_ms
    }
}

/// 设备查询过滤（各条件取合取）。
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub id_prefix: Option<String>,
    pub manufacturer_regex: Option<String>,
    pub product_class_regex: Option<String>,
    /// 仅保留 last_contact 在窗口内的设备
    pub online_within_ms: Option<i64>,
}

impl DeviceFilter {
    /// 内存实现用的匹配判断；正则非法时按不匹配处理。
    pub fn matches(&self, record: &DeviceRecord, now_ms: i64) -> bool {
        if let Some(prefix) = &self.id_prefix {
            if !record.device_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(pattern) = &self.manufacturer_regex {
            let Some(manufacturer) = &record.manufacturer else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(manufacturer) => {}
                _ => return false,
            }
        }
        if let Some(pattern) = &self.product_class_regex {
            let Some(product_class) = &record.product_class else {
                return false;
            };
            match regex::Regex::new(pattern) {
                Ok(re) if re.is_match(product_class) => {}
                _ => return false,
            }
        }
        if let Some(window) = self.online_within_ms {
            if now_ms.saturating_sub(record.last_contact_ms) > window {
                return false;
            }
        }
        true
    }
}

/// 参数记录。(device_id, path) 唯一，值一律为规范化字符串。
#[derive(Debug, Clone)]
pub struct ParameterRecord {
    pub device_id: String,
    pub path: String,
    pub value: String,
    pub param_type: ParamType,
    pub writable: bool,
    pub last_update_ms: i64,
}

/// 对象实例记录。`object_path` 以 `.` 结尾。
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub device_id: String,
    pub object_path: String,
    pub instance_number: u32,
    pub created_at_ms: i64,
}

/// 操作状态。离开 {Pending, InProgress} 后即为终态，不可再变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StorageError> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            other => Err(StorageError::Invalid(format!(
                "unknown operation status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 在途操作记录。
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation_id: String,
    pub device_id: String,
    pub kind: String,
    pub payload: String,
    pub status: OperationStatus,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub timeout_at_ms: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: i64,
}

impl OperationRecord {
    pub fn new(device_id: &str, kind: &str, payload: String, timeout_at_ms: Option<i64>) -> Self {
        Self {
            operation_id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            kind: kind.to_string(),
            payload,
            status: OperationStatus::Pending,
            created_at_ms: now_epoch_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            timeout_at_ms,
            result: None,
            error: None,
            retry_count: 0,
        }
    }
}

/// 操作状态补丁（None 字段保持原值）。
#[derive(Debug, Clone, Default)]
pub struct OperationPatch {
    pub status: Option<OperationStatus>,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub retry_count: Option<i64>,
}

impl OperationPatch {
    /// 以终态 + 完成时间构造补丁。
    pub fn finish(status: OperationStatus) -> Self {
        Self {
            status: Some(status),
            completed_at_ms: Some(now_epoch_ms()),
            ..Self::default()
        }
    }
}

/// 文件传输记录。CommandKey 对服务端不透明，是 TransferComplete 的关联句柄。
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub device_id: String,
    pub command_key: String,
    /// download | upload
    pub direction: String,
    pub url: String,
    pub file_type: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub file_size: Option<i64>,
    pub target_file_name: Option<String>,
    pub delay_seconds: i64,
    /// scheduled | in_progress | completed | failed
    pub status: String,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub fault: Option<String>,
}

/// 订阅记录。
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    /// None 表示订阅全部设备
    pub device_id: Option<String>,
    pub event_type: String,
    pub path_pattern: String,
    pub delivery_target: String,
    /// active | suspended
    pub status: String,
    pub created_at_ms: i64,
    pub last_delivery_ms: Option<i64>,
}

impl SubscriptionRecord {
    /// 订阅的幂等元组：同元组重复创建应返回既有订阅。
    pub fn tuple_key(&self) -> (Option<&str>, &str, &str, &str) {
        (
            self.device_id.as_deref(),
            &self.event_type,
            &self.path_pattern,
            &self.delivery_target,
        )
    }
}
