pub mod path;
pub mod value;

pub use path::{ParameterPath, PathError, PathPattern};
pub use value::{validate_value, ParamType};

use serde::{Deserialize, Serialize};

/// 设备身份：所有模块共享的规范化标识。
///
/// 两类设备：
/// - `UspAgent`：现代协议 Agent，端点 ID 由 Agent 首次握手时自报（如 `proto::oui-serial`）
/// - `CwmpCpe`：传统 CPE，四元组 (Manufacturer, OUI, ProductClass, SerialNumber)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceId {
    UspAgent(String),
    CwmpCpe {
        manufacturer: String,
        oui: String,
        product_class: String,
        serial_number: String,
    },
}

/// 设备协议类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// TR-369 / USP
    Usp,
    /// TR-069 / CWMP
    Cwmp,
}

impl DeviceId {
    /// 构造 CWMP 四元组身份。
    pub fn cwmp(
        manufacturer: impl Into<String>,
        oui: impl Into<String>,
        product_class: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        Self::CwmpCpe {
            manufacturer: manufacturer.into(),
            oui: oui.into(),
            product_class: product_class.into(),
            serial_number: serial_number.into(),
        }
    }

    /// 构造 USP Agent 身份。
    pub fn usp(endpoint_id: impl Into<String>) -> Self {
        Self::UspAgent(endpoint_id.into())
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::UspAgent(_) => DeviceKind::Usp,
            Self::CwmpCpe { .. } => DeviceKind::Cwmp,
        }
    }

    /// 规范化字符串形式。
    ///
    /// - USP：端点 ID 原样
    /// - CWMP：`cwmp:{manufacturer}:{oui}:{product_class}:{serial_number}`
    pub fn canonical(&self) -> String {
        match self {
            Self::UspAgent(endpoint_id) => endpoint_id.clone(),
            Self::CwmpCpe {
                manufacturer,
                oui,
                product_class,
                serial_number,
            } => format!(
                "cwmp:{}:{}:{}:{}",
                manufacturer, oui, product_class, serial_number
            ),
        }
    }

    /// 从规范化字符串还原身份。
    ///
    /// `cwmp:` 前缀且恰好四段的按 CPE 解析，其余一律视为 USP 端点 ID。
    pub fn parse(canonical: &str) -> Self {
        if let Some(rest) = canonical.strip_prefix("cwmp:") {
            let parts: Vec<&str> = rest.splitn(4, ':').collect();
            if parts.len() == 4 && !parts[1].is_empty() && !parts[3].is_empty() {
                return Self::CwmpCpe {
                    manufacturer: parts[0].to_string(),
                    oui: parts[1].to_string(),
                    product_class: parts[2].to_string(),
                    serial_number: parts[3].to_string(),
                };
            }
        }
        Self::UspAgent(canonical.to_string())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
