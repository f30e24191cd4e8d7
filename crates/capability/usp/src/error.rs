//! USP 引擎错误类型定义
//!
//! 错误码对齐 TR-369 的 7000 号段；Agent 回送的 Error 报文
//! 以 `Device` 变体原样上抛（码与文案都不改写）。

/// USP 引擎错误。
#[derive(Debug, Clone, thiserror::Error)]
pub enum UspError {
    #[error("message format error: {0}")]
    MessageFormat(String),

    #[error("message structure error: {0}")]
    MessageStructure(String),

    #[error("operation failure: {0}")]
    OperationFailure(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("resources exceeded: {0}")]
    ResourcesExceeded(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unsupported parameter: {0}")]
    UnsupportedParam(String),

    #[error("parameter read-only: {0}")]
    ParameterReadOnly(String),

    #[error("value conflict: {0}")]
    ValueConflict(String),

    /// 操作员侧超时（等待应答到期）
    #[error("request timed out")]
    Timeout,

    /// 发送路径上的传输故障
    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("device unknown: {0}")]
    DeviceUnknown(String),

    /// 目标设备不是 USP Agent
    #[error("device {0} is not a usp agent")]
    EngineMismatch(String),

    /// Agent 回送的 Error 报文（码与文案原样透传）
    #[error("agent error {code}: {message}")]
    Device { code: u32, message: String },
}

impl UspError {
    /// 对应的 7000 号段错误码（控制面语义错误）。
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::MessageFormat(_) => Some(7000),
            Self::MessageStructure(_) => Some(7001),
            Self::OperationFailure(_) => Some(7002),
            Self::InvalidArguments(_) => Some(7004),
            Self::ResourcesExceeded(_) => Some(7005),
            Self::PermissionDenied(_) => Some(7006),
            Self::InvalidConfig(_) => Some(7007),
            Self::InvalidPath(_) => Some(7008),
            Self::UnsupportedParam(_) => Some(7010),
            Self::ParameterReadOnly(_) => Some(7011),
            Self::ValueConflict(_) => Some(7012),
            Self::Device { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否值得调用方重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::TransportLost(_))
    }
}
