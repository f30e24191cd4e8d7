//! CWMP 错误类型与故障码。
//!
//! 故障码空间 9000..9019 与 TR-069 注册表逐位一致。

/// TR-069 CWMP 故障码。
pub mod fault_codes {
    pub const METHOD_NOT_SUPPORTED: u32 = 9000;
    pub const REQUEST_DENIED: u32 = 9001;
    pub const INTERNAL_ERROR: u32 = 9002;
    pub const INVALID_ARGUMENTS: u32 = 9003;
    pub const RESOURCES_EXCEEDED: u32 = 9004;
    pub const INVALID_PARAMETER_NAME: u32 = 9005;
    pub const INVALID_PARAMETER_TYPE: u32 = 9006;
    pub const INVALID_PARAMETER_VALUE: u32 = 9007;
    pub const NON_WRITABLE_PARAMETER: u32 = 9008;
    pub const NOTIFICATION_REQUEST_REJECTED: u32 = 9009;
    pub const DOWNLOAD_FAILURE: u32 = 9010;
    pub const UPLOAD_FAILURE: u32 = 9011;
    pub const FILE_TRANSFER_AUTH_FAILURE: u32 = 9012;
    pub const UNSUPPORTED_TRANSFER_PROTOCOL: u32 = 9013;
    pub const FILE_TRANSFER_FAILURE: u32 = 9014;
    pub const FILE_TRANSFER_CONTACT_FAILURE: u32 = 9015;
    pub const FILE_TRANSFER_ACCESS_FAILURE: u32 = 9016;
    pub const FILE_TRANSFER_INCOMPLETE: u32 = 9017;
    pub const FILE_TRANSFER_CORRUPTED: u32 = 9018;
    pub const FILE_TRANSFER_FILE_AUTH_FAILURE: u32 = 9019;
}

/// CWMP 引擎错误。
#[derive(Debug, Clone, thiserror::Error)]
pub enum CwmpError {
    /// 报文不是合法 XML / SOAP
    #[error("envelope parse error: {0}")]
    Parse(String),

    /// 报文超出配置的大小上限
    #[error("envelope too large: {0} bytes")]
    EnvelopeTooLarge(usize),

    /// 设备回送的 CWMP Fault（码与文案原样透传）
    #[error("cwmp fault {code}: {text}")]
    Fault { code: u32, text: String },

    /// 会话在 RPC 在途时丢失
    #[error("session lost")]
    SessionLost,

    /// 操作员侧超时
    #[error("request timed out")]
    Timeout,

    #[error("device unknown: {0}")]
    DeviceUnknown(String),

    /// 目标设备不是 CWMP CPE
    #[error("device {0} is not a cwmp cpe")]
    EngineMismatch(String),
}
