//! 门面错误：面向操作员的结构化失败体。
//!
//! 分类（kind）而非类型：Transport / Protocol / Semantic / Session /
//! Lifecycle / Store / Control。语义错误连同协议故障码原样上抛；
//! message 之外不出现原始协议文本。

use api_contract::FailureDto;

/// 错误类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Semantic,
    Session,
    Lifecycle,
    Store,
    Control,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Semantic => "semantic",
            Self::Session => "session",
            Self::Lifecycle => "lifecycle",
            Self::Store => "store",
            Self::Control => "control",
        }
    }
}

/// 结构化操作失败。
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct OpsError {
    pub kind: ErrorKind,
    pub code: Option<u32>,
    pub message: String,
    pub device_id: Option<String>,
    pub path: Option<String>,
    pub retryable: bool,
}

impl OpsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            device_id: None,
            path: None,
            retryable: matches!(kind, ErrorKind::Transport | ErrorKind::Control | ErrorKind::Store),
        }
    }

    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    pub fn timeout(device_id: &str) -> Self {
        Self::new(ErrorKind::Control, "request timed out").with_device(device_id)
    }

    pub fn device_unknown(device_id: &str) -> Self {
        Self::new(ErrorKind::Lifecycle, format!("device unknown: {}", device_id))
            .with_device(device_id)
            .not_retryable()
    }

    pub fn invalid_path(path: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, detail.into())
            .with_path(path)
            .not_retryable()
    }

    pub fn pushback() -> Self {
        Self::new(ErrorKind::Control, "persist queue saturated")
    }

    pub fn to_dto(&self) -> FailureDto {
        FailureDto {
            kind: self.kind.as_str().to_string(),
            code: self.code,
            message: self.message.clone(),
            device_id: self.device_id.clone(),
            path: self.path.clone(),
            retryable: self.retryable,
        }
    }
}

impl From<dms_storage::StorageError> for OpsError {
    fn from(err: dms_storage::StorageError) -> Self {
        match &err {
            dms_storage::StorageError::NotFound(message) => {
                Self::new(ErrorKind::Semantic, format!("not found: {}", message)).not_retryable()
            }
            _ => Self::new(ErrorKind::Store, err.to_string()),
        }
    }
}

/// USP 引擎错误映射。
impl From<dms_usp::UspError> for OpsError {
    fn from(err: dms_usp::UspError) -> Self {
        use dms_usp::UspError;
        let code = err.code();
        let mut ops_error = match &err {
            UspError::Timeout => Self::new(ErrorKind::Control, "request timed out"),
            UspError::TransportLost(message) => {
                Self::new(ErrorKind::Transport, message.clone())
            }
            UspError::DeviceUnknown(device_id) => {
                Self::new(ErrorKind::Lifecycle, format!("device unknown: {}", device_id))
                    .not_retryable()
            }
            UspError::EngineMismatch(message) => {
                Self::new(ErrorKind::Lifecycle, message.clone()).not_retryable()
            }
            UspError::MessageFormat(_) | UspError::MessageStructure(_) => {
                Self::new(ErrorKind::Protocol, err.to_string()).not_retryable()
            }
            other => Self::new(ErrorKind::Semantic, other.to_string()).not_retryable(),
        };
        if let Some(code) = code {
            ops_error = ops_error.with_code(code);
        }
        ops_error
    }
}

/// CWMP 引擎错误映射（故障码原样透传）。
impl From<dms_cwmp::CwmpError> for OpsError {
    fn from(err: dms_cwmp::CwmpError) -> Self {
        use dms_cwmp::CwmpError;
        match err {
            CwmpError::Fault { code, text } => {
                Self::new(ErrorKind::Semantic, text).with_code(code).not_retryable()
            }
            CwmpError::SessionLost => Self::new(ErrorKind::Session, "session lost"),
            CwmpError::Timeout => Self::new(ErrorKind::Control, "request timed out"),
            CwmpError::DeviceUnknown(device_id) => Self::device_unknown(&device_id),
            CwmpError::EngineMismatch(message) => {
                Self::new(ErrorKind::Lifecycle, message).not_retryable()
            }
            CwmpError::EnvelopeTooLarge(size) => {
                Self::new(ErrorKind::Semantic, format!("envelope too large: {}", size))
                    .with_code(dms_cwmp::fault_codes::RESOURCES_EXCEEDED)
                    .not_retryable()
            }
            CwmpError::Parse(message) => {
                Self::new(ErrorKind::Protocol, message).not_retryable()
            }
        }
    }
}
