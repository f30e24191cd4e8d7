//! 存储层错误类型。

/// 存储网关错误。
///
/// 传输类故障归为 `Unavailable`（可重试），其余为语义错误。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 底层存储不可达或执行失败
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// 目标记录不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 唯一性冲突（身份、实例号等）
    #[error("conflict: {0}")]
    Conflict(String),

    /// 试图改写已进入终态的操作
    #[error("operation {0} is terminal")]
    TerminalState(String),

    /// 输入不合法（路径、状态字符串等）
    #[error("invalid: {0}")]
    Invalid(String),
}

impl StorageError {
    /// 是否值得按退避策略重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}
