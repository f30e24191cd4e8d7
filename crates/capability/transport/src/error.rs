//! 传输层错误类型定义

/// 传输错误。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 发送超时（datagram 重试一次后仍失败）
    #[error("transport timeout: {0}")]
    Timeout(String),

    /// 目标端点当前无可用连接
    #[error("endpoint not connected: {0}")]
    NotConnected(String),

    /// 协议帧不合法
    #[error("frame error: {0}")]
    Frame(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 通道关闭
    #[error("channel closed")]
    ChannelClosed,
}
