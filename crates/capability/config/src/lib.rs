//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 连接请求认证方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnReqAuth {
    Basic,
    Digest,
}

/// TLS 配置（ACS 端）。
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: Option<String>,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: String,
    /// 设备离线判定窗口（毫秒）
    pub liveness_window_ms: i64,
    /// 注册表清扫间隔（毫秒）
    pub sweep_interval_ms: u64,
    /// CWMP 会话空闲超时（秒）
    pub session_timeout_seconds: u64,
    /// 周期 Inform 间隔（秒），通过 SetParameterValues 下发给设备
    pub inform_interval_seconds: u64,
    /// SOAP 报文大小上限（字节）
    pub max_envelope_size: usize,
    /// 单设备最大并发请求数
    pub max_inflight_per_device: usize,
    /// 关联表容量上限
    pub correlation_table_cap: usize,
    /// 订阅缓存 TTL（秒）
    pub subscription_ttl_seconds: u64,
    /// 幂等键缓存窗口（秒）
    pub idempotency_ttl_seconds: u64,
    /// 操作默认超时（毫秒）
    pub default_timeout_ms: u64,
    pub connreq_auth: ConnReqAuth,
    pub connreq_username: Option<String>,
    pub connreq_password: Option<String>,
    pub tls: TlsConfig,
    /// ACS 端设备认证开关（basic/digest/off）
    pub acs_auth: String,
    pub acs_username: String,
    pub acs_password: String,
    pub stomp_enabled: bool,
    pub stomp_addr: String,
    pub stomp_login: Option<String>,
    pub stomp_passcode: Option<String>,
    pub mqtt_enabled: bool,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub websocket_enabled: bool,
    pub websocket_addr: String,
    pub datagram_enabled: bool,
    pub datagram_addr: String,
    /// 传输保活间隔（秒）
    pub keepalive_seconds: u64,
    /// 重连退避（毫秒）：下限 / 上限 / 倍率
    pub reconnect_backoff_min_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub reconnect_backoff_factor: u64,
    /// 持久化工作协程数
    pub persist_workers: usize,
    /// 入站事件缓冲上限（超出即丢弃并计数）
    pub event_queue_cap: usize,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DMS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("DMS_DATABASE_URL".to_string()))?;
        let http_addr = env::var("DMS_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let redis_url =
            env::var("DMS_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let liveness_window_ms = read_i64_with_default("DMS_LIVENESS_WINDOW_MS", 300_000)?;
        let sweep_interval_ms = read_u64_with_default("DMS_SWEEP_INTERVAL_MS", 30_000)?;
        let session_timeout_seconds = read_u64_with_default("DMS_SESSION_TIMEOUT_SECONDS", 30)?;
        let inform_interval_seconds = read_u64_with_default("DMS_INFORM_INTERVAL_SECONDS", 300)?;
        let max_envelope_size = read_usize_with_default("DMS_MAX_ENVELOPE_SIZE", 65_536)?;
        let max_inflight_per_device = read_usize_with_default("DMS_MAX_INFLIGHT_PER_DEVICE", 8)?;
        let correlation_table_cap = read_usize_with_default("DMS_CORRELATION_TABLE_CAP", 65_536)?;
        let subscription_ttl_seconds = read_u64_with_default("DMS_SUBSCRIPTION_TTL_SECONDS", 86_400)?;
        let idempotency_ttl_seconds = read_u64_with_default("DMS_IDEMPOTENCY_TTL_SECONDS", 300)?;
        let default_timeout_ms = read_u64_with_default("DMS_DEFAULT_TIMEOUT_MS", 30_000)?;
        let connreq_auth = match env::var("DMS_CONNREQ_AUTH")
            .unwrap_or_else(|_| "basic".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "digest" => ConnReqAuth::Digest,
            _ => ConnReqAuth::Basic,
        };
        let connreq_username = read_optional("DMS_CONNREQ_USERNAME");
        let connreq_password = read_optional("DMS_CONNREQ_PASSWORD");
        let tls = TlsConfig {
            enabled: read_bool_with_default("DMS_TLS_ENABLED", false),
            cert_file: env::var("DMS_TLS_CERT").unwrap_or_else(|_| "server.crt".to_string()),
            key_file: env::var("DMS_TLS_KEY").unwrap_or_else(|_| "server.key".to_string()),
            ca_file: read_optional("DMS_TLS_CA"),
        };
        let acs_auth = env::var("DMS_ACS_AUTH").unwrap_or_else(|_| "basic".to_string());
        let acs_username = env::var("DMS_ACS_USERNAME").unwrap_or_else(|_| "cpe".to_string());
        let acs_password = env::var("DMS_ACS_PASSWORD").unwrap_or_default();
        let stomp_enabled = read_bool_with_default("DMS_STOMP_ENABLED", false);
        let stomp_addr =
            env::var("DMS_STOMP_ADDR").unwrap_or_else(|_| "127.0.0.1:61613".to_string());
        let stomp_login = read_optional("DMS_STOMP_LOGIN");
        let stomp_passcode = read_optional("DMS_STOMP_PASSCODE");
        let mqtt_enabled = read_bool_with_default("DMS_MQTT_ENABLED", false);
        let mqtt_host = env::var("DMS_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("DMS_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("DMS_MQTT_USERNAME");
        let mqtt_password = read_optional("DMS_MQTT_PASSWORD");
        let websocket_enabled = read_bool_with_default("DMS_WEBSOCKET_ENABLED", false);
        let websocket_addr =
            env::var("DMS_WEBSOCKET_ADDR").unwrap_or_else(|_| "0.0.0.0:7600".to_string());
        let datagram_enabled = read_bool_with_default("DMS_DATAGRAM_ENABLED", false);
        let datagram_addr =
            env::var("DMS_DATAGRAM_ADDR").unwrap_or_else(|_| "0.0.0.0:7601".to_string());
        let keepalive_seconds = read_u64_with_default("DMS_KEEPALIVE_SECONDS", 30)?;
        let reconnect_backoff_min_ms = read_u64_with_default("DMS_RECONNECT_BACKOFF_MIN_MS", 1_000)?;
        let reconnect_backoff_max_ms =
            read_u64_with_default("DMS_RECONNECT_BACKOFF_MAX_MS", 30_000)?;
        let reconnect_backoff_factor = read_u64_with_default("DMS_RECONNECT_BACKOFF_FACTOR", 2)?;
        let persist_workers = read_usize_with_default("DMS_PERSIST_WORKERS", 4)?;
        let event_queue_cap = read_usize_with_default("DMS_EVENT_QUEUE_CAP", 10_000)?;

        Ok(Self {
            http_addr,
            database_url,
            redis_url,
            liveness_window_ms,
            sweep_interval_ms,
            session_timeout_seconds,
            inform_interval_seconds,
            max_envelope_size,
            max_inflight_per_device,
            correlation_table_cap,
            subscription_ttl_seconds,
            idempotency_ttl_seconds,
            default_timeout_ms,
            connreq_auth,
            connreq_username,
            connreq_password,
            tls,
            acs_auth,
            acs_username,
            acs_password,
            stomp_enabled,
            stomp_addr,
            stomp_login,
            stomp_passcode,
            mqtt_enabled,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            websocket_enabled,
            websocket_addr,
            datagram_enabled,
            datagram_addr,
            keepalive_seconds,
            reconnect_backoff_min_ms,
            reconnect_backoff_max_ms,
            reconnect_backoff_factor,
            persist_workers,
            event_queue_cap,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_i64_with_default(key: &str, default: i64) -> Result<i64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<i64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
