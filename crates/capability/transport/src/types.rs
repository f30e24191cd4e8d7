//! 传输层共享类型定义

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 入站帧：适配器推给引擎的最小单元。
///
/// `origin` 是适配器语义下的应答地址（队列端点、主题端点、
/// 报文源地址或 WebSocket 路径端点），引擎据此更新设备传输线索。
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub transport: &'static str,
    pub origin: String,
    pub payload: bytes::Bytes,
}

/// 凭据：用户名/密钥，或证书路径。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MtpCredentials {
    UserSecret { user: String, secret: String },
    Cert { cert_file: String },
}

/// 重连退避配置。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconnectBackoff {
    #[serde(default = "default_backoff_min")]
    pub min_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: u64,
}

fn default_backoff_min() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_backoff_factor() -> u64 {
    2
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            min_ms: default_backoff_min(),
            max_ms: default_backoff_max(),
            factor: default_backoff_factor(),
        }
    }
}

impl ReconnectBackoff {
    /// 第 `attempt` 次重连前的等待时长（attempt 从 0 计）。
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1);
        let mut delay = self.min_ms.max(1);
        for _ in 0..attempt {
            delay = delay.saturating_mul(factor);
            if delay >= self.max_ms {
                return Duration::from_millis(self.max_ms);
            }
        }
        Duration::from_millis(delay.min(self.max_ms))
    }
}

/// 适配器通用配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtpConfig {
    #[serde(default)]
    pub enabled: bool,
    /// broker 地址 / 监听地址（适配器语义各异）
    pub endpoint: String,
    #[serde(default)]
    pub credentials: Option<MtpCredentials>,
    #[serde(default = "default_keepalive")]
    pub keepalive_seconds: u64,
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    #[serde(default)]
    pub reconnect: ReconnectBackoff,
}

fn default_keepalive() -> u64 {
    30
}

fn default_max_inflight() -> usize {
    64
}

impl MtpConfig {
    /// 从 JSON 配置字符串解析。
    pub fn from_json(json: &str) -> Result<Self, crate::TransportError> {
        serde_json::from_str(json)
            .map_err(|err| crate::TransportError::ConfigParse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_with_defaults() {
        let json = r#"{"enabled": true, "endpoint": "127.0.0.1:61613"}"#;
        let config = MtpConfig::from_json(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.keepalive_seconds, 30);
        assert_eq!(config.reconnect.factor, 2);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = ReconnectBackoff {
            min_ms: 1_000,
            max_ms: 4_000,
            factor: 2,
        };
        assert_eq!(backoff.delay(0).as_millis(), 1_000);
        assert_eq!(backoff.delay(1).as_millis(), 2_000);
        assert_eq!(backoff.delay(5).as_millis(), 4_000);
    }
}
