//! 连接请求客户端。
//!
//! 对设备暴露的回调 URL 做一次带认证的 HTTP GET：任何 2xx 视为
//! 已确认，非 2xx 或超时记一次失败并累加设备失败计数。这只是
//! 尽力而为的"唤醒"信号，不是投递通道——真正的 RPC 要等设备
//! 自己开新会话来取。

use crate::auth::digest_authorization;
use base64::Engine;
use dms_config::ConnReqAuth;
use std::time::Duration;
use tracing::{debug, warn};

/// 连接请求客户端。
pub struct ConnectionRequester {
    client: reqwest::Client,
    auth: ConnReqAuth,
    username: Option<String>,
    password: Option<String>,
}

impl ConnectionRequester {
    pub fn new(auth: ConnReqAuth, username: Option<String>, password: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();
        Self {
            client,
            auth,
            username,
            password,
        }
    }

    /// 发起一次唤醒。返回 true 表示设备已确认（2xx）。
    pub async fn wake(&self, url: &str, username: Option<&str>, password: Option<&str>) -> bool {
        dms_telemetry::record_connreq_attempt();
        let username = username.or(self.username.as_deref()).unwrap_or_default();
        let password = password.or(self.password.as_deref()).unwrap_or_default();

        let first = match self.auth {
            ConnReqAuth::Basic => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                self.client
                    .get(url)
                    .header("Authorization", format!("Basic {}", token))
                    .send()
                    .await
            }
            ConnReqAuth::Digest => self.client.get(url).send().await,
        };

        let response = match first {
            Ok(response) => response,
            Err(err) => {
                warn!(target: "dms.cwmp", url = %url, error = %err, "connection request failed");
                dms_telemetry::record_connreq_failure();
                return false;
            }
        };

        if response.status().is_success() {
            return true;
        }

        // Digest：401 质询后带认证重试一次
        if self.auth == ConnReqAuth::Digest && response.status().as_u16() == 401 {
            let challenge = response
                .headers()
                .get("www-authenticate")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string());
            if let Some(challenge) = challenge {
                let uri = reqwest::Url::parse(url)
                    .map(|parsed| parsed.path().to_string())
                    .unwrap_or_else(|_| "/".to_string());
                if let Some(header) =
                    digest_authorization(&challenge, "GET", &uri, username, password)
                {
                    match self
                        .client
                        .get(url)
                        .header("Authorization", header)
                        .send()
                        .await
                    {
                        Ok(retry) if retry.status().is_success() => return true,
                        Ok(retry) => {
                            debug!(target: "dms.cwmp", status = retry.status().as_u16(), "connection request denied");
                        }
                        Err(err) => {
                            debug!(target: "dms.cwmp", error = %err, "connection request retry failed");
                        }
                    }
                }
            }
        }

        dms_telemetry::record_connreq_failure();
        false
    }
}
