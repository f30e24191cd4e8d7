//! 设备侧 HTTP 认证：Basic 与 Digest（RFC 2617）。
//!
//! ACS 端用于校验 CPE 的入站 POST；连接请求客户端用同一套
//! Digest 计算去应答设备的质询。nonce 采用无状态形式
//! `{ts:x}.{md5(ts:secret)}`，校验时重算哈希并检查时效。

use base64::Engine;
use domain::now_epoch_ms;
use md5::{Digest, Md5};
use std::collections::HashMap;

/// nonce 有效期（毫秒）。
const NONCE_TTL_MS: i64 = 300_000;

/// ACS 端认证模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Off,
    Basic,
    Digest,
}

impl AuthMode {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "basic" => Self::Basic,
            "digest" => Self::Digest,
            _ => Self::Off,
        }
    }
}

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// 设备认证器。
pub struct DeviceAuth {
    mode: AuthMode,
    username: String,
    password: String,
    realm: String,
    nonce_secret: String,
}

impl DeviceAuth {
    pub fn new(mode: AuthMode, username: String, password: String) -> Self {
        let nonce_secret = format!("{:x}", rand::random::<u128>());
        Self {
            mode,
            username,
            password,
            realm: "dms-acs".to_string(),
            nonce_secret,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    fn fresh_nonce(&self) -> String {
        let ts = now_epoch_ms();
        format!("{:x}.{}", ts, md5_hex(&format!("{}:{}", ts, self.nonce_secret)))
    }

    fn nonce_valid(&self, nonce: &str) -> bool {
        let Some((ts_hex, hash)) = nonce.split_once('.') else {
            return false;
        };
        let Ok(ts) = i64::from_str_radix(ts_hex, 16) else {
            return false;
        };
        if now_epoch_ms().saturating_sub(ts) > NONCE_TTL_MS {
            return false;
        }
        md5_hex(&format!("{}:{}", ts, self.nonce_secret)) == hash
    }

    /// 401 应答里的 WWW-Authenticate 值。
    pub fn challenge(&self) -> Option<String> {
        match self.mode {
            AuthMode::Off => None,
            AuthMode::Basic => Some(format!("Basic realm=\"{}\"", self.realm)),
            AuthMode::Digest => Some(format!(
                "Digest realm=\"{}\", qop=\"auth\", nonce=\"{}\"",
                self.realm,
                self.fresh_nonce()
            )),
        }
    }

    /// 校验 Authorization 头。
    pub fn verify(&self, authorization: Option<&str>, method: &str, uri: &str) -> bool {
        match self.mode {
            AuthMode::Off => true,
            AuthMode::Basic => {
                let Some(encoded) = authorization.and_then(|value| value.strip_prefix("Basic "))
                else {
                    return false;
                };
                let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim())
                else {
                    return false;
                };
                let Ok(text) = String::from_utf8(decoded) else {
                    return false;
                };
                text == format!("{}:{}", self.username, self.password)
            }
            AuthMode::Digest => {
                let Some(params) = authorization
                    .and_then(|value| value.strip_prefix("Digest "))
                    .map(parse_digest_params)
                else {
                    return false;
                };
                let (Some(username), Some(nonce), Some(response), Some(uri_param)) = (
                    params.get("username"),
                    params.get("nonce"),
                    params.get("response"),
                    params.get("uri"),
                ) else {
                    return false;
                };
                if username != &self.username || !self.nonce_valid(nonce) || uri_param != uri {
                    return false;
                }
                let ha1 = md5_hex(&format!("{}:{}:{}", self.username, self.realm, self.password));
                let ha2 = md5_hex(&format!("{}:{}", method, uri));
                let expected = match (params.get("qop"), params.get("nc"), params.get("cnonce")) {
                    (Some(qop), Some(nc), Some(cnonce)) => md5_hex(&format!(
                        "{}:{}:{}:{}:{}:{}",
                        ha1, nonce, nc, cnonce, qop, ha2
                    )),
                    _ => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
                };
                &expected == response
            }
        }
    }
}

/// 解析 Digest 头里的 key="value" / key=value 列表。
pub fn parse_digest_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for part in split_digest_parts(input) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        params.insert(key.trim().to_ascii_lowercase(), value.to_string());
    }
    params
}

/// 按逗号切分，但不切引号内的逗号。
fn split_digest_parts(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            other => current.push(other),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// 依据设备质询计算 Digest Authorization（连接请求客户端用）。
pub fn digest_authorization(
    challenge: &str,
    method: &str,
    uri: &str,
    username: &str,
    password: &str,
) -> Option<String> {
    let params = parse_digest_params(challenge.strip_prefix("Digest ")?);
    let realm = params.get("realm")?;
    let nonce = params.get("nonce")?;
    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    if params.get("qop").map(|qop| qop.contains("auth")).unwrap_or(false) {
        let cnonce = format!("{:x}", rand::random::<u64>());
        let nc = "00000001";
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, nonce, nc, cnonce, ha2
        ));
        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", qop=auth, nc={}, cnonce=\"{}\", response=\"{}\"",
            username, realm, nonce, uri, nc, cnonce, response
        );
        if let Some(opaque) = params.get("opaque") {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        Some(header)
    } else {
        let response = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));
        Some(format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            username, realm, nonce, uri, response
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn basic_auth_verifies_exact_credentials() {
        let auth = DeviceAuth::new(AuthMode::Basic, "cpe".to_string(), "secret".to_string());
        let header = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("cpe:secret")
        );
        assert!(auth.verify(Some(&header), "POST", "/"));
        let wrong = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("cpe:wrong")
        );
        assert!(!auth.verify(Some(&wrong), "POST", "/"));
        assert!(!auth.verify(None, "POST", "/"));
    }

    #[test]
    fn digest_challenge_and_response_round_trip() {
        let auth = DeviceAuth::new(AuthMode::Digest, "cpe".to_string(), "secret".to_string());
        let challenge = auth.challenge().expect("challenge");
        let header =
            digest_authorization(&challenge, "POST", "/", "cpe", "secret").expect("authorization");
        assert!(auth.verify(Some(&header), "POST", "/"));
    }

    #[test]
    fn digest_with_wrong_password_rejected() {
        let auth = DeviceAuth::new(AuthMode::Digest, "cpe".to_string(), "secret".to_string());
        let challenge = auth.challenge().expect("challenge");
        let header =
            digest_authorization(&challenge, "POST", "/", "cpe", "bad").expect("authorization");
        assert!(!auth.verify(Some(&header), "POST", "/"));
    }

    #[test]
    fn stale_nonce_rejected() {
        let auth = DeviceAuth::new(AuthMode::Digest, "cpe".to_string(), "secret".to_string());
        // 伪造一个过期 nonce
        let stale = format!("{:x}.deadbeef", 1_000i64);
        let header = format!(
            "Digest username=\"cpe\", realm=\"dms-acs\", nonce=\"{}\", uri=\"/\", response=\"0\"",
            stale
        );
        assert!(!auth.verify(Some(&header), "POST", "/"));
    }
}
