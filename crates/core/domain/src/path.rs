//! 参数路径解析与模式匹配。
//!
//! 数据模型路径为点分层级名（如 `Device.WiFi.Radio.1.Enable`）：
//! - 段名满足 `[A-Za-z][A-Za-z0-9_]*`，或为 1 起始的实例序号
//! - 末尾 `.` 表示对象（非叶子）
//! - 模式中 `*` 匹配单段；以 `.` 结尾的模式匹配整个子树

use serde::{Deserialize, Serialize};

/// 路径解析错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// 路径的一段。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// 命名段（`[A-Za-z][A-Za-z0-9_]*`）
    Name(String),
    /// 实例序号（1 起始）
    Instance(u32),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Instance(index) => write!(f, "{}", index),
        }
    }
}

/// 已解析的参数路径。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterPath {
    segments: Vec<Segment>,
    /// 是否以 `.` 结尾（对象路径）
    is_object: bool,
}

impl ParameterPath {
    /// 解析路径字符串。
    ///
    /// 空串、空段、非法段名均返回 [`PathError::InvalidPath`]。
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::InvalidPath("empty path".to_string()));
        }
        let is_object = raw.ends_with('.');
        let trimmed = raw.strip_suffix('.').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(PathError::InvalidPath(raw.to_string()));
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            segments.push(parse_segment(part).ok_or_else(|| {
                PathError::InvalidPath(format!("bad segment '{}' in '{}'", part, raw))
            })?);
        }
        Ok(Self {
            segments,
            is_object,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_object(&self) -> bool {
        self.is_object
    }

    /// 末段是否为实例序号（`Name.{i}` 形态）。
    pub fn instance_number(&self) -> Option<u32> {
        match self.segments.last() {
            Some(Segment::Instance(index)) => Some(*index),
            _ => None,
        }
    }

    /// 去掉末段实例序号后的对象路径（含结尾 `.`）。
    ///
    /// `Device.WiFi.SSID.2` → `Device.WiFi.SSID.`；末段非序号时返回 None。
    pub fn object_of_instance(&self) -> Option<String> {
        self.instance_number()?;
        let names: Vec<String> = self.segments[..self.segments.len() - 1]
            .iter()
            .map(|segment| segment.to_string())
            .collect();
        Some(format!("{}.", names.join(".")))
    }

    /// 追加实例序号得到实例路径（`Device.WiFi.SSID.` + 2 → `Device.WiFi.SSID.2`）。
    pub fn with_instance(&self, index: u32) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment::Instance(index));
        Self {
            segments,
            is_object: false,
        }
    }
}

impl std::fmt::Display for ParameterPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .segments
            .iter()
            .map(|segment| segment.to_string())
            .collect::<Vec<_>>()
            .join(".");
        if self.is_object {
            write!(f, "{}.", joined)
        } else {
            write!(f, "{}", joined)
        }
    }
}

fn parse_segment(part: &str) -> Option<Segment> {
    if part.is_empty() {
        return None;
    }
    let bytes = part.as_bytes();
    if bytes[0].is_ascii_digit() {
        let index: u32 = part.parse().ok()?;
        if index == 0 {
            return None;
        }
        return Some(Segment::Instance(index));
    }
    if !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    if bytes[1..]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        Some(Segment::Name(part.to_string()))
    } else {
        None
    }
}

/// 路径模式：字面路径、`*` 单段通配或 `.` 结尾的子树前缀。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPattern {
    raw: String,
}

impl PathPattern {
    /// 解析并校验模式。`*` 作为独立段出现，其余段按路径语法校验。
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::InvalidPath("empty pattern".to_string()));
        }
        let trimmed = raw.strip_suffix('.').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(PathError::InvalidPath(raw.to_string()));
        }
        for part in trimmed.split('.') {
            if part == "*" {
                continue;
            }
            if parse_segment(part).is_none() {
                return Err(PathError::InvalidPath(format!(
                    "bad segment '{}' in pattern '{}'",
                    part, raw
                )));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 模式是否为子树前缀（`.` 结尾）。
    pub fn is_prefix(&self) -> bool {
        self.raw.ends_with('.')
    }

    /// 判断叶子路径是否匹配本模式。
    ///
    /// - 前缀模式：逐段比较前缀，`*` 匹配任意单段
    /// - 完整模式：段数相等且逐段匹配
    pub fn matches(&self, path: &str) -> bool {
        let path_parts: Vec<&str> = path.trim_end_matches('.').split('.').collect();
        let pattern = self.raw.trim_end_matches('.');
        let pattern_parts: Vec<&str> = pattern.split('.').collect();

        if self.is_prefix() {
            if pattern_parts.len() > path_parts.len() {
                return false;
            }
        } else if pattern_parts.len() != path_parts.len() {
            return false;
        }

        pattern_parts
            .iter()
            .zip(path_parts.iter())
            .all(|(pattern_part, path_part)| *pattern_part == "*" || pattern_part == path_part)
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_leaf_path() {
        let path = ParameterPath::parse("Device.WiFi.Radio.1.Enable").unwrap();
        assert_eq!(path.segments().len(), 5);
        assert!(!path.is_object());
        assert_eq!(path.to_string(), "Device.WiFi.Radio.1.Enable");
    }

    #[test]
    fn parse_object_path() {
        let path = ParameterPath::parse("Device.WiFi.SSID.").unwrap();
        assert!(path.is_object());
        assert_eq!(path.to_string(), "Device.WiFi.SSID.");
    }

    #[test]
    fn instance_suffix_detected() {
        let path = ParameterPath::parse("Device.WiFi.SSID.2").unwrap();
        assert_eq!(path.instance_number(), Some(2));
        assert_eq!(path.object_of_instance().as_deref(), Some("Device.WiFi.SSID."));
    }

    #[test]
    fn zero_instance_rejected() {
        assert!(ParameterPath::parse("Device.WiFi.SSID.0").is_err());
    }

    #[test]
    fn bad_segments_rejected() {
        assert!(ParameterPath::parse("").is_err());
        assert!(ParameterPath::parse("Device..Enable").is_err());
        assert!(ParameterPath::parse("Device.Wi-Fi.Enable").is_err());
        assert!(ParameterPath::parse("Device.1abc").is_err());
    }

    #[test]
    fn pattern_wildcard_matches_single_segment() {
        let pattern = PathPattern::parse("Device.WiFi.Radio.*.Channel").unwrap();
        assert!(pattern.matches("Device.WiFi.Radio.1.Channel"));
        assert!(pattern.matches("Device.WiFi.Radio.2.Channel"));
        assert!(!pattern.matches("Device.WiFi.Radio.1.2.Channel"));
        assert!(!pattern.matches("Device.WiFi.Radio.1.Enable"));
    }

    #[test]
    fn prefix_pattern_matches_subtree() {
        let pattern = PathPattern::parse("Device.DeviceInfo.").unwrap();
        assert!(pattern.matches("Device.DeviceInfo.SoftwareVersion"));
        assert!(pattern.matches("Device.DeviceInfo.MemoryStatus.Total"));
        assert!(!pattern.matches("Device.WiFi.Radio.1.Enable"));
    }

    #[test]
    fn literal_pattern_is_exact() {
        let pattern = PathPattern::parse("Device.WiFi.Radio.1.Enable").unwrap();
        assert!(pattern.matches("Device.WiFi.Radio.1.Enable"));
        assert!(!pattern.matches("Device.WiFi.Radio.1"));
    }
}
