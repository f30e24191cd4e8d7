//! 参数值类型与边界校验。
//!
//! 参数值一律以规范化字符串存储，数值转换发生在边界处。

use serde::{Deserialize, Serialize};

/// 参数数据类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamType {
    String,
    Int,
    UnsignedInt,
    Boolean,
    DateTime,
    Base64,
}

impl Default for ParamType {
    fn default() -> Self {
        Self::String
    }
}

impl ParamType {
    /// CWMP 报文里使用的 `xsd:` 类型名。
    pub fn xsd_name(&self) -> &'static str {
        match self {
            Self::String => "xsd:string",
            Self::Int => "xsd:int",
            Self::UnsignedInt => "xsd:unsignedInt",
            Self::Boolean => "xsd:boolean",
            Self::DateTime => "xsd:dateTime",
            Self::Base64 => "xsd:base64",
        }
    }

    /// 从 `xsd:` 名或小写名解析，未知类型按 string 处理。
    pub fn parse(name: &str) -> Self {
        match name.trim_start_matches("xsd:") {
            "int" => Self::Int,
            "unsignedInt" => Self::UnsignedInt,
            "boolean" => Self::Boolean,
            "dateTime" => Self::DateTime,
            "base64" => Self::Base64,
            _ => Self::String,
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::UnsignedInt => "unsignedInt",
            Self::Boolean => "boolean",
            Self::DateTime => "dateTime",
            Self::Base64 => "base64",
        };
        write!(f, "{}", name)
    }
}

/// 校验字符串值是否可按声明类型解析。
///
/// 返回 `Err(reason)` 供调用方映射为 TypeMismatch 类错误。
pub fn validate_value(value: &str, param_type: ParamType) -> Result<(), String> {
    match param_type {
        ParamType::String | ParamType::DateTime => Ok(()),
        ParamType::Int => value
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| format!("'{}' is not an int", value)),
        ParamType::UnsignedInt => value
            .parse::<u64>()
            .map(|_| ())
            .map_err(|_| format!("'{}' is not an unsignedInt", value)),
        ParamType::Boolean => match value {
            "true" | "false" | "0" | "1" => Ok(()),
            _ => Err(format!("'{}' is not a boolean", value)),
        },
        ParamType::Base64 => {
            if value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=' | b'\n'))
            {
                Ok(())
            } else {
                Err("invalid base64 payload".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xsd_names_round_trip() {
        for param_type in [
            ParamType::String,
            ParamType::Int,
            ParamType::UnsignedInt,
            ParamType::Boolean,
            ParamType::DateTime,
            ParamType::Base64,
        ] {
            assert_eq!(ParamType::parse(param_type.xsd_name()), param_type);
        }
    }

    #[test]
    fn boolean_values() {
        assert!(validate_value("true", ParamType::Boolean).is_ok());
        assert!(validate_value("1", ParamType::Boolean).is_ok());
        assert!(validate_value("yes", ParamType::Boolean).is_err());
    }

    #[test]
    fn numeric_values() {
        assert!(validate_value("-42", ParamType::Int).is_ok());
        assert!(validate_value("-42", ParamType::UnsignedInt).is_err());
        assert!(validate_value("9000", ParamType::UnsignedInt).is_ok());
        assert!(validate_value("4.2", ParamType::Int).is_err());
    }
}
