//! 服务端发起的 RPC 与应答信封生成。

use crate::soap::ParameterValue;
use crate::xml::escape;

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const CWMP_NS: &str = "urn:dslforum-org:cwmp-1-2";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// 文件传输调度参数（Download / Upload 共用的字段在各自变体里展开）。
#[derive(Debug, Clone)]
pub struct DownloadArgs {
    pub command_key: String,
    pub file_type: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub file_size: u64,
    pub target_file_name: String,
    pub delay_seconds: u32,
    pub success_url: String,
    pub failure_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub command_key: String,
    pub file_type: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub delay_seconds: u32,
}

/// 服务端可下发的 RPC。
#[derive(Debug, Clone)]
pub enum AcsRpc {
    GetParameterValues {
        names: Vec<String>,
    },
    SetParameterValues {
        params: Vec<ParameterValue>,
        parameter_key: String,
    },
    GetParameterNames {
        parameter_path: String,
        next_level: bool,
    },
    AddObject {
        object_name: String,
        parameter_key: String,
    },
    DeleteObject {
        object_name: String,
        parameter_key: String,
    },
    Reboot {
        command_key: String,
    },
    FactoryReset,
    Download(DownloadArgs),
    Upload(UploadArgs),
}

impl AcsRpc {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetParameterValues { .. } => "GetParameterValues",
            Self::SetParameterValues { .. } => "SetParameterValues",
            Self::GetParameterNames { .. } => "GetParameterNames",
            Self::AddObject { .. } => "AddObject",
            Self::DeleteObject { .. } => "DeleteObject",
            Self::Reboot { .. } => "Reboot",
            Self::FactoryReset => "FactoryReset",
            Self::Download(_) => "Download",
            Self::Upload(_) => "Upload",
        }
    }
}

fn envelope(id: Option<&str>, body: &str) -> String {
    let header = match id {
        Some(id) => format!(
            "<soap:Header><cwmp:ID soap:mustUnderstand=\"1\">{}</cwmp:ID></soap:Header>",
            escape(id)
        ),
        None => String::new(),
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soap:Envelope xmlns:soap=\"{}\" xmlns:cwmp=\"{}\" xmlns:xsd=\"{}\" xmlns:xsi=\"{}\">\
         {}<soap:Body>{}</soap:Body></soap:Envelope>",
        SOAP_NS, CWMP_NS, XSD_NS, XSI_NS, header, body
    )
}

fn element(name: &str, value: &str) -> String {
    format!("<{}>{}</{}>", name, escape(value), name)
}

fn parameter_value_structs(params: &[ParameterValue]) -> String {
    let mut out = String::new();
    for param in params {
        out.push_str("<ParameterValueStruct>");
        out.push_str(&element("Name", &param.name));
        out.push_str(&format!(
            "<Value xsi:type=\"{}\">{}</Value>",
            escape(&param.param_type),
            escape(&param.value)
        ));
        out.push_str("</ParameterValueStruct>");
    }
    out
}

/// 序列化一条服务端 RPC 为完整信封。
pub fn serialize_rpc(id: &str, rpc: &AcsRpc) -> String {
    let body = match rpc {
        AcsRpc::GetParameterValues { names } => {
            let mut list = String::new();
            for name in names {
                list.push_str(&element("string", name));
            }
            format!(
                "<cwmp:GetParameterValues><ParameterNames soap:arrayType=\"xsd:string[{}]\">{}</ParameterNames></cwmp:GetParameterValues>",
                names.len(),
                list
            )
        }
        AcsRpc::SetParameterValues {
            params,
            parameter_key,
        } => format!(
            "<cwmp:SetParameterValues><ParameterList soap:arrayType=\"cwmp:ParameterValueStruct[{}]\">{}</ParameterList>{}</cwmp:SetParameterValues>",
            params.len(),
            parameter_value_structs(params),
            element("ParameterKey", parameter_key)
        ),
        AcsRpc::GetParameterNames {
            parameter_path,
            next_level,
        } => format!(
            "<cwmp:GetParameterNames>{}{}</cwmp:GetParameterNames>",
            element("ParameterPath", parameter_path),
            element("NextLevel", if *next_level { "1" } else { "0" })
        ),
        AcsRpc::AddObject {
            object_name,
            parameter_key,
        } => format!(
            "<cwmp:AddObject>{}{}</cwmp:AddObject>",
            element("ObjectName", object_name),
            element("ParameterKey", parameter_key)
        ),
        AcsRpc::DeleteObject {
            object_name,
            parameter_key,
        } => format!(
            "<cwmp:DeleteObject>{}{}</cwmp:DeleteObject>",
            element("ObjectName", object_name),
            element("ParameterKey", parameter_key)
        ),
        AcsRpc::Reboot { command_key } => format!(
            "<cwmp:Reboot>{}</cwmp:Reboot>",
            element("CommandKey", command_key)
        ),
        AcsRpc::FactoryReset => "<cwmp:FactoryReset></cwmp:FactoryReset>".to_string(),
        AcsRpc::Download(args) => format!(
            "<cwmp:Download>{}{}{}{}{}{}{}{}{}{}</cwmp:Download>",
            element("CommandKey", &args.command_key),
            element("FileType", &args.file_type),
            element("URL", &args.url),
            element("Username", &args.username),
            element("Password", &args.password),
            element("FileSize", &args.file_size.to_string()),
            element("TargetFileName", &args.target_file_name),
            element("DelaySeconds", &args.delay_seconds.to_string()),
            element("SuccessURL", &args.success_url),
            element("FailureURL", &args.failure_url)
        ),
        AcsRpc::Upload(args) => format!(
            "<cwmp:Upload>{}{}{}{}{}{}</cwmp:Upload>",
            element("CommandKey", &args.command_key),
            element("FileType", &args.file_type),
            element("URL", &args.url),
            element("Username", &args.username),
            element("Password", &args.password),
            element("DelaySeconds", &args.delay_seconds.to_string())
        ),
    };
    envelope(Some(id), &body)
}

/// InformResponse（MaxEnvelopes 恒为 1）。
pub fn serialize_inform_response(id: Option<&str>) -> String {
    envelope(
        id,
        "<cwmp:InformResponse><MaxEnvelopes>1</MaxEnvelopes></cwmp:InformResponse>",
    )
}

/// TransferCompleteResponse。
pub fn serialize_transfer_complete_response(id: Option<&str>) -> String {
    envelope(id, "<cwmp:TransferCompleteResponse></cwmp:TransferCompleteResponse>")
}

/// SOAP Fault（携带 cwmp:Fault 明细）。
pub fn serialize_fault(id: Option<&str>, code: u32, text: &str) -> String {
    let body = format!(
        "<soap:Fault><faultcode>Client</faultcode><faultstring>CWMP fault</faultstring>\
         <detail><cwmp:Fault><FaultCode>{}</FaultCode><FaultString>{}</FaultString></cwmp:Fault></detail>\
         </soap:Fault>",
        code,
        escape(text)
    );
    envelope(id, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::{parse_envelope, CpeMessage};

    #[test]
    fn set_parameter_values_round_trips_through_parser() {
        let rpc = AcsRpc::SetParameterValues {
            params: vec![ParameterValue {
                name: "Device.WiFi.Radio.1.Enable".to_string(),
                value: "true".to_string(),
                param_type: "xsd:boolean".to_string(),
            }],
            parameter_key: "op-1".to_string(),
        };
        let xml = serialize_rpc("17", &rpc);
        assert!(xml.contains("cwmp:SetParameterValues"));
        assert!(xml.contains("<cwmp:ID soap:mustUnderstand=\"1\">17</cwmp:ID>"));
        assert!(xml.contains("Device.WiFi.Radio.1.Enable"));
    }

    #[test]
    fn fault_envelope_parses_back() {
        let xml = serialize_fault(Some("9"), 9004, "Resources exceeded");
        let envelope = parse_envelope(&xml).unwrap();
        assert_eq!(envelope.id.as_deref(), Some("9"));
        let CpeMessage::Fault(fault) = envelope.message else {
            panic!("expected fault");
        };
        assert_eq!(fault.code, 9004);
        assert_eq!(fault.text, "Resources exceeded");
    }

    #[test]
    fn values_are_escaped() {
        let rpc = AcsRpc::Reboot {
            command_key: "a<b&c".to_string(),
        };
        let xml = serialize_rpc("1", &rpc);
        assert!(xml.contains("a&lt;b&amp;c"));
    }
}
