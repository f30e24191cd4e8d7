//! SOAP 信封模型与设备侧报文解析。
//!
//! 命名空间：`soap` = http://schemas.xmlsoap.org/soap/envelope/，
//! `cwmp` = urn:dslforum-org:cwmp-1-2。`cwmp:ID` 头在应答中原样回显。

use crate::error::CwmpError;
use crate::xml::{parse, XmlNode};

/// TR-069 事件码。
pub mod event_codes {
    pub const BOOTSTRAP: &str = "0 BOOTSTRAP";
    pub const BOOT: &str = "1 BOOT";
    pub const PERIODIC: &str = "2 PERIODIC";
    pub const SCHEDULED: &str = "3 SCHEDULED";
    pub const VALUE_CHANGE: &str = "4 VALUE CHANGE";
    pub const KICKED: &str = "5 KICKED";
    pub const CONNECTION_REQUEST: &str = "6 CONNECTION REQUEST";
    pub const TRANSFER_COMPLETE: &str = "7 TRANSFER COMPLETE";
    pub const DIAGNOSTICS_COMPLETE: &str = "8 DIAGNOSTICS COMPLETE";
    pub const REQUEST_DOWNLOAD: &str = "9 REQUEST DOWNLOAD";
    pub const AUTONOMOUS_TRANSFER_COMPLETE: &str = "10 AUTONOMOUS TRANSFER COMPLETE";
    pub const WAKEUP: &str = "13 WAKEUP";
}

/// 设备身份四元组。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdStruct {
    pub manufacturer: String,
    pub oui: String,
    pub product_class: String,
    pub serial_number: String,
}

/// Inform 携带的事件项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStruct {
    pub event_code: String,
    pub command_key: String,
}

/// 参数值三元组。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterValue {
    pub name: String,
    pub value: String,
    pub param_type: String,
}

/// GetParameterNames 的返回项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    pub name: String,
    pub writable: bool,
}

/// Inform 报文。
#[derive(Debug, Clone)]
pub struct Inform {
    pub device_id: DeviceIdStruct,
    pub events: Vec<EventStruct>,
    pub max_envelopes: u32,
    pub current_time: String,
    pub retry_count: u32,
    pub parameter_list: Vec<ParameterValue>,
}

/// TransferComplete 报文。
#[derive(Debug, Clone)]
pub struct TransferComplete {
    pub command_key: String,
    pub fault_code: u32,
    pub fault_string: String,
    pub start_time: String,
    pub complete_time: String,
}

/// 设备回送的 Fault 明细。
#[derive(Debug, Clone)]
pub struct CwmpFault {
    pub code: u32,
    pub text: String,
}

/// 设备侧一次 POST 携带的报文。
#[derive(Debug, Clone)]
pub enum CpeMessage {
    Inform(Inform),
    TransferComplete(TransferComplete),
    GetParameterValuesResponse(Vec<ParameterValue>),
    SetParameterValuesResponse { status: u32 },
    GetParameterNamesResponse(Vec<ParameterInfo>),
    AddObjectResponse { instance_number: u32, status: u32 },
    DeleteObjectResponse { status: u32 },
    RebootResponse,
    FactoryResetResponse,
    DownloadResponse { status: u32 },
    UploadResponse { status: u32 },
    Fault(CwmpFault),
}

impl CpeMessage {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Inform(_) => "Inform",
            Self::TransferComplete(_) => "TransferComplete",
            Self::GetParameterValuesResponse(_) => "GetParameterValuesResponse",
            Self::SetParameterValuesResponse { .. } => "SetParameterValuesResponse",
            Self::GetParameterNamesResponse(_) => "GetParameterNamesResponse",
            Self::AddObjectResponse { .. } => "AddObjectResponse",
            Self::DeleteObjectResponse { .. } => "DeleteObjectResponse",
            Self::RebootResponse => "RebootResponse",
            Self::FactoryResetResponse => "FactoryResetResponse",
            Self::DownloadResponse { .. } => "DownloadResponse",
            Self::UploadResponse { .. } => "UploadResponse",
            Self::Fault(_) => "Fault",
        }
    }
}

/// 解析后的信封：`cwmp:ID` + 报文体。
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: Option<String>,
    pub message: CpeMessage,
}

fn parse_u32(text: &str) -> u32 {
    text.trim().parse().unwrap_or(0)
}

fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "1" | "true")
}

fn parameter_values(list: &XmlNode) -> Vec<ParameterValue> {
    list.children_named("ParameterValueStruct")
        .map(|item| {
            let value_node = item.child("Value");
            ParameterValue {
                name: item.child_text("Name"),
                value: value_node.map(|node| node.text.clone()).unwrap_or_default(),
                param_type: value_node
                    .and_then(|node| node.attr("type"))
                    .unwrap_or("xsd:string")
                    .to_string(),
            }
        })
        .collect()
}

/// 解析一份设备侧信封。
pub fn parse_envelope(body: &str) -> Result<Envelope, CwmpError> {
    let root = parse(body)?;
    if root.name != "Envelope" {
        return Err(CwmpError::Parse(format!(
            "expected soap Envelope, got {}",
            root.name
        )));
    }
    let id = root
        .child("Header")
        .and_then(|header| header.child("ID"))
        .map(|node| node.text.clone());
    let soap_body = root
        .child("Body")
        .ok_or_else(|| CwmpError::Parse("envelope missing Body".to_string()))?;
    let content = soap_body
        .children
        .first()
        .ok_or_else(|| CwmpError::Parse("empty soap Body".to_string()))?;

    let message = match content.name.as_str() {
        "Inform" => {
            let device_id_node = content
                .child("DeviceId")
                .ok_or_else(|| CwmpError::Parse("Inform missing DeviceId".to_string()))?;
            let events = content
                .child("Event")
                .map(|event| {
                    event
                        .children_named("EventStruct")
                        .map(|item| EventStruct {
                            event_code: item.child_text("EventCode"),
                            command_key: item.child_text("CommandKey"),
                        })
                        .collect()
                })
                .unwrap_or_default();
            let parameter_list = content
                .child("ParameterList")
                .map(|list| parameter_values(list))
                .unwrap_or_default();
            CpeMessage::Inform(Inform {
                device_id: DeviceIdStruct {
                    manufacturer: device_id_node.child_text("Manufacturer"),
                    oui: device_id_node.child_text("OUI"),
                    product_class: device_id_node.child_text("ProductClass"),
                    serial_number: device_id_node.child_text("SerialNumber"),
                },
                events,
                max_envelopes: parse_u32(&content.child_text("MaxEnvelopes")),
                current_time: content.child_text("CurrentTime"),
                retry_count: parse_u32(&content.child_text("RetryCount")),
                parameter_list,
            })
        }
        "TransferComplete" => {
            let fault = content.child("FaultStruct");
            CpeMessage::TransferComplete(TransferComplete {
                command_key: content.child_text("CommandKey"),
                fault_code: fault.map(|node| parse_u32(&node.child_text("FaultCode"))).unwrap_or(0),
                fault_string: fault.map(|node| node.child_text("FaultString")).unwrap_or_default(),
                start_time: content.child_text("StartTime"),
                complete_time: content.child_text("CompleteTime"),
            })
        }
        "GetParameterValuesResponse" => {
            let values = content
                .child("ParameterList")
                .map(|list| parameter_values(list))
                .unwrap_or_default();
            CpeMessage::GetParameterValuesResponse(values)
        }
        "SetParameterValuesResponse" => CpeMessage::SetParameterValuesResponse {
            status: parse_u32(&content.child_text("Status")),
        },
        "GetParameterNamesResponse" => {
            let infos = content
                .child("ParameterList")
                .map(|list| {
                    list.children_named("ParameterInfoStruct")
                        .map(|item| ParameterInfo {
                            name: item.child_text("Name"),
                            writable: parse_bool(&item.child_text("Writable")),
                        })
                        .collect()
                })
                .unwrap_or_default();
            CpeMessage::GetParameterNamesResponse(infos)
        }
        "AddObjectResponse" => CpeMessage::AddObjectResponse {
            instance_number: parse_u32(&content.child_text("InstanceNumber")),
            status: parse_u32(&content.child_text("Status")),
        },
        "DeleteObjectResponse" => CpeMessage::DeleteObjectResponse {
            status: parse_u32(&content.child_text("Status")),
        },
        "RebootResponse" => CpeMessage::RebootResponse,
        "FactoryResetResponse" => CpeMessage::FactoryResetResponse,
        "DownloadResponse" => CpeMessage::DownloadResponse {
            status: parse_u32(&content.child_text("Status")),
        },
        "UploadResponse" => CpeMessage::UploadResponse {
            status: parse_u32(&content.child_text("Status")),
        },
        "Fault" => {
            // soap:Fault → detail → cwmp:Fault {FaultCode, FaultString}
            let cwmp_fault = content.descendant("Fault");
            let (code, text) = match cwmp_fault {
                Some(node) => (
                    parse_u32(&node.child_text("FaultCode")),
                    node.child_text("FaultString"),
                ),
                None => (
                    crate::error::fault_codes::INTERNAL_ERROR,
                    content.child_text("faultstring"),
                ),
            };
            CpeMessage::Fault(CwmpFault { code, text })
        }
        other => {
            return Err(CwmpError::Parse(format!("unsupported method {}", other)));
        }
    };

    Ok(Envelope {
        id,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFORM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
  <soap:Header><cwmp:ID soap:mustUnderstand="1">42</cwmp:ID></soap:Header>
  <soap:Body>
    <cwmp:Inform>
      <DeviceId>
        <Manufacturer>Acme</Manufacturer>
        <OUI>001122</OUI>
        <ProductClass>Router</ProductClass>
        <SerialNumber>SN1</SerialNumber>
      </DeviceId>
      <Event>
        <EventStruct><EventCode>0 BOOTSTRAP</EventCode><CommandKey></CommandKey></EventStruct>
      </Event>
      <MaxEnvelopes>1</MaxEnvelopes>
      <CurrentTime>2024-05-01T10:00:00Z</CurrentTime>
      <RetryCount>0</RetryCount>
      <ParameterList>
        <ParameterValueStruct>
          <Name>Device.DeviceInfo.SoftwareVersion</Name>
          <Value type="xsd:string">1.2.3</Value>
        </ParameterValueStruct>
      </ParameterList>
    </cwmp:Inform>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn inform_parses_identity_events_and_params() {
        let envelope = parse_envelope(INFORM).unwrap();
        assert_eq!(envelope.id.as_deref(), Some("42"));
        let CpeMessage::Inform(inform) = envelope.message else {
            panic!("expected inform");
        };
        assert_eq!(inform.device_id.manufacturer, "Acme");
        assert_eq!(inform.device_id.serial_number, "SN1");
        assert_eq!(inform.events[0].event_code, event_codes::BOOTSTRAP);
        assert_eq!(inform.max_envelopes, 1);
        assert_eq!(inform.parameter_list.len(), 1);
        assert_eq!(
            inform.parameter_list[0].name,
            "Device.DeviceInfo.SoftwareVersion"
        );
        assert_eq!(inform.parameter_list[0].value, "1.2.3");
    }

    #[test]
    fn set_response_parses_status() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
          <soap:Header><cwmp:ID>7</cwmp:ID></soap:Header>
          <soap:Body><cwmp:SetParameterValuesResponse><Status>0</Status></cwmp:SetParameterValuesResponse></soap:Body>
        </soap:Envelope>"#;
        let envelope = parse_envelope(body).unwrap();
        assert!(matches!(
            envelope.message,
            CpeMessage::SetParameterValuesResponse { status: 0 }
        ));
    }

    #[test]
    fn fault_parses_cwmp_detail() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-2">
          <soap:Body><soap:Fault>
            <faultcode>Client</faultcode>
            <faultstring>CWMP fault</faultstring>
            <detail><cwmp:Fault>
              <FaultCode>9008</FaultCode>
              <FaultString>Attempt to set non-writable parameter</FaultString>
            </cwmp:Fault></detail>
          </soap:Fault></soap:Body>
        </soap:Envelope>"#;
        let envelope = parse_envelope(body).unwrap();
        let CpeMessage::Fault(fault) = envelope.message else {
            panic!("expected fault");
        };
        assert_eq!(fault.code, 9008);
        assert_eq!(fault.text, "Attempt to set non-writable parameter");
    }

    #[test]
    fn unsupported_method_rejected() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
          <soap:Body><cwmp:Kicked xmlns:cwmp="urn:dslforum-org:cwmp-1-2"/></soap:Body>
        </soap:Envelope>"#;
        assert!(parse_envelope(body).is_err());
    }
}
