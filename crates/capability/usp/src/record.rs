//! USP 信封模型与编解码。
//!
//! 外层 Record 携带寻址（to/from 端点 ID）与裸载荷；内层 Msg 由
//! Header（消息 ID + 类型）和 Body（Request / Response / Error 三选一）
//! 构成。编码遵循 tag/length/value 线格式，解码容忍并跳过未知字段。

use crate::codec::{
    read_len_delimited, read_string, read_tag, read_varint, skip_field, write_bool, write_bytes,
    write_message, write_string, write_uint, WIRE_LEN, WIRE_VARINT,
};
use crate::error::UspError;
use bytes::{Buf, Bytes, BytesMut};

/// 协议版本号（Record.version）。
pub const USP_VERSION: &str = "1.3";

/// 外层信封：寻址 + 载荷。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub version: String,
    pub to_id: String,
    pub from_id: String,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(to_id: &str, from_id: &str, payload: Vec<u8>) -> Self {
        Self {
            version: USP_VERSION.to_string(),
            to_id: to_id.to_string(),
            from_id: from_id.to_string(),
            payload,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut no_session = BytesMut::new();
        write_bytes(&mut no_session, 2, &self.payload);

        let mut buf = BytesMut::new();
        write_string(&mut buf, 1, &self.version);
        write_string(&mut buf, 2, &self.to_id);
        write_string(&mut buf, 3, &self.from_id);
        write_message(&mut buf, 7, &no_session);
        buf.freeze()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, UspError> {
        let mut record = Self {
            version: String::new(),
            to_id: String::new(),
            from_id: String::new(),
            payload: Vec::new(),
        };
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(&mut buf)?;
            match (field, wire_type) {
                (1, WIRE_LEN) => record.version = read_string(&mut buf)?,
                (2, WIRE_LEN) => record.to_id = read_string(&mut buf)?,
                (3, WIRE_LEN) => record.from_id = read_string(&mut buf)?,
                (7, WIRE_LEN) => {
                    let body = read_len_delimited(&mut buf)?;
                    let mut inner = body.as_slice();
                    while inner.has_remaining() {
                        let (inner_field, inner_wire) = read_tag(&mut inner)?;
                        if inner_field == 2 && inner_wire == WIRE_LEN {
                            record.payload = read_len_delimited(&mut inner)?;
                        } else {
                            skip_field(&mut inner, inner_wire)?;
                        }
                    }
                }
                (_, wire_type) => skip_field(&mut buf, wire_type)?,
            }
        }
        if record.from_id.is_empty() {
            return Err(UspError::MessageStructure("record missing from_id".to_string()));
        }
        Ok(record)
    }
}

/// 参数值三元组（路径 / 值 / 类型名）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValue {
    pub path: String,
    pub value: String,
    pub param_type: String,
}

impl ParamValue {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        write_string(&mut buf, 1, &self.path);
        write_string(&mut buf, 2, &self.value);
        write_string(&mut buf, 3, &self.param_type);
        buf
    }

    fn decode(body: &[u8]) -> Result<Self, UspError> {
        let mut buf = body;
        let mut item = Self {
            path: String::new(),
            value: String::new(),
            param_type: String::new(),
        };
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(&mut buf)?;
            match (field, wire_type) {
                (1, WIRE_LEN) => item.path = read_string(&mut buf)?,
                (2, WIRE_LEN) => item.value = read_string(&mut buf)?,
                (3, WIRE_LEN) => item.param_type = read_string(&mut buf)?,
                (_, wire_type) => skip_field(&mut buf, wire_type)?,
            }
        }
        Ok(item)
    }
}

/// GetSupportedDM 的返回项。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedParam {
    pub path: String,
    pub writable: bool,
}

/// Notify 事件体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    ValueChange {
        param_path: String,
        param_value: String,
    },
    Event {
        obj_path: String,
        event_name: String,
        params_json: String,
    },
    OnBoardReq {
        oui: String,
        product_class: String,
        serial_number: String,
    },
    OperationComplete {
        obj_path: String,
        command_name: String,
        command_key: String,
    },
}

/// Notify 请求（Agent → 控制器）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    pub subscription_id: String,
    pub send_resp: bool,
    pub event: NotifyEvent,
}

/// 控制器可发出的请求体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Get {
        param_paths: Vec<String>,
    },
    Set {
        allow_partial: bool,
        params: Vec<ParamValue>,
    },
    Add {
        obj_path: String,
        params: Vec<ParamValue>,
    },
    Delete {
        obj_paths: Vec<String>,
    },
    Operate {
        command: String,
        command_key: String,
        input_args_json: String,
    },
    GetSupportedDm {
        obj_paths: Vec<String>,
    },
    GetInstances {
        obj_paths: Vec<String>,
    },
    Notify(Notify),
}

impl RequestBody {
    /// Set/Add/Delete/Operate 是变更类请求，须持设备锁串行。
    pub fn is_mutator(&self) -> bool {
        matches!(
            self,
            Self::Set { .. } | Self::Add { .. } | Self::Delete { .. } | Self::Operate { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Operate { .. } => "operate",
            Self::GetSupportedDm { .. } => "get_supported_dm",
            Self::GetInstances { .. } => "get_instances",
            Self::Notify(_) => "notify",
        }
    }
}

/// 应答体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    GetResp { results: Vec<ParamValue> },
    SetResp { updated_paths: Vec<String> },
    AddResp { instantiated_path: String },
    DeleteResp { affected_paths: Vec<String> },
    OperateResp { output_args_json: String },
    GetSupportedDmResp { params: Vec<SupportedParam> },
    GetInstancesResp { instance_paths: Vec<String> },
    NotifyResp { subscription_id: String },
}

/// Error 报文体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

/// Msg 三选一体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgBody {
    Request(RequestBody),
    Response(ResponseBody),
    Error(ErrorBody),
}

/// 内层消息：Header + Body。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub msg_id: String,
    pub body: MsgBody,
}

/// Header.msg_type 的取值。
fn msg_type_of(body: &MsgBody) -> u64 {
    match body {
        MsgBody::Request(request) => match request {
            RequestBody::Get { .. } => 1,
            RequestBody::Set { .. } => 3,
            RequestBody::Add { .. } => 5,
            RequestBody::Delete { .. } => 7,
            RequestBody::Operate { .. } => 9,
            RequestBody::GetSupportedDm { .. } => 11,
            RequestBody::GetInstances { .. } => 13,
            RequestBody::Notify(_) => 15,
        },
        MsgBody::Response(response) => match response {
            ResponseBody::GetResp { .. } => 2,
            ResponseBody::SetResp { .. } => 4,
            ResponseBody::AddResp { .. } => 6,
            ResponseBody::DeleteResp { .. } => 8,
            ResponseBody::OperateResp { .. } => 10,
            ResponseBody::GetSupportedDmResp { .. } => 12,
            ResponseBody::GetInstancesResp { .. } => 14,
            ResponseBody::NotifyResp { .. } => 16,
        },
        MsgBody::Error(_) => 17,
    }
}

fn encode_string_list(field: u32, values: &[String]) -> BytesMut {
    let mut buf = BytesMut::new();
    for value in values {
        write_string(&mut buf, field, value);
    }
    buf
}

fn encode_request(request: &RequestBody) -> BytesMut {
    let mut buf = BytesMut::new();
    match request {
        RequestBody::Get { param_paths } => {
            write_message(&mut buf, 1, &encode_string_list(1, param_paths));
        }
        RequestBody::Set {
            allow_partial,
            params,
        } => {
            let mut inner = BytesMut::new();
            write_bool(&mut inner, 1, *allow_partial);
            for param in params {
                write_message(&mut inner, 2, &param.encode());
            }
            write_message(&mut buf, 2, &inner);
        }
        RequestBody::Add { obj_path, params } => {
            let mut inner = BytesMut::new();
            write_string(&mut inner, 1, obj_path);
            for param in params {
                write_message(&mut inner, 2, &param.encode());
            }
            write_message(&mut buf, 3, &inner);
        }
        RequestBody::Delete { obj_paths } => {
            write_message(&mut buf, 4, &encode_string_list(1, obj_paths));
        }
        RequestBody::Operate {
            command,
            command_key,
            input_args_json,
        } => {
            let mut inner = BytesMut::new();
            write_string(&mut inner, 1, command);
            write_string(&mut inner, 2, command_key);
            write_string(&mut inner, 3, input_args_json);
            write_message(&mut buf, 5, &inner);
        }
        RequestBody::GetSupportedDm { obj_paths } => {
            write_message(&mut buf, 6, &encode_string_list(1, obj_paths));
        }
        RequestBody::GetInstances { obj_paths } => {
            write_message(&mut buf, 7, &encode_string_list(1, obj_paths));
        }
        RequestBody::Notify(notify) => {
            let mut inner = BytesMut::new();
            write_string(&mut inner, 1, &notify.subscription_id);
            write_bool(&mut inner, 2, notify.send_resp);
            match &notify.event {
                NotifyEvent::ValueChange {
                    param_path,
                    param_value,
                } => {
                    let mut event = BytesMut::new();
                    write_string(&mut event, 1, param_path);
                    write_string(&mut event, 2, param_value);
                    write_message(&mut inner, 3, &event);
                }
                NotifyEvent::Event {
                    obj_path,
                    event_name,
                    params_json,
                } => {
                    let mut event = BytesMut::new();
                    write_string(&mut event, 1, obj_path);
                    write_string(&mut event, 2, event_name);
                    write_string(&mut event, 3, params_json);
                    write_message(&mut inner, 4, &event);
                }
                NotifyEvent::OnBoardReq {
                    oui,
                    product_class,
                    serial_number,
                } => {
                    let mut event = BytesMut::new();
                    write_string(&mut event, 1, oui);
                    write_string(&mut event, 2, product_class);
                    write_string(&mut event, 3, serial_number);
                    write_message(&mut inner, 5, &event);
                }
                NotifyEvent::OperationComplete {
                    obj_path,
                    command_name,
                    command_key,
                } => {
                    let mut event = BytesMut::new();
                    write_string(&mut event, 1, obj_path);
                    write_string(&mut event, 2, command_name);
                    write_string(&mut event, 3, command_key);
                    write_message(&mut inner, 6, &event);
                }
            }
            write_message(&mut buf, 8, &inner);
        }
    }
    buf
}

fn encode_response(response: &ResponseBody) -> BytesMut {
    let mut buf = BytesMut::new();
    match response {
        ResponseBody::GetResp { results } => {
            let mut inner = BytesMut::new();
            for result in results {
                write_message(&mut inner, 1, &result.encode());
            }
            write_message(&mut buf, 1, &inner);
        }
        ResponseBody::SetResp { updated_paths } => {
            write_message(&mut buf, 2, &encode_string_list(1, updated_paths));
        }
        ResponseBody::AddResp { instantiated_path } => {
            let mut inner = BytesMut::new();
            write_string(&mut inner, 1, instantiated_path);
            write_message(&mut buf, 3, &inner);
        }
        ResponseBody::DeleteResp { affected_paths } => {
            write_message(&mut buf, 4, &encode_string_list(1, affected_paths));
        }
        ResponseBody::OperateResp { output_args_json } => {
            let mut inner = BytesMut::new();
            write_string(&mut inner, 1, output_args_json);
            write_message(&mut buf, 5, &inner);
        }
        ResponseBody::GetSupportedDmResp { params } => {
            let mut inner = BytesMut::new();
            for param in params {
                let mut item = BytesMut::new();
                write_string(&mut item, 1, &param.path);
                write_bool(&mut item, 2, param.writable);
                write_message(&mut inner, 1, &item);
            }
            write_message(&mut buf, 6, &inner);
        }
        ResponseBody::GetInstancesResp { instance_paths } => {
            write_message(&mut buf, 7, &encode_string_list(1, instance_paths));
        }
        ResponseBody::NotifyResp { subscription_id } => {
            let mut inner = BytesMut::new();
            write_string(&mut inner, 1, subscription_id);
            write_message(&mut buf, 8, &inner);
        }
    }
    buf
}

impl Msg {
    pub fn request(msg_id: &str, request: RequestBody) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            body: MsgBody::Request(request),
        }
    }

    pub fn response(msg_id: &str, response: ResponseBody) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            body: MsgBody::Response(response),
        }
    }

    pub fn error(msg_id: &str, code: u32, message: &str) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            body: MsgBody::Error(ErrorBody {
                code,
                message: message.to_string(),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut header = BytesMut::new();
        write_string(&mut header, 1, &self.msg_id);
        write_uint(&mut header, 2, msg_type_of(&self.body));

        let mut body = BytesMut::new();
        match &self.body {
            MsgBody::Request(request) => write_message(&mut body, 1, &encode_request(request)),
            MsgBody::Response(response) => write_message(&mut body, 2, &encode_response(response)),
            MsgBody::Error(error) => {
                let mut inner = BytesMut::new();
                write_uint(&mut inner, 1, u64::from(error.code));
                write_string(&mut inner, 2, &error.message);
                write_message(&mut body, 3, &inner);
            }
        }

        let mut buf = BytesMut::new();
        write_message(&mut buf, 1, &header);
        write_message(&mut buf, 2, &body);
        buf.to_vec()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, UspError> {
        let mut buf = raw;
        let mut msg_id = String::new();
        let mut body: Option<MsgBody> = None;
        while buf.has_remaining() {
            let (field, wire_type) = read_tag(&mut buf)?;
            match (field, wire_type) {
                (1, WIRE_LEN) => {
                    let header = read_len_delimited(&mut buf)?;
                    let mut inner = header.as_slice();
                    while inner.has_remaining() {
                        let (inner_field, inner_wire) = read_tag(&mut inner)?;
                        match (inner_field, inner_wire) {
                            (1, WIRE_LEN) => msg_id = read_string(&mut inner)?,
                            (2, WIRE_VARINT) => {
                                // msg_type 冗余于 body 的 oneof，读取后不再使用
                                read_varint(&mut inner)?;
                            }
                            (_, inner_wire) => skip_field(&mut inner, inner_wire)?,
                        }
                    }
                }
                (2, WIRE_LEN) => {
                    let raw_body = read_len_delimited(&mut buf)?;
                    body = Some(decode_body(&raw_body)?);
                }
                (_, wire_type) => skip_field(&mut buf, wire_type)?,
            }
        }
        let body = body
            .ok_or_else(|| UspError::MessageStructure("msg missing body".to_string()))?;
        if msg_id.is_empty() {
            return Err(UspError::MessageStructure("msg missing msg_id".to_string()));
        }
        Ok(Self { msg_id, body })
    }
}

fn decode_body(raw: &[u8]) -> Result<MsgBody, UspError> {
    let mut buf = raw;
    while buf.has_remaining() {
        let (field, wire_type) = read_tag(&mut buf)?;
        if wire_type != WIRE_LEN {
            skip_field(&mut buf, wire_type)?;
            continue;
        }
        let body = read_len_delimited(&mut buf)?;
        match field {
            1 => return Ok(MsgBody::Request(decode_request(&body)?)),
            2 => return Ok(MsgBody::Response(decode_response(&body)?)),
            3 => return Ok(MsgBody::Error(decode_error(&body)?)),
            _ => continue,
        }
    }
    Err(UspError::MessageStructure("empty msg body".to_string()))
}

fn decode_string_list(raw: &[u8], field: u32) -> Result<Vec<String>, UspError> {
    let mut buf = raw;
    let mut values = Vec::new();
    while buf.has_remaining() {
        let (current, wire_type) = read_tag(&mut buf)?;
        if current == field && wire_type == WIRE_LEN {
            values.push(read_string(&mut buf)?);
        } else {
            skip_field(&mut buf, wire_type)?;
        }
    }
    Ok(values)
}

fn decode_request(raw: &[u8]) -> Result<RequestBody, UspError> {
    let mut buf = raw;
    while buf.has_remaining() {
        let (field, wire_type) = read_tag(&mut buf)?;
        if wire_type != WIRE_LEN {
            skip_field(&mut buf, wire_type)?;
            continue;
        }
        let body = read_len_delimited(&mut buf)?;
        match field {
            1 => {
                return Ok(RequestBody::Get {
                    param_paths: decode_string_list(&body, 1)?,
                });
            }
            2 => {
                let mut inner = body.as_slice();
                let mut allow_partial = false;
                let mut params = Vec::new();
                while inner.has_remaining() {
                    let (inner_field, inner_wire) = read_tag(&mut inner)?;
                    match (inner_field, inner_wire) {
                        (1, WIRE_VARINT) => allow_partial = read_varint(&mut inner)? != 0,
                        (2, WIRE_LEN) => {
                            params.push(ParamValue::decode(&read_len_delimited(&mut inner)?)?);
                        }
                        (_, inner_wire) => skip_field(&mut inner, inner_wire)?,
                    }
                }
                return Ok(RequestBody::Set {
                    allow_partial,
                    params,
                });
            }
            3 => {
                let mut inner = body.as_slice();
                let mut obj_path = String::new();
                let mut params = Vec::new();
                while inner.has_remaining() {
                    let (inner_field, inner_wire) = read_tag(&mut inner)?;
                    match (inner_field, inner_wire) {
                        (1, WIRE_LEN) => obj_path = read_string(&mut inner)?,
                        (2, WIRE_LEN) => {
                            params.push(ParamValue::decode(&read_len_delimited(&mut inner)?)?);
                        }
                        (_, inner_wire) => skip_field(&mut inner, inner_wire)?,
                    }
                }
                return Ok(RequestBody::Add { obj_path, params });
            }
            4 => {
                return Ok(RequestBody::Delete {
                    obj_paths: decode_string_list(&body, 1)?,
                });
            }
            5 => {
                let mut inner = body.as_slice();
                let mut command = String::new();
                let mut command_key = String::new();
                let mut input_args_json = String::new();
                while inner.has_remaining() {
                    let (inner_field, inner_wire) = read_tag(&mut inner)?;
                    match (inner_field, inner_wire) {
                        (1, WIRE_LEN) => command = read_string(&mut inner)?,
                        (2, WIRE_LEN) => command_key = read_string(&mut inner)?,
                        (3, WIRE_LEN) => input_args_json = read_string(&mut inner)?,
                        (_, inner_wire) => skip_field(&mut inner, inner_wire)?,
                    }
                }
                return Ok(RequestBody::Operate {
                    command,
                    command_key,
                    input_args_json,
                });
            }
            6 => {
                return Ok(RequestBody::GetSupportedDm {
                    obj_paths: decode_string_list(&body, 1)?,
                });
            }
            7 => {
                return Ok(RequestBody::GetInstances {
                    obj_paths: decode_string_list(&body, 1)?,
                });
            }
            8 => return Ok(RequestBody::Notify(decode_notify(&body)?)),
            _ => continue,
        }
    }
    Err(UspError::MessageStructure("empty request body".to_string()))
}

fn decode_notify(raw: &[u8]) -> Result<Notify, UspError> {
    let mut buf = raw;
    let mut subscription_id = String::new();
    let mut send_resp = false;
    let mut event: Option<NotifyEvent> = None;
    while buf.has_remaining() {
        let (field, wire_type) = read_tag(&mut buf)?;
        match (field, wire_type) {
            (1, WIRE_LEN) => subscription_id = read_string(&mut buf)?,
            (2, WIRE_VARINT) => send_resp = read_varint(&mut buf)? != 0,
            (3, WIRE_LEN) => {
                let body = read_len_delimited(&mut buf)?;
                let fields = decode_plain_strings(&body, 2)?;
                event = Some(NotifyEvent::ValueChange {
                    param_path: fields[0].clone(),
                    param_value: fields[1].clone(),
                });
            }
            (4, WIRE_LEN) => {
                let body = read_len_delimited(&mut buf)?;
                let fields = decode_plain_strings(&body, 3)?;
                event = Some(NotifyEvent::Event {
                    obj_path: fields[0].clone(),
                    event_name: fields[1].clone(),
                    params_json: fields[2].clone(),
                });
            }
            (5, WIRE_LEN) => {
                let body = read_len_delimited(&mut buf)?;
                let fields = decode_plain_strings(&body, 3)?;
                event = Some(NotifyEvent::OnBoardReq {
                    oui: fields[0].clone(),
                    product_class: fields[1].clone(),
                    serial_number: fields[2].clone(),
                });
            }
            (6, WIRE_LEN) => {
                let body = read_len_delimited(&mut buf)?;
                let fields = decode_plain_strings(&body, 3)?;
                event = Some(NotifyEvent::OperationComplete {
                    obj_path: fields[0].clone(),
                    command_name: fields[1].clone(),
                    command_key: fields[2].clone(),
                });
            }
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }
    let event =
        event.ok_or_else(|| UspError::MessageStructure("notify missing event".to_string()))?;
    Ok(Notify {
        subscription_id,
        send_resp,
        event,
    })
}

/// 按字段号 1..=n 读取定长字符串组（缺省为空串）。
fn decode_plain_strings(raw: &[u8], count: u32) -> Result<Vec<String>, UspError> {
    let mut values = vec![String::new(); count as usize];
    let mut buf = raw;
    while buf.has_remaining() {
        let (field, wire_type) = read_tag(&mut buf)?;
        if field >= 1 && field <= count && wire_type == WIRE_LEN {
            values[(field - 1) as usize] = read_string(&mut buf)?;
        } else {
            skip_field(&mut buf, wire_type)?;
        }
    }
    Ok(values)
}

fn decode_response(raw: &[u8]) -> Result<ResponseBody, UspError> {
    let mut buf = raw;
    while buf.has_remaining() {
        let (field, wire_type) = read_tag(&mut buf)?;
        if wire_type != WIRE_LEN {
            skip_field(&mut buf, wire_type)?;
            continue;
        }
        let body = read_len_delimited(&mut buf)?;
        match field {
            1 => {
                let mut inner = body.as_slice();
                let mut results = Vec::new();
                while inner.has_remaining() {
                    let (inner_field, inner_wire) = read_tag(&mut inner)?;
                    if inner_field == 1 && inner_wire == WIRE_LEN {
                        results.push(ParamValue::decode(&read_len_delimited(&mut inner)?)?);
                    } else {
                        skip_field(&mut inner, inner_wire)?;
                    }
                }
                return Ok(ResponseBody::GetResp { results });
            }
            2 => {
                return Ok(ResponseBody::SetResp {
                    updated_paths: decode_string_list(&body, 1)?,
                });
            }
            3 => {
                let fields = decode_plain_strings(&body, 1)?;
                return Ok(ResponseBody::AddResp {
                    instantiated_path: fields[0].clone(),
                });
            }
            4 => {
                return Ok(ResponseBody::DeleteResp {
                    affected_paths: decode_string_list(&body, 1)?,
                });
            }
            5 => {
                let fields = decode_plain_strings(&body, 1)?;
                return Ok(ResponseBody::OperateResp {
                    output_args_json: fields[0].clone(),
                });
            }
            6 => {
                let mut inner = body.as_slice();
                let mut params = Vec::new();
                while inner.has_remaining() {
                    let (inner_field, inner_wire) = read_tag(&mut inner)?;
                    if inner_field == 1 && inner_wire == WIRE_LEN {
                        let item = read_len_delimited(&mut inner)?;
                        let mut item_buf = item.as_slice();
                        let mut path = String::new();
                        let mut writable = false;
                        while item_buf.has_remaining() {
                            let (item_field, item_wire) = read_tag(&mut item_buf)?;
                            match (item_field, item_wire) {
                                (1, WIRE_LEN) => path = read_string(&mut item_buf)?,
                                (2, WIRE_VARINT) => {
                                    writable = read_varint(&mut item_buf)? != 0;
                                }
                                (_, item_wire) => skip_field(&mut item_buf, item_wire)?,
                            }
                        }
                        params.push(SupportedParam { path, writable });
                    } else {
                        skip_field(&mut inner, inner_wire)?;
                    }
                }
                return Ok(ResponseBody::GetSupportedDmResp { params });
            }
            7 => {
                return Ok(ResponseBody::GetInstancesResp {
                    instance_paths: decode_string_list(&body, 1)?,
                });
            }
            8 => {
                let fields = decode_plain_strings(&body, 1)?;
                return Ok(ResponseBody::NotifyResp {
                    subscription_id: fields[0].clone(),
                });
            }
            _ => continue,
        }
    }
    Err(UspError::MessageStructure("empty response body".to_string()))
}

fn decode_error(raw: &[u8]) -> Result<ErrorBody, UspError> {
    let mut buf = raw;
    let mut code: u32 = 0;
    let mut message = String::new();
    while buf.has_remaining() {
        let (field, wire_type) = read_tag(&mut buf)?;
        match (field, wire_type) {
            (1, WIRE_VARINT) => code = read_varint(&mut buf)? as u32,
            (2, WIRE_LEN) => message = read_string(&mut buf)?,
            (_, wire_type) => skip_field(&mut buf, wire_type)?,
        }
    }
    Ok(ErrorBody { code, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let record = Record::new("os::agent-1", "self::controller", vec![1, 2, 3]);
        let decoded = Record::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn record_missing_from_id_rejected() {
        let record = Record {
            version: USP_VERSION.to_string(),
            to_id: "os::agent-1".to_string(),
            from_id: String::new(),
            payload: Vec::new(),
        };
        assert!(Record::decode(&record.encode()).is_err());
    }

    #[test]
    fn get_request_round_trips() {
        let msg = Msg::request(
            "m-1",
            RequestBody::Get {
                param_paths: vec!["Device.DeviceInfo.".to_string()],
            },
        );
        let decoded = Msg::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn set_request_keeps_allow_partial_and_params() {
        let msg = Msg::request(
            "m-2",
            RequestBody::Set {
                allow_partial: true,
                params: vec![ParamValue {
                    path: "Device.WiFi.Radio.1.Enable".to_string(),
                    value: "true".to_string(),
                    param_type: "boolean".to_string(),
                }],
            },
        );
        let decoded = Msg::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn notify_value_change_round_trips() {
        let msg = Msg::request(
            "m-3",
            RequestBody::Notify(Notify {
                subscription_id: "sub-1".to_string(),
                send_resp: true,
                event: NotifyEvent::ValueChange {
                    param_path: "Device.WiFi.Radio.1.Channel".to_string(),
                    param_value: "6".to_string(),
                },
            }),
        );
        let decoded = Msg::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn error_body_surfaces_code_and_message() {
        let msg = Msg::error("m-4", 7011, "parameter is read-only");
        match Msg::decode(&msg.encode()).unwrap().body {
            MsgBody::Error(error) => {
                assert_eq!(error.code, 7011);
                assert_eq!(error.message, "parameter is read-only");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn mutator_classification() {
        assert!(RequestBody::Set {
            allow_partial: false,
            params: Vec::new()
        }
        .is_mutator());
        assert!(!RequestBody::Get {
            param_paths: Vec::new()
        }
        .is_mutator());
    }
}
