//! protobuf 线格式基元（varint / tag / 长度定界字段）。
//!
//! 信封语法即 TR-369 的 tag/length/value 规范；这里只实现
//! 引擎用到的三种线型：varint(0)、长度定界(2)、以及跳过未知
//! 字段所需的 64/32 位定长。

use crate::error::UspError;
use bytes::{Buf, BufMut, BytesMut};

/// 线型。
pub const WIRE_VARINT: u8 = 0;
pub const WIRE_LEN: u8 = 2;

pub fn write_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

pub fn read_varint(buf: &mut impl Buf) -> Result<u64, UspError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(UspError::MessageFormat("truncated varint".to_string()));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(UspError::MessageFormat("varint overflow".to_string()));
        }
    }
}

pub fn write_tag(buf: &mut BytesMut, field: u32, wire_type: u8) {
    write_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

pub fn read_tag(buf: &mut impl Buf) -> Result<(u32, u8), UspError> {
    let raw = read_varint(buf)?;
    Ok(((raw >> 3) as u32, (raw & 0x7) as u8))
}

pub fn write_string(buf: &mut BytesMut, field: u32, value: &str) {
    if value.is_empty() {
        return;
    }
    write_tag(buf, field, WIRE_LEN);
    write_varint(buf, value.len() as u64);
    buf.put_slice(value.as_bytes());
}

pub fn write_bytes(buf: &mut BytesMut, field: u32, value: &[u8]) {
    if value.is_empty() {
        return;
    }
    write_tag(buf, field, WIRE_LEN);
    write_varint(buf, value.len() as u64);
    buf.put_slice(value);
}

pub fn write_uint(buf: &mut BytesMut, field: u32, value: u64) {
    if value == 0 {
        return;
    }
    write_tag(buf, field, WIRE_VARINT);
    write_varint(buf, value);
}

pub fn write_bool(buf: &mut BytesMut, field: u32, value: bool) {
    if value {
        write_uint(buf, field, 1);
    }
}

/// 嵌套消息字段（即便为空也写出 tag，保持存在性语义）。
pub fn write_message(buf: &mut BytesMut, field: u32, body: &[u8]) {
    write_tag(buf, field, WIRE_LEN);
    write_varint(buf, body.len() as u64);
    buf.put_slice(body);
}

/// 读一个长度定界字段体。
pub fn read_len_delimited(buf: &mut impl Buf) -> Result<Vec<u8>, UspError> {
    let length = read_varint(buf)? as usize;
    if buf.remaining() < length {
        return Err(UspError::MessageFormat("truncated field".to_string()));
    }
    let mut body = vec![0u8; length];
    buf.copy_to_slice(&mut body);
    Ok(body)
}

pub fn read_string(buf: &mut impl Buf) -> Result<String, UspError> {
    let body = read_len_delimited(buf)?;
    String::from_utf8(body).map_err(|_| UspError::MessageFormat("non-utf8 string".to_string()))
}

/// 跳过一个未知字段。
pub fn skip_field(buf: &mut impl Buf, wire_type: u8) -> Result<(), UspError> {
    match wire_type {
        WIRE_VARINT => {
            read_varint(buf)?;
        }
        1 => {
            if buf.remaining() < 8 {
                return Err(UspError::MessageFormat("truncated fixed64".to_string()));
            }
            buf.advance(8);
        }
        WIRE_LEN => {
            let length = read_varint(buf)? as usize;
            if buf.remaining() < length {
                return Err(UspError::MessageFormat("truncated field".to_string()));
            }
            buf.advance(length);
        }
        5 => {
            if buf.remaining() < 4 {
                return Err(UspError::MessageFormat("truncated fixed32".to_string()));
            }
            buf.advance(4);
        }
        other => {
            return Err(UspError::MessageFormat(format!(
                "unsupported wire type {}",
                other
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            write_varint(&mut buf, value);
            let mut slice = buf.freeze();
            assert_eq!(read_varint(&mut slice).unwrap(), value);
        }
    }

    #[test]
    fn truncated_varint_is_format_error() {
        let mut slice = &[0x80u8][..];
        assert!(read_varint(&mut slice).is_err());
    }

    #[test]
    fn unknown_field_skipped() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, 9, "ignored");
        write_uint(&mut buf, 10, 42);
        let mut slice = buf.freeze();

        let (field, wire_type) = read_tag(&mut slice).unwrap();
        assert_eq!(field, 9);
        skip_field(&mut slice, wire_type).unwrap();

        let (field, _) = read_tag(&mut slice).unwrap();
        assert_eq!(field, 10);
        assert_eq!(read_varint(&mut slice).unwrap(), 42);
    }
}
