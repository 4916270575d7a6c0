//! AMF0 : commandes RTMP et métadonnées `onMetaData`.
//!
//! Les objets gardent l'ordre des propriétés (encodage déterministe).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_DATE: u8 = 0x0B;
const MARKER_LONG_STRING: u8 = 0x0C;

const MAX_NESTING_DEPTH: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Amf0Error {
    #[error("unexpected end of AMF0 data")]
    UnexpectedEof,

    #[error("unsupported AMF0 marker 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("invalid UTF-8 in AMF0 string")]
    InvalidUtf8,

    #[error("AMF0 nesting too deep")]
    NestingTooDeep,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, Amf0Value)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, Amf0Value)>),
    StrictArray(Vec<Amf0Value>),
}

impl Amf0Value {
    pub fn string(s: impl Into<String>) -> Self {
        Amf0Value::String(s.into())
    }

    pub fn object<K: Into<String>>(props: impl IntoIterator<Item = (K, Amf0Value)>) -> Self {
        Amf0Value::Object(props.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Amf0Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf0Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Propriété d'un objet ou d'un tableau associatif.
    pub fn get(&self, key: &str) -> Option<&Amf0Value> {
        match self {
            Amf0Value::Object(props) | Amf0Value::EcmaArray(props) => {
                props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

pub fn encode(value: &Amf0Value, buf: &mut BytesMut) {
    match value {
        Amf0Value::Number(n) => {
            buf.put_u8(MARKER_NUMBER);
            buf.put_f64(*n);
        }
        Amf0Value::Boolean(b) => {
            buf.put_u8(MARKER_BOOLEAN);
            buf.put_u8(u8::from(*b));
        }
        Amf0Value::String(s) => {
            if s.len() > u16::MAX as usize {
                buf.put_u8(MARKER_LONG_STRING);
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            } else {
                buf.put_u8(MARKER_STRING);
                put_utf8(buf, s);
            }
        }
        Amf0Value::Object(props) => {
            buf.put_u8(MARKER_OBJECT);
            put_properties(buf, props);
        }
        Amf0Value::Null => buf.put_u8(MARKER_NULL),
        Amf0Value::Undefined => buf.put_u8(MARKER_UNDEFINED),
        Amf0Value::EcmaArray(props) => {
            buf.put_u8(MARKER_ECMA_ARRAY);
            buf.put_u32(props.len() as u32);
            put_properties(buf, props);
        }
        Amf0Value::StrictArray(items) => {
            buf.put_u8(MARKER_STRICT_ARRAY);
            buf.put_u32(items.len() as u32);
            for item in items {
                encode(item, buf);
            }
        }
    }
}

pub fn encode_all(values: &[Amf0Value]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    for value in values {
        encode(value, &mut buf);
    }
    buf.freeze()
}

fn put_utf8(buf: &mut BytesMut, s: &str) {
    let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn put_properties(buf: &mut BytesMut, props: &[(String, Amf0Value)]) {
    for (key, value) in props {
        put_utf8(buf, key);
        encode(value, buf);
    }
    buf.put_u16(0);
    buf.put_u8(MARKER_OBJECT_END);
}

pub fn decode(buf: &mut Bytes) -> Result<Amf0Value, Amf0Error> {
    decode_value(buf, 0)
}

pub fn decode_all(mut buf: Bytes) -> Result<Vec<Amf0Value>, Amf0Error> {
    let mut values = Vec::new();
    while buf.has_remaining() {
        values.push(decode(&mut buf)?);
    }
    Ok(values)
}

fn decode_value(buf: &mut Bytes, depth: usize) -> Result<Amf0Value, Amf0Error> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Amf0Error::NestingTooDeep);
    }
    if !buf.has_remaining() {
        return Err(Amf0Error::UnexpectedEof);
    }

    match buf.get_u8() {
        MARKER_NUMBER => {
            need(buf, 8)?;
            Ok(Amf0Value::Number(buf.get_f64()))
        }
        MARKER_BOOLEAN => {
            need(buf, 1)?;
            Ok(Amf0Value::Boolean(buf.get_u8() != 0))
        }
        MARKER_STRING => Ok(Amf0Value::String(read_utf8(buf)?)),
        MARKER_LONG_STRING => {
            need(buf, 4)?;
            let len = buf.get_u32() as usize;
            Ok(Amf0Value::String(read_bytes_utf8(buf, len)?))
        }
        MARKER_OBJECT => Ok(Amf0Value::Object(read_properties(buf, depth)?)),
        MARKER_ECMA_ARRAY => {
            need(buf, 4)?;
            // Le compteur n'est qu'une indication
            let _count = buf.get_u32();
            Ok(Amf0Value::EcmaArray(read_properties(buf, depth)?))
        }
        MARKER_STRICT_ARRAY => {
            need(buf, 4)?;
            let count = buf.get_u32() as usize;
            let mut items = Vec::with_capacity(count.min(256));
            for _ in 0..count {
                items.push(decode_value(buf, depth + 1)?);
            }
            Ok(Amf0Value::StrictArray(items))
        }
        MARKER_DATE => {
            need(buf, 10)?;
            let millis = buf.get_f64();
            let _tz = buf.get_i16();
            Ok(Amf0Value::Number(millis))
        }
        MARKER_NULL => Ok(Amf0Value::Null),
        MARKER_UNDEFINED => Ok(Amf0Value::Undefined),
        other => Err(Amf0Error::UnknownMarker(other)),
    }
}

fn read_properties(
    buf: &mut Bytes,
    depth: usize,
) -> Result<Vec<(String, Amf0Value)>, Amf0Error> {
    let mut props = Vec::new();
    loop {
        let key = read_utf8(buf)?;
        if key.is_empty() {
            // Certains serveurs omettent le marqueur de fin
            if buf.has_remaining() && buf.chunk()[0] == MARKER_OBJECT_END {
                buf.advance(1);
            }
            return Ok(props);
        }
        let value = decode_value(buf, depth + 1)?;
        props.push((key, value));
    }
}

fn need(buf: &Bytes, n: usize) -> Result<(), Amf0Error> {
    if buf.remaining() < n {
        Err(Amf0Error::UnexpectedEof)
    } else {
        Ok(())
    }
}

fn read_utf8(buf: &mut Bytes) -> Result<String, Amf0Error> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    read_bytes_utf8(buf, len)
}

fn read_bytes_utf8(buf: &mut Bytes, len: usize) -> Result<String, Amf0Error> {
    need(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| Amf0Error::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_command_layout() {
        let bytes = encode_all(&[
            Amf0Value::string("connect"),
            Amf0Value::Number(1.0),
            Amf0Value::object([("app", Amf0Value::string("live"))]),
        ]);

        assert_eq!(&bytes[..3], &[0x02, 0x00, 0x07]);
        assert_eq!(&bytes[3..10], b"connect");
        assert_eq!(bytes[10], 0x00);
        assert_eq!(&bytes[11..19], &1.0f64.to_be_bytes());
        assert_eq!(bytes[19], 0x03);
        assert_eq!(&bytes[bytes.len() - 3..], &[0x00, 0x00, 0x09]);
    }

    #[test]
    fn decodes_result_with_nested_object() {
        let bytes = encode_all(&[
            Amf0Value::string("_result"),
            Amf0Value::Number(1.0),
            Amf0Value::object([("fmsVer", Amf0Value::string("FMS/3,0,1,123"))]),
            Amf0Value::object([
                ("level", Amf0Value::string("status")),
                ("code", Amf0Value::string("NetConnection.Connect.Success")),
                ("objectEncoding", Amf0Value::Number(0.0)),
            ]),
        ]);

        let values = decode_all(bytes).unwrap();
        assert_eq!(values[0].as_str(), Some("_result"));
        assert_eq!(values[1].as_number(), Some(1.0));
        assert_eq!(
            values[3].get("code").and_then(Amf0Value::as_str),
            Some("NetConnection.Connect.Success")
        );
    }

    #[test]
    fn missing_object_end_is_tolerated() {
        let mut raw = BytesMut::new();
        raw.put_u8(MARKER_OBJECT);
        raw.put_u16(1);
        raw.put_slice(b"a");
        raw.put_u8(MARKER_NULL);
        raw.put_u16(0);
        let value = decode(&mut raw.freeze()).unwrap();
        assert_eq!(value.get("a"), Some(&Amf0Value::Null));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut raw = Bytes::from_static(&[MARKER_NUMBER, 0x40]);
        assert_eq!(decode(&mut raw), Err(Amf0Error::UnexpectedEof));
        let mut raw = Bytes::from_static(&[0x42]);
        assert_eq!(decode(&mut raw), Err(Amf0Error::UnknownMarker(0x42)));
    }
}
