//! Loosely typed attribute values as they come back from a controller.
//!
//! A controller reports whatever the device put on the wire, so one attribute can arrive
//! as `U8` from one bridge and `I64` from another. Consumers never cast blindly: each one
//! matches the kinds it accepts and reports anything else as
//! [UnsupportedType](crate::error::Error::UnsupportedType) using [AttributeValue::kind].

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Attribute present but without value (TLV null, or nothing reported).
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Array or list; element tags are dropped.
    List(Vec<AttributeValue>),
    /// Structure with context-tagged fields in wire order.
    Struct(Vec<(u8, AttributeValue)>),
}

impl AttributeValue {
    /// Name of the concrete representation, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::I8(_) => "i8",
            AttributeValue::I16(_) => "i16",
            AttributeValue::I32(_) => "i32",
            AttributeValue::I64(_) => "i64",
            AttributeValue::U8(_) => "u8",
            AttributeValue::U16(_) => "u16",
            AttributeValue::U32(_) => "u32",
            AttributeValue::U64(_) => "u64",
            AttributeValue::F32(_) => "f32",
            AttributeValue::F64(_) => "f64",
            AttributeValue::String(_) => "string",
            AttributeValue::Bytes(_) => "bytes",
            AttributeValue::List(_) => "list",
            AttributeValue::Struct(_) => "struct",
        }
    }

    /// Any integer width, widened. `None` for every non-integer kind.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            AttributeValue::I8(v) => Some(*v as i128),
            AttributeValue::I16(v) => Some(*v as i128),
            AttributeValue::I32(v) => Some(*v as i128),
            AttributeValue::I64(v) => Some(*v as i128),
            AttributeValue::U8(v) => Some(*v as i128),
            AttributeValue::U16(v) => Some(*v as i128),
            AttributeValue::U32(v) => Some(*v as i128),
            AttributeValue::U64(v) => Some(*v as i128),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Field of a structure by context tag.
    pub fn field(&self, tag: u8) -> Option<&AttributeValue> {
        match self {
            AttributeValue::Struct(fields) => fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| v),
            _ => None,
        }
    }

    pub(crate) fn unsupported(&self, what: &'static str) -> Error {
        Error::UnsupportedType {
            what,
            kind: self.kind(),
        }
    }

    /// JSON rendering for poll output. Octet strings become hex strings.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(v) => Value::from(*v),
            AttributeValue::I8(v) => Value::from(*v),
            AttributeValue::I16(v) => Value::from(*v),
            AttributeValue::I32(v) => Value::from(*v),
            AttributeValue::I64(v) => Value::from(*v),
            AttributeValue::U8(v) => Value::from(*v),
            AttributeValue::U16(v) => Value::from(*v),
            AttributeValue::U32(v) => Value::from(*v),
            AttributeValue::U64(v) => Value::from(*v),
            AttributeValue::F32(v) => Value::from(*v as f64),
            AttributeValue::F64(v) => Value::from(*v),
            AttributeValue::String(s) => Value::from(s.as_str()),
            AttributeValue::Bytes(b) => Value::from(hex::encode(b)),
            AttributeValue::List(items) => Value::Array(items.iter().map(|i| i.to_json()).collect()),
            AttributeValue::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(tag, v)| (tag.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Boolean-like decode: `bool`, or an integer holding exactly 0 or 1.
pub(crate) fn flag(value: &AttributeValue, what: &'static str) -> Result<bool> {
    let as_int = match value {
        AttributeValue::Bool(b) => return Ok(*b),
        other => other.as_integer().ok_or_else(|| other.unsupported(what))?,
    };
    match as_int {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(Error::out_of_range(what, v)),
    }
}

/// Character string decode. Octet strings are accepted and read as UTF-8.
pub(crate) fn text(value: &AttributeValue, what: &'static str) -> Result<String> {
    match value {
        AttributeValue::String(s) => Ok(s.clone()),
        AttributeValue::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
        other => Err(other.unsupported(what)),
    }
}
