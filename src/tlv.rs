//! Matter TLV codec for [AttributeValue].
//!
//! Used to build command payloads (the field list placed inside an invoke request) and by
//! controller implementations to turn report data into [AttributeValue].
//!
//! ```
//! # use matc_hub::tlv;
//! # use matc_hub::value::AttributeValue;
//! // UnlockDoor command fields: PINCode (tag 0) as octet string
//! let payload = tlv::encode_fields(&[(0, AttributeValue::Bytes(b"1234".to_vec()))]).unwrap();
//! assert_eq!(payload, vec![0x30, 0x00, 0x04, b'1', b'2', b'3', b'4']);
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{Error, Result};
use crate::value::AttributeValue;

const TYPE_INT_1: u8 = 0;
const TYPE_INT_2: u8 = 1;
const TYPE_INT_4: u8 = 2;
const TYPE_INT_8: u8 = 3;
const TYPE_UINT_1: u8 = 4;
const TYPE_UINT_2: u8 = 5;
const TYPE_UINT_4: u8 = 6;
const TYPE_UINT_8: u8 = 7;
const TYPE_BOOL_FALSE: u8 = 8;
const TYPE_BOOL_TRUE: u8 = 9;
const TYPE_FLOAT: u8 = 0xA;
const TYPE_DOUBLE: u8 = 0xB;
const TYPE_UTF8_L1: u8 = 0xC;
const TYPE_UTF8_L2: u8 = 0xD;
const TYPE_OCTET_STRING_L1: u8 = 0x10;
const TYPE_OCTET_STRING_L2: u8 = 0x11;
const TYPE_NULL: u8 = 0x14;
const TYPE_STRUCT: u8 = 0x15;
const TYPE_ARRAY: u8 = 0x16;
const TYPE_LIST: u8 = 0x17;
const TYPE_END_CONTAINER: u8 = 0x18;

const CTRL_CTX_L1: u8 = 1 << 5;

// tag length in bytes by tag control (upper three bits of the control octet)
const TAG_LEN: [usize; 8] = [0, 1, 2, 4, 2, 4, 6, 8];

/// Low level writer. Elements are written with a context tag or anonymously.
pub struct TlvBuffer {
    pub data: Vec<u8>,
}

impl TlvBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(256),
        }
    }

    fn write_control(&mut self, tag: Option<u8>, typ: u8) -> std::io::Result<()> {
        match tag {
            Some(tag) => {
                self.data.write_u8(CTRL_CTX_L1 | typ)?;
                self.data.write_u8(tag)
            }
            None => self.data.write_u8(typ),
        }
    }

    fn write_string_like(&mut self, tag: Option<u8>, short: u8, long: u8, bytes: &[u8]) -> Result<()> {
        if bytes.len() > 0xffff {
            return Err(Error::out_of_range("tlv string length", bytes.len()));
        }
        if bytes.len() > 0xff {
            self.write_control(tag, long)?;
            self.data.write_u16::<LittleEndian>(bytes.len() as u16)?;
        } else {
            self.write_control(tag, short)?;
            self.data.write_u8(bytes.len() as u8)?;
        }
        self.data.write_all(bytes)?;
        Ok(())
    }

    pub fn write_end(&mut self) -> std::io::Result<()> {
        self.data.write_u8(TYPE_END_CONTAINER)
    }

    pub fn write_value(&mut self, tag: Option<u8>, value: &AttributeValue) -> Result<()> {
        match value {
            AttributeValue::Null => self.write_control(tag, TYPE_NULL)?,
            AttributeValue::Bool(true) => self.write_control(tag, TYPE_BOOL_TRUE)?,
            AttributeValue::Bool(false) => self.write_control(tag, TYPE_BOOL_FALSE)?,
            AttributeValue::I8(v) => {
                self.write_control(tag, TYPE_INT_1)?;
                self.data.write_i8(*v)?;
            }
            AttributeValue::I16(v) => {
                self.write_control(tag, TYPE_INT_2)?;
                self.data.write_i16::<LittleEndian>(*v)?;
            }
            AttributeValue::I32(v) => {
                self.write_control(tag, TYPE_INT_4)?;
                self.data.write_i32::<LittleEndian>(*v)?;
            }
            AttributeValue::I64(v) => {
                self.write_control(tag, TYPE_INT_8)?;
                self.data.write_i64::<LittleEndian>(*v)?;
            }
            AttributeValue::U8(v) => {
                self.write_control(tag, TYPE_UINT_1)?;
                self.data.write_u8(*v)?;
            }
            AttributeValue::U16(v) => {
                self.write_control(tag, TYPE_UINT_2)?;
                self.data.write_u16::<LittleEndian>(*v)?;
            }
            AttributeValue::U32(v) => {
                self.write_control(tag, TYPE_UINT_4)?;
                self.data.write_u32::<LittleEndian>(*v)?;
            }
            AttributeValue::U64(v) => {
                self.write_control(tag, TYPE_UINT_8)?;
                self.data.write_u64::<LittleEndian>(*v)?;
            }
            AttributeValue::F32(v) => {
                self.write_control(tag, TYPE_FLOAT)?;
                self.data.write_f32::<LittleEndian>(*v)?;
            }
            AttributeValue::F64(v) => {
                self.write_control(tag, TYPE_DOUBLE)?;
                self.data.write_f64::<LittleEndian>(*v)?;
            }
            AttributeValue::String(s) => {
                self.write_string_like(tag, TYPE_UTF8_L1, TYPE_UTF8_L2, s.as_bytes())?
            }
            AttributeValue::Bytes(b) => {
                self.write_string_like(tag, TYPE_OCTET_STRING_L1, TYPE_OCTET_STRING_L2, b)?
            }
            AttributeValue::List(items) => {
                self.write_control(tag, TYPE_ARRAY)?;
                for item in items {
                    self.write_value(None, item)?;
                }
                self.write_end()?;
            }
            AttributeValue::Struct(fields) => {
                self.write_control(tag, TYPE_STRUCT)?;
                for (field_tag, field) in fields {
                    self.write_value(Some(*field_tag), field)?;
                }
                self.write_end()?;
            }
        }
        Ok(())
    }
}

impl Default for TlvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode single anonymous element.
pub fn encode(value: &AttributeValue) -> Result<Vec<u8>> {
    let mut buf = TlvBuffer::new();
    buf.write_value(None, value)?;
    Ok(buf.data)
}

/// Encode context-tagged fields without surrounding structure
/// (the form expected as command fields of an invoke request).
pub fn encode_fields(fields: &[(u8, AttributeValue)]) -> Result<Vec<u8>> {
    let mut buf = TlvBuffer::new();
    for (tag, value) in fields {
        buf.write_value(Some(*tag), value)?;
    }
    Ok(buf.data)
}

fn invalid(msg: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

fn read_tag(tagctrl: u8, cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let len = TAG_LEN[(tagctrl & 7) as usize];
    if tagctrl == 1 {
        return Ok(cursor.read_u8()?);
    }
    // profile tags are skipped; only context tags carry meaning here
    let mut skip = vec![0; len];
    cursor.read_exact(&mut skip)?;
    Ok(0)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let mut value = vec![0; len];
    cursor.read_exact(&mut value)?;
    Ok(value)
}

/// Decode one element. Returns None on end-of-container marker.
fn decode_element(cursor: &mut Cursor<&[u8]>) -> Result<Option<(u8, AttributeValue)>> {
    let fb = cursor.read_u8()?;
    let tp = fb & 0x1f;
    if tp == TYPE_END_CONTAINER {
        return Ok(None);
    }
    let tag = read_tag(fb >> 5, cursor)?;
    let value = match tp {
        TYPE_INT_1 => AttributeValue::I8(cursor.read_i8()?),
        TYPE_INT_2 => AttributeValue::I16(cursor.read_i16::<LittleEndian>()?),
        TYPE_INT_4 => AttributeValue::I32(cursor.read_i32::<LittleEndian>()?),
        TYPE_INT_8 => AttributeValue::I64(cursor.read_i64::<LittleEndian>()?),
        TYPE_UINT_1 => AttributeValue::U8(cursor.read_u8()?),
        TYPE_UINT_2 => AttributeValue::U16(cursor.read_u16::<LittleEndian>()?),
        TYPE_UINT_4 => AttributeValue::U32(cursor.read_u32::<LittleEndian>()?),
        TYPE_UINT_8 => AttributeValue::U64(cursor.read_u64::<LittleEndian>()?),
        TYPE_BOOL_FALSE => AttributeValue::Bool(false),
        TYPE_BOOL_TRUE => AttributeValue::Bool(true),
        TYPE_FLOAT => AttributeValue::F32(cursor.read_f32::<LittleEndian>()?),
        TYPE_DOUBLE => AttributeValue::F64(cursor.read_f64::<LittleEndian>()?),
        TYPE_UTF8_L1 | TYPE_UTF8_L2 => {
            let size = if tp == TYPE_UTF8_L1 {
                cursor.read_u8()? as usize
            } else {
                cursor.read_u16::<LittleEndian>()? as usize
            };
            let raw = read_bytes(cursor, size)?;
            match String::from_utf8(raw) {
                Ok(s) => AttributeValue::String(s),
                Err(e) => AttributeValue::Bytes(e.into_bytes()),
            }
        }
        TYPE_OCTET_STRING_L1 => {
            let size = cursor.read_u8()? as usize;
            AttributeValue::Bytes(read_bytes(cursor, size)?)
        }
        TYPE_OCTET_STRING_L2 => {
            let size = cursor.read_u16::<LittleEndian>()? as usize;
            AttributeValue::Bytes(read_bytes(cursor, size)?)
        }
        TYPE_NULL => AttributeValue::Null,
        TYPE_STRUCT => {
            let mut fields = Vec::new();
            while let Some(field) = decode_element(cursor)? {
                fields.push(field);
            }
            AttributeValue::Struct(fields)
        }
        TYPE_ARRAY | TYPE_LIST => {
            let mut items = Vec::new();
            while let Some((_, item)) = decode_element(cursor)? {
                items.push(item);
            }
            AttributeValue::List(items)
        }
        _ => return Err(invalid(format!("unknown tlv type 0x{:x}", tp))),
    };
    Ok(Some((tag, value)))
}

/// Decode raw buffer holding one tlv element.
pub fn decode(data: &[u8]) -> Result<AttributeValue> {
    let mut cursor = Cursor::new(data);
    match decode_element(&mut cursor)? {
        Some((_, value)) => Ok(value),
        None => Err(invalid("no data found".to_owned())),
    }
}
