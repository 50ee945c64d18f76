//! AMF0 value codec (Action Message Format, version 0).
//!
//! Every value is self-describing: a one-byte type marker followed by a
//! body whose layout depends on the marker.
//!
//! | Marker | Type | Body |
//! |--------|------|------|
//! | `0x00` | Number | 8-byte big-endian IEEE 754 double |
//! | `0x01` | Boolean | 1 byte, non-zero is true |
//! | `0x02` | String | u16 length + UTF-8 |
//! | `0x03` | Object | (u16 key + value)* then `00 00 09` |
//! | `0x05` | Null | empty |
//! | `0x06` | Undefined | empty |
//! | `0x08` | ECMA array | u32 count, then as Object |
//! | `0x0A` | Strict array | u32 count + values |
//! | `0x0C` | Long string | u32 length + UTF-8 |
//!
//! Composite values write the marker of each child before its body, which
//! is exactly what [`AmfValue::read`] expects to find. An unknown marker is
//! a hard error.

pub mod command;
mod errors;

use std::io::{Read, Write};

pub use command::Command;
pub use errors::AmfError;

/// Deepest nesting accepted when decoding.
pub const MAX_DEPTH: usize = 64;

const OBJECT_END: [u8; 3] = [0x00, 0x00, 0x09];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AmfType {
    Number = 0x00,
    Boolean = 0x01,
    String = 0x02,
    Object = 0x03,
    Null = 0x05,
    Undefined = 0x06,
    EcmaArray = 0x08,
    ObjectEnd = 0x09,
    StrictArray = 0x0A,
    LongString = 0x0C,
}

impl TryFrom<u8> for AmfType {
    type Error = AmfError;

    fn try_from(marker: u8) -> Result<Self, AmfError> {
        Ok(match marker {
            0x00 => Self::Number,
            0x01 => Self::Boolean,
            0x02 => Self::String,
            0x03 => Self::Object,
            0x05 => Self::Null,
            0x06 => Self::Undefined,
            0x08 => Self::EcmaArray,
            0x09 => Self::ObjectEnd,
            0x0A => Self::StrictArray,
            0x0C => Self::LongString,
            other => return Err(AmfError::UnknownMarker(other)),
        })
    }
}

/// A decoded AMF0 value. Object and ECMA array properties keep wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, AmfValue)>),
    Null,
    Undefined,
    EcmaArray(Vec<(String, AmfValue)>),
    StrictArray(Vec<AmfValue>),
    LongString(String),
}

impl AmfValue {
    /// String value, promoted to a long string when it does not fit a u16 length.
    pub fn string(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.len() > u16::MAX as usize {
            Self::LongString(s)
        } else {
            Self::String(s)
        }
    }

    pub fn object<K: Into<String>>(props: impl IntoIterator<Item = (K, AmfValue)>) -> Self {
        Self::Object(props.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn amf_type(&self) -> AmfType {
        match self {
            Self::Number(_) => AmfType::Number,
            Self::Boolean(_) => AmfType::Boolean,
            Self::String(_) => AmfType::String,
            Self::Object(_) => AmfType::Object,
            Self::Null => AmfType::Null,
            Self::Undefined => AmfType::Undefined,
            Self::EcmaArray(_) => AmfType::EcmaArray,
            Self::StrictArray(_) => AmfType::StrictArray,
            Self::LongString(_) => AmfType::LongString,
        }
    }

    /// Body size in bytes, excluding this value's own marker.
    pub fn size(&self) -> usize {
        fn properties_size(props: &[(String, AmfValue)]) -> usize {
            props
                .iter()
                .map(|(k, v)| 2 + k.len() + v.encoded_size())
                .sum::<usize>()
                + OBJECT_END.len()
        }

        match self {
            Self::Number(_) => 8,
            Self::Boolean(_) => 1,
            Self::String(s) => 2 + s.len(),
            Self::LongString(s) => 4 + s.len(),
            Self::Null | Self::Undefined => 0,
            Self::Object(props) => properties_size(props),
            Self::EcmaArray(props) => 4 + properties_size(props),
            Self::StrictArray(items) => 4 + items.iter().map(|v| v.encoded_size()).sum::<usize>(),
        }
    }

    /// Marker plus body.
    pub fn encoded_size(&self) -> usize {
        1 + self.size()
    }

    /// Write the marker followed by the body.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), AmfError> {
        w.write_all(&[self.amf_type() as u8])?;
        self.write_body(w)
    }

    pub fn write_body<W: Write>(&self, w: &mut W) -> Result<(), AmfError> {
        match self {
            Self::Number(n) => w.write_all(&n.to_be_bytes())?,
            Self::Boolean(b) => w.write_all(&[*b as u8])?,
            Self::String(s) => write_short_string(w, s)?,
            Self::LongString(s) => {
                let len = u32::try_from(s.len()).map_err(|_| AmfError::StringTooLong {
                    length: s.len(),
                    max: u32::MAX as usize,
                })?;
                w.write_all(&len.to_be_bytes())?;
                w.write_all(s.as_bytes())?;
            }
            Self::Null | Self::Undefined => {}
            Self::Object(props) => write_properties(w, props)?,
            Self::EcmaArray(props) => {
                w.write_all(&(props.len() as u32).to_be_bytes())?;
                write_properties(w, props)?;
            }
            Self::StrictArray(items) => {
                w.write_all(&(items.len() as u32).to_be_bytes())?;
                for item in items {
                    item.write(w)?;
                }
            }
        }
        Ok(())
    }

    /// Read one marker-prefixed value.
    pub fn read<R: Read>(r: &mut R) -> Result<Self, AmfError> {
        Self::read_nested(r, 0)
    }

    /// Read the body of a value whose marker has already been consumed.
    pub fn read_body<R: Read>(ty: AmfType, r: &mut R) -> Result<Self, AmfError> {
        Self::read_body_nested(ty, r, 0)
    }

    fn read_nested<R: Read>(r: &mut R, depth: usize) -> Result<Self, AmfError> {
        let ty = AmfType::try_from(read_u8(r)?)?;
        Self::read_body_nested(ty, r, depth)
    }

    fn read_body_nested<R: Read>(ty: AmfType, r: &mut R, depth: usize) -> Result<Self, AmfError> {
        if depth > MAX_DEPTH {
            return Err(AmfError::TooDeep(MAX_DEPTH));
        }
        Ok(match ty {
            AmfType::Number => {
                let mut buf = [0u8; 8];
                r.read_exact(&mut buf)?;
                Self::Number(f64::from_be_bytes(buf))
            }
            AmfType::Boolean => Self::Boolean(read_u8(r)? != 0),
            AmfType::String => {
                let len = read_u16(r)? as usize;
                Self::String(read_utf8(r, len)?)
            }
            AmfType::LongString => {
                let len = read_u32(r)? as usize;
                Self::LongString(read_utf8(r, len)?)
            }
            AmfType::Null => Self::Null,
            AmfType::Undefined => Self::Undefined,
            AmfType::Object => Self::Object(read_properties(r, depth)?),
            AmfType::EcmaArray => {
                // The count is advisory; the end marker terminates the array.
                let _count = read_u32(r)?;
                Self::EcmaArray(read_properties(r, depth)?)
            }
            AmfType::StrictArray => {
                let count = read_u32(r)? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(Self::read_nested(r, depth + 1)?);
                }
                Self::StrictArray(items)
            }
            AmfType::ObjectEnd => return Err(AmfError::UnexpectedObjectEnd),
        })
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Result<Vec<u8>, AmfError> {
        let mut out = Vec::with_capacity(self.encoded_size());
        self.write(&mut out)?;
        Ok(out)
    }

    /// Decode one value from the front of `bytes`, returning it and the bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), AmfError> {
        let mut cursor = bytes;
        let value = Self::read(&mut cursor)?;
        Ok((value, bytes.len() - cursor.len()))
    }

    /// Decode consecutive values until `bytes` is exhausted.
    pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<Self>, AmfError> {
        let mut values = Vec::new();
        while !bytes.is_empty() {
            values.push(Self::read(&mut bytes)?);
        }
        Ok(values)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::LongString(s) => Some(s),
            _ => None,
        }
    }

    /// Property lookup on objects and ECMA arrays.
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        match self {
            Self::Object(props) | Self::EcmaArray(props) => {
                props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

fn write_short_string<W: Write>(w: &mut W, s: &str) -> Result<(), AmfError> {
    let len = u16::try_from(s.len()).map_err(|_| AmfError::StringTooLong {
        length: s.len(),
        max: u16::MAX as usize,
    })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn write_properties<W: Write>(w: &mut W, props: &[(String, AmfValue)]) -> Result<(), AmfError> {
    for (key, value) in props {
        write_short_string(w, key)?;
        value.write(w)?;
    }
    w.write_all(&OBJECT_END)?;
    Ok(())
}

fn read_properties<R: Read>(
    r: &mut R,
    depth: usize,
) -> Result<Vec<(String, AmfValue)>, AmfError> {
    let mut props = Vec::new();
    loop {
        let key_len = read_u16(r)? as usize;
        if key_len == 0 {
            let marker = read_u8(r)?;
            if marker == AmfType::ObjectEnd as u8 {
                return Ok(props);
            }
            // Empty key with a regular value.
            let ty = AmfType::try_from(marker)?;
            let value = AmfValue::read_body_nested(ty, r, depth + 1)?;
            props.push((String::new(), value));
            continue;
        }
        let key = read_utf8(r, key_len)?;
        let value = AmfValue::read_nested(r, depth + 1)?;
        props.push((key, value));
    }
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, AmfError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16, AmfError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, AmfError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_utf8<R: Read>(r: &mut R, len: usize) -> Result<String, AmfError> {
    let mut buf = Vec::new();
    r.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(AmfError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(String::from_utf8(buf)?)
}
