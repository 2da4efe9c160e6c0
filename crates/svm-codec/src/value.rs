//! Value codec: tagged fixed-width integers
//!
//! # Encoding
//!
//! ```text
//! value:  tag (1 byte) + payload (big-endian)
//!   - I32: 0x00 + 4 bytes
//!   - I64: 0x01 + 8 bytes
//! values: count (1 byte, max 255) + value*
//! ```
//!
//! The value list encoding carries arguments and results of host imports.

use std::fmt;

use crate::error::{DecodeError, EncodeError};
use crate::io::{ByteReader, ByteWriter};

/// Largest number of values a value list can carry
pub const MAX_VALUES: usize = u8::MAX as usize;

/// Scalar type of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// 32-bit integer
    I32 = 0,
    /// 64-bit integer
    I64 = 1,
}

impl ValueType {
    /// Wire tag of this type
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve a wire tag
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(ValueType::I32),
            1 => Ok(ValueType::I64),
            tag => Err(DecodeError::InvalidTag { tag }),
        }
    }

    /// Size of the payload in bytes
    #[inline]
    pub const fn payload_len(self) -> usize {
        match self {
            ValueType::I32 => 4,
            ValueType::I64 => 8,
        }
    }

    /// Encode a signature: one tag byte per type, no count prefix
    pub fn encode_list(types: &[ValueType]) -> Vec<u8> {
        types.iter().map(|ty| ty.tag()).collect()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
        }
    }
}

/// A tagged scalar: a type discriminant plus a 64-bit payload
///
/// I32 payloads are stored sign-extended, so [`Value::to_i64`] of an I32
/// value yields the same number.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    ty: ValueType,
    bits: u64,
}

impl Value {
    /// Create an I32 value
    #[inline]
    pub const fn i32(v: i32) -> Self {
        Self {
            ty: ValueType::I32,
            bits: v as i64 as u64,
        }
    }

    /// Create an I64 value
    #[inline]
    pub const fn i64(v: i64) -> Self {
        Self {
            ty: ValueType::I64,
            bits: v as u64,
        }
    }

    /// Type discriminant
    #[inline]
    pub const fn value_type(&self) -> ValueType {
        self.ty
    }

    /// Raw 64-bit payload
    #[inline]
    pub const fn to_bits(&self) -> u64 {
        self.bits
    }

    /// Payload truncated to 32 bits
    ///
    /// The tag is not checked: an I64 value silently loses its upper half.
    #[inline]
    pub const fn to_i32(&self) -> i32 {
        self.bits as i32
    }

    /// Payload as a 64-bit integer
    ///
    /// The tag is not checked.
    #[inline]
    pub const fn to_i64(&self) -> i64 {
        self.bits as i64
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            ValueType::I32 => write!(f, "I32({})", self.to_i32()),
            ValueType::I64 => write!(f, "I64({})", self.to_i64()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::i32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::i64(v)
    }
}

fn write_value(writer: &mut ByteWriter, value: &Value) {
    writer.emit_u8(value.ty.tag());
    match value.ty {
        ValueType::I32 => writer.emit_u32(value.to_i32() as u32),
        ValueType::I64 => writer.emit_u64(value.bits),
    }
}

fn read_value(reader: &mut ByteReader<'_>) -> Result<Value, DecodeError> {
    let ty = ValueType::from_tag(reader.read_u8()?)?;
    Ok(match ty {
        ValueType::I32 => Value::i32(reader.read_u32()? as i32),
        ValueType::I64 => Value::i64(reader.read_u64()? as i64),
    })
}

/// Encode a single value: tag byte then big-endian payload
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(1 + value.ty.payload_len());
    write_value(&mut writer, value);
    writer.into_bytes()
}

/// Encode a value list: count byte then each value in order
pub fn encode_values(values: &[Value]) -> Result<Vec<u8>, EncodeError> {
    if values.len() > MAX_VALUES {
        return Err(EncodeError::TooManyValues {
            count: values.len(),
            max: MAX_VALUES,
        });
    }

    let size = 1 + values
        .iter()
        .map(|v| 1 + v.ty.payload_len())
        .sum::<usize>();
    let mut writer = ByteWriter::with_capacity(size);
    writer.emit_u8(values.len() as u8);
    for value in values {
        write_value(&mut writer, value);
    }
    Ok(writer.into_bytes())
}

/// Decode a value list produced by [`encode_values`]
///
/// The whole buffer must be consumed.
pub fn decode_values(bytes: &[u8]) -> Result<Vec<Value>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u8()? as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(read_value(&mut reader)?);
    }
    reader.finish()?;
    Ok(values)
}
