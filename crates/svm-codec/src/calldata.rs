//! Calldata codec: bit-packed call arguments and return data
//!
//! Every immediate starts with one tag byte. The low nibble selects the kind
//! and, for the variable-width integers, the high nibble selects how many
//! big-endian bytes follow:
//!
//! ```text
//! 0x00 / 0x10             bool false / true
//! 0x20, 0x30              unit
//! 0x40                    address, 20 bytes
//! 0x02 / 0x12             i8 / u8, 1 byte
//! 0x22 / 0x32             i16 / u16, 2 bytes
//! 0x03 | (w-1) << 4       i32, w in 1..=4 bytes
//! 0x43 | (w-1) << 4       u32, w in 1..=4 bytes
//! 0x04 | (w-1) << 4       i64, w in 1..=8 bytes
//! 0x05 | (w-1) << 4       u64, w in 1..=8 bytes
//! 0x01 | (w-1) << 4       amount, w in 1..=8 bytes
//! tag & 0x0e == 0x06      array of (tag >> 4) + 8 * (tag & 1) immediates
//! ```
//!
//! Variable-width payloads are zero-extended, so a negative signed integer
//! always travels at full width.

use std::fmt;
use std::str::FromStr;

use crate::address::{Address, ADDRESS_LENGTH};
use crate::error::{DecodeError, EncodeError};
use crate::io::{minimal_width, ByteReader, ByteWriter};

/// Most immediates a single array marker can declare
pub const MAX_ARRAY_ITEMS: usize = 23;

const ARRAY_MASK: u8 = 0x0e;
const ARRAY_MARKER: u8 = 0x06;

/// A single decoded calldata item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Immediate {
    /// Boolean
    Bool(bool),
    /// Unit / null
    Unit,
    /// 20-byte address
    Address(Address),
    /// Signed 8-bit integer
    I8(i8),
    /// Unsigned 8-bit integer
    U8(u8),
    /// Signed 16-bit integer
    I16(i16),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Signed 32-bit integer
    I32(i32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 64-bit integer
    U64(u64),
    /// Coin amount
    Amount(u64),
}

impl Immediate {
    /// Declared type of this immediate
    pub fn calldata_type(&self) -> CalldataType {
        match self {
            Immediate::Bool(_) => CalldataType::Bool,
            Immediate::Unit => CalldataType::Unit,
            Immediate::Address(_) => CalldataType::Address,
            Immediate::I8(_) => CalldataType::I8,
            Immediate::U8(_) => CalldataType::U8,
            Immediate::I16(_) => CalldataType::I16,
            Immediate::U16(_) => CalldataType::U16,
            Immediate::I32(_) => CalldataType::I32,
            Immediate::U32(_) => CalldataType::U32,
            Immediate::I64(_) => CalldataType::I64,
            Immediate::U64(_) => CalldataType::U64,
            Immediate::Amount(_) => CalldataType::Amount,
        }
    }

    /// Numeric value, for the integer-like immediates
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Immediate::Bool(b) => Some(b as i128),
            Immediate::I8(v) => Some(v.into()),
            Immediate::U8(v) => Some(v.into()),
            Immediate::I16(v) => Some(v.into()),
            Immediate::U16(v) => Some(v.into()),
            Immediate::I32(v) => Some(v.into()),
            Immediate::U32(v) => Some(v.into()),
            Immediate::I64(v) => Some(v.into()),
            Immediate::U64(v) | Immediate::Amount(v) => Some(v.into()),
            Immediate::Unit | Immediate::Address(_) => None,
        }
    }
}

/// Type names accepted by [`encode_calldata`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalldataType {
    /// `bool`
    Bool,
    /// `unit`
    Unit,
    /// `address`
    Address,
    /// `i8`
    I8,
    /// `u8`
    U8,
    /// `i16`
    I16,
    /// `u16`
    U16,
    /// `i32`
    I32,
    /// `u32`
    U32,
    /// `i64`
    I64,
    /// `u64`
    U64,
    /// `amount`
    Amount,
}

impl CalldataType {
    /// Canonical type name
    pub fn name(&self) -> &'static str {
        match self {
            CalldataType::Bool => "bool",
            CalldataType::Unit => "unit",
            CalldataType::Address => "address",
            CalldataType::I8 => "i8",
            CalldataType::U8 => "u8",
            CalldataType::I16 => "i16",
            CalldataType::U16 => "u16",
            CalldataType::I32 => "i32",
            CalldataType::U32 => "u32",
            CalldataType::I64 => "i64",
            CalldataType::U64 => "u64",
            CalldataType::Amount => "amount",
        }
    }

    /// Build an immediate of this type from an integer
    pub fn immediate_from_int(&self, value: i128) -> Result<Immediate, EncodeError> {
        let out_of_range = || EncodeError::OutOfRange {
            ty: self.name().to_string(),
            value,
        };
        Ok(match self {
            CalldataType::Bool => match value {
                0 => Immediate::Bool(false),
                1 => Immediate::Bool(true),
                _ => return Err(out_of_range()),
            },
            CalldataType::I8 => Immediate::I8(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::U8 => Immediate::U8(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::I16 => Immediate::I16(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::U16 => Immediate::U16(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::I32 => Immediate::I32(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::U32 => Immediate::U32(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::I64 => Immediate::I64(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::U64 => Immediate::U64(value.try_into().map_err(|_| out_of_range())?),
            CalldataType::Amount => {
                Immediate::Amount(value.try_into().map_err(|_| out_of_range())?)
            }
            CalldataType::Unit | CalldataType::Address => {
                return Err(EncodeError::TypeMismatch {
                    expected: self.name().to_string(),
                    got: "integer".to_string(),
                })
            }
        })
    }
}

impl FromStr for CalldataType {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bool" => CalldataType::Bool,
            "unit" => CalldataType::Unit,
            "address" => CalldataType::Address,
            "i8" => CalldataType::I8,
            "u8" => CalldataType::U8,
            "i16" => CalldataType::I16,
            "u16" => CalldataType::U16,
            "i32" => CalldataType::I32,
            "u32" => CalldataType::U32,
            "i64" => CalldataType::I64,
            "u64" => CalldataType::U64,
            "amount" => CalldataType::Amount,
            other => return Err(EncodeError::UnknownType(other.to_string())),
        })
    }
}

impl fmt::Display for CalldataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn emit_varlen(writer: &mut ByteWriter, kind: u8, value: u64) {
    let width = minimal_width(value);
    writer.emit_u8((((width - 1) as u8) << 4) | kind);
    writer.emit_bytes(&value.to_be_bytes()[8 - width..]);
}

fn write_immediate(writer: &mut ByteWriter, immediate: &Immediate) {
    match *immediate {
        Immediate::Bool(b) => writer.emit_u8(if b { 0x10 } else { 0x00 }),
        Immediate::Unit => writer.emit_u8(0x20),
        Immediate::Address(addr) => {
            writer.emit_u8(0x40);
            writer.emit_bytes(addr.as_bytes());
        }
        Immediate::I8(v) => {
            writer.emit_u8(0x02);
            writer.emit_u8(v as u8);
        }
        Immediate::U8(v) => {
            writer.emit_u8(0x12);
            writer.emit_u8(v);
        }
        Immediate::I16(v) => {
            writer.emit_u8(0x22);
            writer.emit_u16(v as u16);
        }
        Immediate::U16(v) => {
            writer.emit_u8(0x32);
            writer.emit_u16(v);
        }
        Immediate::I32(v) => emit_varlen(writer, 0x03, u64::from(v as u32)),
        Immediate::U32(v) => emit_varlen(writer, 0x43, u64::from(v)),
        Immediate::I64(v) => emit_varlen(writer, 0x04, v as u64),
        Immediate::U64(v) => emit_varlen(writer, 0x05, v),
        Immediate::Amount(v) => emit_varlen(writer, 0x01, v),
    }
}

/// Encode a single immediate
pub fn encode_immediate(immediate: &Immediate) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    write_immediate(&mut writer, immediate);
    writer.into_bytes()
}

fn array_marker(count: usize) -> u8 {
    if count <= 15 {
        ((count as u8) << 4) | ARRAY_MARKER
    } else {
        (((count - 8) as u8) << 4) | ARRAY_MARKER | 1
    }
}

/// Encode a sequence of immediates
///
/// No items encode to nothing, one item is written bare, and longer
/// sequences get a leading array marker.
pub fn encode_immediates(items: &[Immediate]) -> Result<Vec<u8>, EncodeError> {
    if items.len() > MAX_ARRAY_ITEMS {
        return Err(EncodeError::TooManyItems {
            count: items.len(),
            max: MAX_ARRAY_ITEMS,
        });
    }

    let mut writer = ByteWriter::new();
    if items.len() > 1 {
        writer.emit_u8(array_marker(items.len()));
    }
    for item in items {
        write_immediate(&mut writer, item);
    }
    Ok(writer.into_bytes())
}

/// Encode calldata, checking each value against its declared type name
pub fn encode_calldata<S: AsRef<str>>(
    type_names: &[S],
    values: &[Immediate],
) -> Result<Vec<u8>, EncodeError> {
    if type_names.len() != values.len() {
        return Err(EncodeError::ArityMismatch {
            types: type_names.len(),
            values: values.len(),
        });
    }

    for (name, value) in type_names.iter().zip(values) {
        let declared: CalldataType = name.as_ref().parse()?;
        let actual = value.calldata_type();
        if declared != actual {
            return Err(EncodeError::TypeMismatch {
                expected: declared.name().to_string(),
                got: actual.name().to_string(),
            });
        }
    }

    encode_immediates(values)
}

/// Encode integer arguments against a list of numeric type names
pub fn encode_calldata_ints<S: AsRef<str>>(
    type_names: &[S],
    values: &[i128],
) -> Result<Vec<u8>, EncodeError> {
    if type_names.len() != values.len() {
        return Err(EncodeError::ArityMismatch {
            types: type_names.len(),
            values: values.len(),
        });
    }

    let items = type_names
        .iter()
        .zip(values)
        .map(|(name, value)| name.as_ref().parse::<CalldataType>()?.immediate_from_int(*value))
        .collect::<Result<Vec<_>, _>>()?;
    encode_immediates(&items)
}

// ============================================================================
// Decoding
// ============================================================================

fn is_array_marker(tag: u8) -> bool {
    tag & ARRAY_MASK == ARRAY_MARKER
}

fn read_immediate(reader: &mut ByteReader<'_>) -> Result<Immediate, DecodeError> {
    let tag = reader.read_u8()?;
    let width = usize::from(tag >> 4) + 1;

    Ok(match tag {
        0x00 | 0x10 => Immediate::Bool(tag != 0),
        0x20 | 0x30 => Immediate::Unit,
        0x40 => Immediate::Address(Address(reader.read_array::<ADDRESS_LENGTH>()?)),
        0x02 => Immediate::I8(reader.read_u8()? as i8),
        0x12 => Immediate::U8(reader.read_u8()?),
        0x22 => Immediate::I16(reader.read_u16()? as i16),
        0x32 => Immediate::U16(reader.read_u16()?),
        0x03 | 0x13 | 0x23 | 0x33 => Immediate::I32(reader.read_be_uint(width)? as u32 as i32),
        0x43 | 0x53 | 0x63 | 0x73 => {
            let width = usize::from((tag & 0x30) >> 4) + 1;
            Immediate::U32(reader.read_be_uint(width)? as u32)
        }
        0x04 | 0x14 | 0x24 | 0x34 | 0x44 | 0x54 | 0x64 | 0x74 => {
            Immediate::I64(reader.read_be_uint(width)? as i64)
        }
        0x05 | 0x15 | 0x25 | 0x35 | 0x45 | 0x55 | 0x65 | 0x75 => {
            Immediate::U64(reader.read_be_uint(width)?)
        }
        0x01 | 0x11 | 0x21 | 0x31 | 0x41 | 0x51 | 0x61 | 0x71 => {
            Immediate::Amount(reader.read_be_uint(width)?)
        }
        tag => return Err(DecodeError::InvalidValue { tag }),
    })
}

/// Decode calldata or return data
///
/// Empty input is an empty sequence. A leading array marker declares how
/// many immediates follow; otherwise the buffer holds exactly one.
pub fn decode_calldata(bytes: &[u8]) -> Result<Vec<Immediate>, DecodeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = ByteReader::new(bytes);
    let first = bytes[0];
    let count = if is_array_marker(first) {
        reader.read_u8()?;
        usize::from(first >> 4) + if first & 1 == 1 { 8 } else { 0 }
    } else {
        1
    };

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(read_immediate(&mut reader)?);
    }
    reader.finish()?;
    Ok(items)
}
