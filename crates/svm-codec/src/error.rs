//! Error types for the SVM codecs

use std::fmt;
use thiserror::Error;

use crate::receipt::TxType;

/// Errors that can occur while decoding bytes produced across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input buffer was empty where at least one byte is required
    #[error("invalid input: empty data")]
    EmptyInput,

    /// The buffer ended before a tag or payload was complete
    #[error("bytes are missing; expected: {expected}, given: {given}")]
    UnexpectedEof {
        /// Number of bytes the decoder needed
        expected: usize,
        /// Number of bytes that were left
        given: usize,
    },

    /// A value tag outside of the known value types
    #[error("invalid type tag: {tag}")]
    InvalidTag {
        /// The offending tag byte
        tag: u8,
    },

    /// Bytes remained after the declared content was consumed
    #[error("too many bytes; num expected: {consumed}, num given: {given}")]
    TrailingBytes {
        /// Number of bytes the declared content occupies
        consumed: usize,
        /// Number of bytes in the buffer
        given: usize,
    },

    /// A calldata tag that does not select any immediate
    #[error("invalid value: unknown calldata tag {tag:#04x}")]
    InvalidValue {
        /// The offending calldata tag
        tag: u8,
    },

    /// A receipt ended inside one of its fields
    #[error("invalid receipt: {field} is truncated; expected: {expected}, given: {given}")]
    TruncatedReceipt {
        /// The field that could not be read completely
        field: ReceiptField,
        /// Number of bytes the field needs
        expected: usize,
        /// Number of bytes that were left
        given: usize,
    },

    /// A receipt of one kind was handed to the decoder of another
    #[error("unexpected receipt type; expected: {expected}, given: {given}")]
    UnexpectedTxType {
        /// The receipt kind the caller asked for
        expected: TxType,
        /// The receipt kind found in the header
        given: TxType,
    },

    /// A length-prefixed string was not valid UTF-8
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),
}

/// Receipt fields, used to report where a receipt was truncated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptField {
    /// Common header (type, version, success)
    Header,
    /// Template or app address
    Address,
    /// Initial or new app state
    State,
    /// Two-byte return data length
    ReturnDataLength,
    /// Return data bytes
    ReturnData,
    /// Gas used
    GasUsed,
    /// Number of log entries
    LogCount,
    /// Log entry with the given index
    Log(usize),
}

impl fmt::Display for ReceiptField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiptField::Header => write!(f, "header"),
            ReceiptField::Address => write!(f, "address"),
            ReceiptField::State => write!(f, "state"),
            ReceiptField::ReturnDataLength => write!(f, "return data length"),
            ReceiptField::ReturnData => write!(f, "return data"),
            ReceiptField::GasUsed => write!(f, "gas used"),
            ReceiptField::LogCount => write!(f, "log count"),
            ReceiptField::Log(index) => write!(f, "log #{}", index),
        }
    }
}

/// Errors that can occur while encoding host values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A value list longer than the one-byte count allows
    #[error("too many values: {count} (max {max})")]
    TooManyValues {
        /// Number of values given
        count: usize,
        /// Maximum the wire format can carry
        max: usize,
    },

    /// More calldata items than an array marker can declare
    #[error("too many calldata items: {count} (max {max})")]
    TooManyItems {
        /// Number of items given
        count: usize,
        /// Maximum an array marker can declare
        max: usize,
    },

    /// A calldata type name that is not recognized
    #[error("unknown calldata type `{0}`")]
    UnknownType(String),

    /// A calldata value that does not match its declared type
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Declared type name
        expected: String,
        /// Type name of the given value
        got: String,
    },

    /// An integer that does not fit its declared type
    #[error("value {value} is out of range for {ty}")]
    OutOfRange {
        /// Declared type name
        ty: String,
        /// The offending value
        value: i128,
    },

    /// Type names and values of different lengths
    #[error("arity mismatch: {types} types, {values} values")]
    ArityMismatch {
        /// Number of type names
        types: usize,
        /// Number of values
        values: usize,
    },

    /// A byte field longer than its length prefix allows
    #[error("byte field of {len} bytes exceeds its length prefix (max {max})")]
    BytesTooLong {
        /// Length of the field
        len: usize,
        /// Maximum the length prefix can carry
        max: usize,
    },

    /// A string longer than its length prefix allows
    #[error("string of {0} bytes does not fit its length prefix")]
    StringTooLong(usize),
}
