//! Big-endian byte reader and writer shared by the codecs

use crate::error::{DecodeError, ReceiptField};

/// Writer for big-endian wire encodings
#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Get the bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (big-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 32-bit unsigned integer (big-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a 64-bit unsigned integer (big-endian)
    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

/// Bounds-checked reader over a borrowed buffer
///
/// Every read either consumes exactly the requested bytes or fails with
/// [`DecodeError::UnexpectedEof`] without moving the position.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a new reader
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Get the current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the remaining bytes in the buffer
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Check if there are more bytes to read
    pub fn has_more(&self) -> bool {
        self.position < self.buffer.len()
    }

    /// Fail with [`DecodeError::TrailingBytes`] unless the buffer is exhausted
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.has_more() {
            return Err(DecodeError::TrailingBytes {
                consumed: self.position,
                given: self.buffer.len(),
            });
        }
        Ok(())
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let given = self.remaining();
        if len > given {
            return Err(DecodeError::UnexpectedEof {
                expected: len,
                given,
            });
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a 16-bit unsigned integer (big-endian)
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a 32-bit unsigned integer (big-endian)
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a 64-bit unsigned integer (big-endian)
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Read `len` big-endian bytes and zero-extend them to 64 bits
    pub fn read_be_uint(&mut self, len: usize) -> Result<u64, DecodeError> {
        debug_assert!(len <= 8);
        let bytes = self.read_bytes(len)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Read a string with a 16-bit length prefix
    ///
    /// On failure the length prefix is not consumed either.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let offset = self.position;
        let result = self.read_u16().and_then(|len| {
            let bytes = self.read_bytes(len as usize)?;
            std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| DecodeError::InvalidUtf8(offset))
        });
        if result.is_err() {
            self.position = offset;
        }
        result
    }
}

/// Attach the receipt field being read to an end-of-input error
pub(crate) fn in_field(field: ReceiptField) -> impl FnOnce(DecodeError) -> DecodeError {
    move |err| match err {
        DecodeError::UnexpectedEof { expected, given } => DecodeError::TruncatedReceipt {
            field,
            expected,
            given,
        },
        other => other,
    }
}

/// Number of bytes needed to carry `value` with leading zero bytes stripped
///
/// Zero still needs one byte.
pub(crate) fn minimal_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}
