//! Transaction builders: envelope, context and template sections
//!
//! ```text
//! envelope  principal (20) + amount (8) + gas limit (8) + gas fee (8)
//! context   layer (8) + tx id (32) + state (32)
//! template  section count (2) + (kind (2) + length (4) + body)*
//! ```

use crate::address::{Address, State, ADDRESS_LENGTH, STATE_LENGTH};
use crate::error::{DecodeError, EncodeError};
use crate::io::{ByteReader, ByteWriter};

/// Encoded length of an [`Envelope`]
pub const ENVELOPE_LENGTH: usize = ADDRESS_LENGTH + 3 * 8;

/// Encoded length of a [`Context`]
pub const CONTEXT_LENGTH: usize = 8 + 32 + STATE_LENGTH;

/// Template format version written into code sections
pub const SVM_VERSION: u32 = 0;

/// Who pays for a transaction and how much
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Paying account
    pub principal: Address,
    /// Transferred amount
    pub amount: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas fee
    pub gas_fee: u64,
}

impl Envelope {
    /// Envelope with zero amount, limit and fee
    pub fn new(principal: Address) -> Self {
        Self {
            principal,
            ..Self::default()
        }
    }

    /// Encode to its fixed 44-byte form
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(ENVELOPE_LENGTH);
        writer.emit_bytes(self.principal.as_bytes());
        writer.emit_u64(self.amount);
        writer.emit_u64(self.gas_limit);
        writer.emit_u64(self.gas_fee);
        writer.into_bytes()
    }

    /// Decode from its fixed 44-byte form
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let envelope = Self {
            principal: Address(reader.read_array()?),
            amount: reader.read_u64()?,
            gas_limit: reader.read_u64()?,
            gas_fee: reader.read_u64()?,
        };
        reader.finish()?;
        Ok(envelope)
    }
}

/// Execution context of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Context {
    /// Layer the transaction executes in
    pub layer: u64,
    /// Transaction id
    pub tx_id: [u8; 32],
    /// State the transaction executes against
    pub state: State,
}

impl Context {
    /// Context with only the state set
    pub fn with_state(state: State) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Encode to its fixed 72-byte form
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(CONTEXT_LENGTH);
        writer.emit_u64(self.layer);
        writer.emit_bytes(&self.tx_id);
        writer.emit_bytes(self.state.as_bytes());
        writer.into_bytes()
    }

    /// Decode from its fixed 72-byte form
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let context = Self {
            layer: reader.read_u64()?,
            tx_id: reader.read_array()?,
            state: State(reader.read_array()?),
        };
        reader.finish()?;
        Ok(context)
    }
}

/// Section kinds of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SectionKind {
    /// Executable code
    Code = 1,
    /// Data layout
    Data = 2,
    /// Constructor names
    Ctors = 3,
}

const WASM_CODE: u16 = 1;
const CODE_EXEC_FLAGS: u64 = 0x01;
const GAS_MODE_FIXED: u64 = 1;
const LAYOUT_FIXED: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Section {
    Code(Vec<u8>),
    Ctors(Vec<String>),
    FixedLayout(Vec<u16>),
}

impl Section {
    fn kind(&self) -> SectionKind {
        match self {
            Section::Code(_) => SectionKind::Code,
            Section::Ctors(_) => SectionKind::Ctors,
            Section::FixedLayout(_) => SectionKind::Data,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::new();
        match self {
            Section::Code(code) => {
                let len =
                    u32::try_from(code.len()).map_err(|_| EncodeError::OutOfRange {
                        ty: "u32".into(),
                        value: code.len() as i128,
                    })?;
                writer.emit_u16(WASM_CODE);
                writer.emit_u64(CODE_EXEC_FLAGS);
                writer.emit_u64(GAS_MODE_FIXED);
                writer.emit_u32(SVM_VERSION);
                writer.emit_u32(len);
                writer.emit_bytes(code);
            }
            Section::Ctors(names) => {
                let count = u8::try_from(names.len()).map_err(|_| EncodeError::TooManyItems {
                    count: names.len(),
                    max: u8::MAX as usize,
                })?;
                writer.emit_u8(count);
                for name in names {
                    let len = u8::try_from(name.len())
                        .map_err(|_| EncodeError::StringTooLong(name.len()))?;
                    writer.emit_u8(len);
                    writer.emit_bytes(name.as_bytes());
                }
            }
            Section::FixedLayout(vars) => {
                let count = u16::try_from(vars.len()).map_err(|_| EncodeError::TooManyItems {
                    count: vars.len(),
                    max: u16::MAX as usize,
                })?;
                writer.emit_u16(1);
                writer.emit_u16(LAYOUT_FIXED);
                writer.emit_u16(count);
                writer.emit_u32(0);
                for var in vars {
                    writer.emit_u16(*var);
                }
            }
        }
        Ok(writer.into_bytes())
    }
}

/// Builder for template deployment payloads
///
/// Sections are written in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    sections: Vec<Section>,
}

impl TemplateBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a Wasm code section with fixed gas pricing
    pub fn code(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.sections.push(Section::Code(code.into()));
        self
    }

    /// Add the constructor names
    pub fn ctors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections
            .push(Section::Ctors(names.into_iter().map(Into::into).collect()));
        self
    }

    /// Add a fixed data layout, one byte size per variable
    pub fn fixed_layout(mut self, vars: impl Into<Vec<u16>>) -> Self {
        self.sections.push(Section::FixedLayout(vars.into()));
        self
    }

    /// Encode all sections
    pub fn build(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::new();
        writer.emit_u16(self.sections.len() as u16);
        for section in &self.sections {
            let body = section.encode_body()?;
            writer.emit_u16(section.kind() as u16);
            writer.emit_u32(body.len() as u32);
            writer.emit_bytes(&body);
        }
        Ok(writer.into_bytes())
    }
}
