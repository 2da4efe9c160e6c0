//! Receipt decoder
//!
//! A receipt starts with a common header. What follows depends on the
//! transaction type and, for spawn and exec, on whether it succeeded:
//!
//! ```text
//! header   tx_type (1) + version (2, BE) + success (1)
//! deploy   template address (20) + gas used (8)                 + logs?
//! spawn    app address (20) + state (32) + returns + gas used (8) + logs?   if success
//! exec                        state (32) + returns + gas used (8) + logs?   if success
//! returns  length (2, BE) + bytes
//! logs     count (1) + (length (2, BE) + bytes)*
//! ```
//!
//! The compact layout, produced by the hosted codec, drops the version from
//! the header and carries gas used in 4 bytes.
//!
//! A failed spawn or exec receipt is valid data: its tail is not parsed.

use std::fmt;

use crate::address::{Address, State, ADDRESS_LENGTH, STATE_LENGTH};
use crate::calldata::{decode_calldata, Immediate};
use crate::error::{DecodeError, EncodeError, ReceiptField};
use crate::io::{in_field, ByteReader, ByteWriter};

/// Transaction type recorded in a receipt header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxType {
    /// Template deployment
    Deploy = 0,
    /// App spawn
    Spawn = 1,
    /// App function call
    Exec = 2,
}

impl TxType {
    /// Resolve a header type byte
    pub fn from_u8(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(TxType::Deploy),
            1 => Ok(TxType::Spawn),
            2 => Ok(TxType::Exec),
            tag => Err(DecodeError::InvalidTag { tag }),
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxType::Deploy => write!(f, "deploy"),
            TxType::Spawn => write!(f, "spawn"),
            TxType::Exec => write!(f, "exec"),
        }
    }
}

/// Byte layout of a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiptLayout {
    /// Receipts returned by the VM entry points
    #[default]
    Binary,
    /// Receipts returned by the hosted codec
    Compact,
}

impl ReceiptLayout {
    fn header_len(self) -> usize {
        match self {
            ReceiptLayout::Binary => 4,
            ReceiptLayout::Compact => 2,
        }
    }
}

/// Fields shared by every receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptHeader {
    /// Transaction type
    pub tx_type: TxType,
    /// Receipt version, zero for compact receipts
    pub version: u16,
    /// Whether the transaction succeeded
    pub success: bool,
}

/// A raw log entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Log(pub Vec<u8>);

/// Outcome of a template deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReceipt {
    /// Common header
    pub header: ReceiptHeader,
    /// Address of the deployed template
    pub template_addr: Address,
    /// Gas consumed
    pub gas_used: u64,
    /// Emitted logs
    pub logs: Vec<Log>,
}

/// Outcome of an app spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnReceipt {
    /// Common header
    pub header: ReceiptHeader,
    /// Address of the new app, zero on failure
    pub app_addr: Address,
    /// State after the constructor ran, zero on failure
    pub init_state: State,
    /// Encoded constructor return data
    pub return_data: Vec<u8>,
    /// Gas consumed
    pub gas_used: u64,
    /// Emitted logs
    pub logs: Vec<Log>,
}

impl SpawnReceipt {
    /// Decode the constructor return data as calldata
    pub fn returns(&self) -> Result<Vec<Immediate>, DecodeError> {
        decode_calldata(&self.return_data)
    }
}

/// Outcome of an app function call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReceipt {
    /// Common header
    pub header: ReceiptHeader,
    /// State after the call, zero on failure
    pub new_state: State,
    /// Encoded function return data
    pub return_data: Vec<u8>,
    /// Gas consumed
    pub gas_used: u64,
    /// Emitted logs
    pub logs: Vec<Log>,
}

impl ExecReceipt {
    /// Decode the function return data as calldata
    pub fn returns(&self) -> Result<Vec<Immediate>, DecodeError> {
        decode_calldata(&self.return_data)
    }
}

/// A decoded receipt of any kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// Deploy receipt
    Deploy(DeployReceipt),
    /// Spawn receipt
    Spawn(SpawnReceipt),
    /// Exec receipt
    Exec(ExecReceipt),
}

macro_rules! into_kind {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Unwrap the receipt, failing if it is of another kind
        pub fn $name(self) -> Result<$ty, DecodeError> {
            match self {
                Receipt::$variant(r) => Ok(r),
                other => Err(DecodeError::UnexpectedTxType {
                    expected: TxType::$variant,
                    given: other.header().tx_type,
                }),
            }
        }
    };
}

impl Receipt {
    /// Common header
    pub fn header(&self) -> &ReceiptHeader {
        match self {
            Receipt::Deploy(r) => &r.header,
            Receipt::Spawn(r) => &r.header,
            Receipt::Exec(r) => &r.header,
        }
    }

    /// Whether the transaction succeeded
    pub fn success(&self) -> bool {
        self.header().success
    }

    /// Gas consumed
    pub fn gas_used(&self) -> u64 {
        match self {
            Receipt::Deploy(r) => r.gas_used,
            Receipt::Spawn(r) => r.gas_used,
            Receipt::Exec(r) => r.gas_used,
        }
    }

    into_kind!(into_deploy, Deploy, DeployReceipt);
    into_kind!(into_spawn, Spawn, SpawnReceipt);
    into_kind!(into_exec, Exec, ExecReceipt);

    /// Encode in the binary layout
    ///
    /// Fails if the return data or a log entry exceeds its two-byte length
    /// prefix, or if there are more logs than the one-byte count allows.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut writer = ByteWriter::new();
        let header = self.header();
        writer.emit_u8(header.tx_type as u8);
        writer.emit_u16(header.version);
        writer.emit_u8(header.success as u8);

        match self {
            Receipt::Deploy(r) => {
                writer.emit_bytes(r.template_addr.as_bytes());
                writer.emit_u64(r.gas_used);
                write_logs(&mut writer, &r.logs)?;
            }
            Receipt::Spawn(r) if header.success => {
                writer.emit_bytes(r.app_addr.as_bytes());
                write_result(&mut writer, &r.init_state, &r.return_data, r.gas_used, &r.logs)?;
            }
            Receipt::Exec(r) if header.success => {
                write_result(&mut writer, &r.new_state, &r.return_data, r.gas_used, &r.logs)?;
            }
            Receipt::Spawn(_) | Receipt::Exec(_) => {}
        }
        Ok(writer.into_bytes())
    }
}

fn emit_prefixed(writer: &mut ByteWriter, bytes: &[u8]) -> Result<(), EncodeError> {
    let len = u16::try_from(bytes.len()).map_err(|_| EncodeError::BytesTooLong {
        len: bytes.len(),
        max: u16::MAX as usize,
    })?;
    writer.emit_u16(len);
    writer.emit_bytes(bytes);
    Ok(())
}

fn write_result(
    writer: &mut ByteWriter,
    state: &State,
    returns: &[u8],
    gas: u64,
    logs: &[Log],
) -> Result<(), EncodeError> {
    writer.emit_bytes(state.as_bytes());
    emit_prefixed(writer, returns)?;
    writer.emit_u64(gas);
    write_logs(writer, logs)
}

fn write_logs(writer: &mut ByteWriter, logs: &[Log]) -> Result<(), EncodeError> {
    if logs.is_empty() {
        return Ok(());
    }
    let count = u8::try_from(logs.len()).map_err(|_| EncodeError::TooManyItems {
        count: logs.len(),
        max: u8::MAX as usize,
    })?;
    writer.emit_u8(count);
    for log in logs {
        emit_prefixed(writer, &log.0)?;
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

struct ReceiptReader<'a> {
    reader: ByteReader<'a>,
    layout: ReceiptLayout,
}

impl<'a> ReceiptReader<'a> {
    fn header(&mut self) -> Result<ReceiptHeader, DecodeError> {
        let bytes = self
            .reader
            .read_bytes(self.layout.header_len())
            .map_err(in_field(ReceiptField::Header))?;
        let tx_type = TxType::from_u8(bytes[0])?;
        Ok(match self.layout {
            ReceiptLayout::Binary => ReceiptHeader {
                tx_type,
                version: u16::from_be_bytes([bytes[1], bytes[2]]),
                success: bytes[3] != 0,
            },
            ReceiptLayout::Compact => ReceiptHeader {
                tx_type,
                version: 0,
                success: bytes[1] != 0,
            },
        })
    }

    fn address(&mut self) -> Result<Address, DecodeError> {
        self.reader
            .read_array::<ADDRESS_LENGTH>()
            .map(Address)
            .map_err(in_field(ReceiptField::Address))
    }

    fn state(&mut self) -> Result<State, DecodeError> {
        self.reader
            .read_array::<STATE_LENGTH>()
            .map(State)
            .map_err(in_field(ReceiptField::State))
    }

    fn return_data(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self
            .reader
            .read_u16()
            .map_err(in_field(ReceiptField::ReturnDataLength))?;
        self.reader
            .read_bytes(len as usize)
            .map(<[u8]>::to_vec)
            .map_err(in_field(ReceiptField::ReturnData))
    }

    fn gas_used(&mut self) -> Result<u64, DecodeError> {
        let gas = match self.layout {
            ReceiptLayout::Binary => self.reader.read_u64(),
            ReceiptLayout::Compact => self.reader.read_u32().map(u64::from),
        };
        gas.map_err(in_field(ReceiptField::GasUsed))
    }

    /// Optional trailing logs section; absent means no logs
    fn logs(&mut self) -> Result<Vec<Log>, DecodeError> {
        if !self.reader.has_more() {
            return Ok(Vec::new());
        }
        let count = self
            .reader
            .read_u8()
            .map_err(in_field(ReceiptField::LogCount))?;
        (0..count as usize)
            .map(|index| {
                let field = ReceiptField::Log(index);
                let len = self.reader.read_u16().map_err(in_field(field))?;
                let bytes = self
                    .reader
                    .read_bytes(len as usize)
                    .map_err(in_field(field))?;
                Ok(Log(bytes.to_vec()))
            })
            .collect()
    }

    fn receipt(mut self) -> Result<Receipt, DecodeError> {
        let header = self.header()?;

        let receipt = match header.tx_type {
            TxType::Deploy => {
                let template_addr = self.address()?;
                let gas_used = self.gas_used()?;
                let logs = self.logs()?;
                Receipt::Deploy(DeployReceipt {
                    header,
                    template_addr,
                    gas_used,
                    logs,
                })
            }
            TxType::Spawn if !header.success => {
                return Ok(Receipt::Spawn(SpawnReceipt {
                    header,
                    app_addr: Address::ZERO,
                    init_state: State::ZERO,
                    return_data: Vec::new(),
                    gas_used: 0,
                    logs: Vec::new(),
                }))
            }
            TxType::Exec if !header.success => {
                return Ok(Receipt::Exec(ExecReceipt {
                    header,
                    new_state: State::ZERO,
                    return_data: Vec::new(),
                    gas_used: 0,
                    logs: Vec::new(),
                }))
            }
            TxType::Spawn => {
                let app_addr = self.address()?;
                let init_state = self.state()?;
                let return_data = self.return_data()?;
                let gas_used = self.gas_used()?;
                let logs = self.logs()?;
                Receipt::Spawn(SpawnReceipt {
                    header,
                    app_addr,
                    init_state,
                    return_data,
                    gas_used,
                    logs,
                })
            }
            TxType::Exec => {
                let new_state = self.state()?;
                let return_data = self.return_data()?;
                let gas_used = self.gas_used()?;
                let logs = self.logs()?;
                Receipt::Exec(ExecReceipt {
                    header,
                    new_state,
                    return_data,
                    gas_used,
                    logs,
                })
            }
        };

        self.reader.finish()?;
        Ok(receipt)
    }
}

/// Decode a receipt in the given layout
pub fn decode_receipt_with(layout: ReceiptLayout, bytes: &[u8]) -> Result<Receipt, DecodeError> {
    ReceiptReader {
        reader: ByteReader::new(bytes),
        layout,
    }
    .receipt()
}

/// Decode a receipt returned by a VM entry point
pub fn decode_receipt(bytes: &[u8]) -> Result<Receipt, DecodeError> {
    decode_receipt_with(ReceiptLayout::Binary, bytes)
}

/// Decode a deploy receipt
pub fn decode_deploy_receipt(bytes: &[u8]) -> Result<DeployReceipt, DecodeError> {
    decode_receipt(bytes)?.into_deploy()
}

/// Decode a spawn receipt
pub fn decode_spawn_receipt(bytes: &[u8]) -> Result<SpawnReceipt, DecodeError> {
    decode_receipt(bytes)?.into_spawn()
}

/// Decode an exec receipt
pub fn decode_exec_receipt(bytes: &[u8]) -> Result<ExecReceipt, DecodeError> {
    decode_receipt(bytes)?.into_exec()
}
