//! SVM Codecs
//!
//! This crate provides the binary encodings exchanged with the SVM runtime:
//! tagged values for host imports, bit-packed calldata, receipts, VM error
//! payloads and transaction builders. Everything here is pure and holds no
//! shared state.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod address;
pub mod calldata;
pub mod error;
pub mod io;
pub mod marker;
pub mod receipt;
pub mod transaction;
pub mod value;
pub mod vm_error;

pub use address::{Address, State};
pub use calldata::{
    decode_calldata, encode_calldata, encode_calldata_ints, encode_immediate, CalldataType,
    Immediate,
};
pub use error::{DecodeError, EncodeError, ReceiptField};
pub use io::{ByteReader, ByteWriter};
pub use marker::{mark_err, mark_ok, unwrap_marked, MarkedError};
pub use receipt::{
    decode_deploy_receipt, decode_exec_receipt, decode_receipt, decode_receipt_with,
    decode_spawn_receipt, DeployReceipt, ExecReceipt, Log, Receipt, ReceiptHeader, ReceiptLayout,
    SpawnReceipt, TxType,
};
pub use transaction::{Context, Envelope, TemplateBuilder};
pub use value::{decode_values, encode_value, encode_values, Value, ValueType};
pub use vm_error::{decode_vm_error, encode_vm_error, VmReportedError};
