//! Errors reported by the VM in its error buffer
//!
//! ```text
//! kind (1) + fields
//!   0 out of gas            -
//!   1 template not found    template (20)
//!   2 app not found         app (20)
//!   3 compilation failed    template (20) + app (20) + message
//!   4 instantiation failed  template (20) + app (20) + message
//!   5 function not found    template (20) + app (20) + func
//!   6 function failed       template (20) + app (20) + func + message
//!   7 other                 message
//! strings are length (2, BE) + UTF-8
//! ```
//!
//! Any buffer that does not parse this way is a plain UTF-8 message, read
//! as [`VmReportedError::Other`].

use thiserror::Error;

use crate::address::{Address, ADDRESS_LENGTH};
use crate::error::{DecodeError, EncodeError};
use crate::io::{ByteReader, ByteWriter};

/// A failure reported by the VM for a deploy, spawn, exec or validate call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmReportedError {
    /// Execution ran out of gas
    #[error("out of gas")]
    OutOfGas,

    /// The referenced template does not exist
    #[error("template not found; template address: {template_addr}")]
    TemplateNotFound {
        /// Requested template
        template_addr: Address,
    },

    /// The referenced app does not exist
    #[error("app not found; app address: {app_addr}")]
    AppNotFound {
        /// Requested app
        app_addr: Address,
    },

    /// The template code did not compile
    #[error("compilation failed; template address: {template_addr}, app address: {app_addr}, msg: {message}")]
    CompilationFailed {
        /// Template being compiled
        template_addr: Address,
        /// App being run
        app_addr: Address,
        /// VM message
        message: String,
    },

    /// The compiled code could not be instantiated
    #[error("instantiation failed; template address: {template_addr}, app address: {app_addr}, msg: {message}")]
    InstantiationFailed {
        /// Template being instantiated
        template_addr: Address,
        /// App being run
        app_addr: Address,
        /// VM message
        message: String,
    },

    /// The called function is not exported
    #[error("function not found; template address: {template_addr}, app address: {app_addr}, func: {func}")]
    FunctionNotFound {
        /// Template of the app
        template_addr: Address,
        /// Called app
        app_addr: Address,
        /// Function name
        func: String,
    },

    /// The called function trapped
    #[error("function failed; template address: {template_addr}, app address: {app_addr}, func: {func}, msg: {message}")]
    FunctionFailed {
        /// Template of the app
        template_addr: Address,
        /// Called app
        app_addr: Address,
        /// Function name
        func: String,
        /// VM message
        message: String,
    },

    /// Any other failure, as reported
    #[error("{message}")]
    Other {
        /// VM message
        message: String,
    },
}

fn read_address(reader: &mut ByteReader<'_>) -> Result<Address, DecodeError> {
    reader.read_array::<ADDRESS_LENGTH>().map(Address)
}

fn read_typed(bytes: &[u8]) -> Result<VmReportedError, DecodeError> {
    let mut reader = ByteReader::new(bytes);
    let kind = reader.read_u8()?;

    let error = match kind {
        0 => VmReportedError::OutOfGas,
        1 => VmReportedError::TemplateNotFound {
            template_addr: read_address(&mut reader)?,
        },
        2 => VmReportedError::AppNotFound {
            app_addr: read_address(&mut reader)?,
        },
        3 => VmReportedError::CompilationFailed {
            template_addr: read_address(&mut reader)?,
            app_addr: read_address(&mut reader)?,
            message: reader.read_string()?,
        },
        4 => VmReportedError::InstantiationFailed {
            template_addr: read_address(&mut reader)?,
            app_addr: read_address(&mut reader)?,
            message: reader.read_string()?,
        },
        5 => VmReportedError::FunctionNotFound {
            template_addr: read_address(&mut reader)?,
            app_addr: read_address(&mut reader)?,
            func: reader.read_string()?,
        },
        6 => VmReportedError::FunctionFailed {
            template_addr: read_address(&mut reader)?,
            app_addr: read_address(&mut reader)?,
            func: reader.read_string()?,
            message: reader.read_string()?,
        },
        7 => VmReportedError::Other {
            message: reader.read_string()?,
        },
        tag => return Err(DecodeError::InvalidTag { tag }),
    };

    reader.finish()?;
    Ok(error)
}

/// Decode the contents of a VM error buffer
///
/// Never fails: buffers without a recognizable typed payload become
/// [`VmReportedError::Other`].
pub fn decode_vm_error(bytes: &[u8]) -> VmReportedError {
    read_typed(bytes).unwrap_or_else(|_| VmReportedError::Other {
        message: String::from_utf8_lossy(bytes).into_owned(),
    })
}

fn write_string(writer: &mut ByteWriter, s: &str) -> Result<(), EncodeError> {
    let len = u16::try_from(s.len()).map_err(|_| EncodeError::StringTooLong(s.len()))?;
    writer.emit_u16(len);
    writer.emit_bytes(s.as_bytes());
    Ok(())
}

/// Encode a VM error the way the VM reports it
pub fn encode_vm_error(error: &VmReportedError) -> Result<Vec<u8>, EncodeError> {
    let mut writer = ByteWriter::new();
    match error {
        VmReportedError::OutOfGas => writer.emit_u8(0),
        VmReportedError::TemplateNotFound { template_addr } => {
            writer.emit_u8(1);
            writer.emit_bytes(template_addr.as_bytes());
        }
        VmReportedError::AppNotFound { app_addr } => {
            writer.emit_u8(2);
            writer.emit_bytes(app_addr.as_bytes());
        }
        VmReportedError::CompilationFailed {
            template_addr,
            app_addr,
            message,
        }
        | VmReportedError::InstantiationFailed {
            template_addr,
            app_addr,
            message,
        } => {
            let kind = if matches!(error, VmReportedError::CompilationFailed { .. }) {
                3
            } else {
                4
            };
            writer.emit_u8(kind);
            writer.emit_bytes(template_addr.as_bytes());
            writer.emit_bytes(app_addr.as_bytes());
            write_string(&mut writer, message)?;
        }
        VmReportedError::FunctionNotFound {
            template_addr,
            app_addr,
            func,
        } => {
            writer.emit_u8(5);
            writer.emit_bytes(template_addr.as_bytes());
            writer.emit_bytes(app_addr.as_bytes());
            write_string(&mut writer, func)?;
        }
        VmReportedError::FunctionFailed {
            template_addr,
            app_addr,
            func,
            message,
        } => {
            writer.emit_u8(6);
            writer.emit_bytes(template_addr.as_bytes());
            writer.emit_bytes(app_addr.as_bytes());
            write_string(&mut writer, func)?;
            write_string(&mut writer, message)?;
        }
        VmReportedError::Other { message } => {
            writer.emit_u8(7);
            write_string(&mut writer, message)?;
        }
    }
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_failed_round_trip() {
        let error = VmReportedError::FunctionFailed {
            template_addr: Address([1; 20]),
            app_addr: Address([2; 20]),
            func: "add".into(),
            message: "unreachable".into(),
        };
        let bytes = encode_vm_error(&error).unwrap();
        assert_eq!(bytes[0], 6);
        assert_eq!(decode_vm_error(&bytes), error);
        assert!(error.to_string().starts_with("function failed; template address: 0101"));
    }

    #[test]
    fn test_out_of_gas() {
        assert_eq!(decode_vm_error(&[0]), VmReportedError::OutOfGas);
        assert_eq!(VmReportedError::OutOfGas.to_string(), "out of gas");
    }

    #[test]
    fn test_plain_message_falls_back() {
        assert_eq!(
            decode_vm_error(b"boom"),
            VmReportedError::Other {
                message: "boom".into()
            }
        );
        // Typed kind with a truncated address
        assert_eq!(
            decode_vm_error(&[1, 0xAA]),
            VmReportedError::Other {
                message: String::from_utf8_lossy(&[1, 0xAA]).into_owned()
            }
        );
    }

    #[test]
    fn test_string_too_long() {
        let error = VmReportedError::CompilationFailed {
            template_addr: Address::ZERO,
            app_addr: Address::ZERO,
            message: "x".repeat(70_000),
        };
        assert_eq!(
            encode_vm_error(&error),
            Err(EncodeError::StringTooLong(70_000))
        );
    }

    #[test]
    fn test_other_keeps_its_kind() {
        for message in ["\0", "\u{6}tail", "plain"] {
            let error = VmReportedError::Other {
                message: message.into(),
            };
            let bytes = encode_vm_error(&error).unwrap();
            assert_eq!(bytes[0], 7);
            assert_eq!(decode_vm_error(&bytes), error);
        }
    }
}
