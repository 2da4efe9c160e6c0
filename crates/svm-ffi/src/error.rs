//! Error types for the SVM host bindings

use std::fmt;

use svm_codec::{DecodeError, EncodeError, VmReportedError};
use thiserror::Error;

use crate::config::ConfigError;

/// VM entry point an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Transaction validation
    Validate,
    /// Template deployment
    Deploy,
    /// App spawn
    Spawn,
    /// App function call
    Exec,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Validate => write!(f, "validate"),
            Operation::Deploy => write!(f, "deploy"),
            Operation::Spawn => write!(f, "spawn"),
            Operation::Exec => write!(f, "exec"),
        }
    }
}

/// Errors returned by the host bindings
#[derive(Debug, Error)]
pub enum Error {
    /// The VM rejected or failed the operation
    #[error("{operation} failed: {error}")]
    Vm {
        /// Entry point that failed
        operation: Operation,
        /// What the VM reported
        error: VmReportedError,
    },

    /// A VM-produced buffer could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A host value could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Invalid runtime configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A host import could not be registered
    #[error("Import error: {0}")]
    Import(String),

    /// The VM could not create a runtime
    #[error("Runtime creation failed: {0}")]
    RuntimeCreation(String),

    /// The VM could not create a state KV store
    #[error("State KV error: {0}")]
    StateKv(String),
}

/// Result type for the host bindings
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_error_display() {
        let err = Error::Vm {
            operation: Operation::Exec,
            error: VmReportedError::OutOfGas,
        };
        assert_eq!(err.to_string(), "exec failed: out of gas");
    }

    #[test]
    fn test_from_decode_error() {
        let err: Error = DecodeError::EmptyInput.into();
        assert!(matches!(err, Error::Decode(DecodeError::EmptyInput)));
    }
}
