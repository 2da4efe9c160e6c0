//! Host bindings for the SVM runtime
//!
//! This crate sits on the host side of the SVM C ABI:
//! - [`buffer`]: byte arrays bound to the allocator that must release them
//! - [`dispatch`] and [`imports`]: host functions the VM can call back into
//! - [`runtime`]: deploy, spawn, exec and validate over the VM's entry points
//! - [`state_kv`]: app storage the VM reads and writes through the host
//! - [`config`]: gas and import settings loaded from TOML
//!
//! The library emits `tracing` events and installs no subscriber.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use std::ffi::c_char;

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod imports;
pub mod runtime;
pub mod state_kv;

pub use buffer::{
    Alias, ExternAllocator, ForeignAllocator, ForeignBuffer, HostAllocator, OwnershipViolation,
    Provenance, RawBuffer,
};
pub use config::{ConfigError, RuntimeConfig};
pub use dispatch::{HostError, HostFunction, HostFunctionRegistry};
pub use error::{Error, Operation, Result};
pub use imports::{ImportFunction, Imports, ImportsBuilder};
pub use runtime::{Runtime, VmApi};
pub use state_kv::{StateKv, StateKvViolation, KV_VALUE_SIZE};

static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

/// Version of the host bindings, as a NUL-terminated string
///
/// The returned pointer is static and must not be freed.
#[no_mangle]
pub extern "C" fn svm_ffi_version() -> *const c_char {
    VERSION.as_ptr() as *const c_char
}

/// Release a host-allocated buffer the VM was handed
///
/// # Safety
/// `bytes` must be null or a buffer the host gave to the VM, released at
/// most once.
#[no_mangle]
pub unsafe extern "C" fn svm_host_byte_array_destroy(bytes: RawBuffer) {
    HostAllocator::global().release(bytes);
}
