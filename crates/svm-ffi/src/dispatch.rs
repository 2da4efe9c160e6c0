//! Host import dispatch
//!
//! The VM calls every host import through one C function,
//! [`svm_trampoline`], and identifies the import only by the opaque
//! environment pointer it was registered with. That environment carries a
//! registry index; the functions themselves live in a process-wide,
//! append-only table, since the VM keeps indices for as long as it runs.
//!
//! The table lock is held only to register or look up, never while a host
//! function runs.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use svm_codec::{decode_values, encode_values, Value, ValueType};
use thiserror::Error;

use crate::buffer::{ExternAllocator, ForeignBuffer, RawBuffer};

/// Error returned by a host function; reported to the VM as a trap
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// A host function callable from the VM
pub type HostFunction = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, HostError> + Send + Sync>;

/// Append-only table of host functions
///
/// Indices increase with every registration and are never reused.
#[derive(Default)]
pub struct HostFunctionRegistry {
    functions: Vec<HostFunction>,
}

impl HostFunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function and return its index
    pub fn register(&mut self, function: HostFunction) -> usize {
        let index = self.functions.len();
        self.functions.push(function);
        index
    }

    /// Find the function registered under `index`
    pub fn lookup(&self, index: usize) -> Option<HostFunction> {
        self.functions.get(index).cloned()
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

static REGISTRY: LazyLock<RwLock<HostFunctionRegistry>> =
    LazyLock::new(|| RwLock::new(HostFunctionRegistry::new()));

/// Register a function in the process-wide table
pub fn register(function: HostFunction) -> usize {
    REGISTRY.write().register(function)
}

/// Look up a function in the process-wide table
pub fn lookup(index: usize) -> Option<HostFunction> {
    REGISTRY.read().lookup(index)
}

/// The registry handed the VM an index it no longer knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("host function index {index} is not registered")]
pub struct DispatchInvariantViolation {
    /// The unknown index
    pub index: usize,
}

/// C layout of the environment passed to import callbacks (`svm_env_t`)
#[repr(C)]
#[derive(Debug)]
pub struct SvmEnv {
    /// VM-internal environment, opaque to the host
    pub inner_env: *const c_void,
    /// The [`FunctionEnvironment`] given at registration
    pub host_env: *const c_void,
}

/// VM entry point turning a message into a trap error buffer
pub type ErrorCreateFn = unsafe extern "C" fn(message: RawBuffer) -> *mut RawBuffer;

/// C signature of an import callback
pub type ImportCallback =
    unsafe extern "C" fn(env: *mut SvmEnv, args: *const RawBuffer, results: *mut RawBuffer) -> *mut RawBuffer;

/// Per-import state the VM passes back on every call
pub struct FunctionEnvironment {
    /// Index into the process-wide table
    pub index: usize,
    /// Import name, for diagnostics
    pub name: String,
    /// Declared parameter types
    pub params: Vec<ValueType>,
    /// Declared result types
    pub returns: Vec<ValueType>,
    /// Allocator result buffers are handed to
    pub vm: Arc<ExternAllocator>,
    /// How to report an error to the VM
    pub error_create: ErrorCreateFn,
}

fn check_types(what: &str, expected: &[ValueType], values: &[Value]) -> Result<(), String> {
    let actual: Vec<ValueType> = values.iter().map(Value::value_type).collect();
    if actual != expected {
        return Err(format!(
            "{} type mismatch; expected: {:?}, given: {:?}",
            what, expected, actual
        ));
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Run one import call: decode, check, invoke, encode
///
/// Returns the encoded results, or the message to trap with. A panic in the
/// host function is caught here and becomes a trap.
///
/// # Panics
/// Panics if `env.index` is not registered.
pub fn dispatch(env: &FunctionEnvironment, args: &[u8]) -> Result<Vec<u8>, String> {
    let function = match lookup(env.index) {
        Some(function) => function,
        None => {
            let err = DispatchInvariantViolation { index: env.index };
            tracing::error!(target: "svm::dispatch", index = env.index, name = %env.name, "{}", err);
            panic!("{}", err);
        }
    };

    tracing::trace!(target: "svm::dispatch", index = env.index, name = %env.name, args = args.len(), "host call");

    let args = decode_values(args).map_err(|e| format!("invalid arguments: {}", e))?;
    check_types("argument", &env.params, &args)?;

    let results = match panic::catch_unwind(AssertUnwindSafe(|| function(&args))) {
        Ok(results) => results.map_err(|e| e.to_string())?,
        Err(payload) => {
            let message = format!("host function panicked: {}", panic_message(&*payload));
            tracing::error!(target: "svm::dispatch", index = env.index, name = %env.name, "{}", message);
            return Err(message);
        }
    };
    check_types("result", &env.returns, &results)?;

    encode_values(&results).map_err(|e| format!("invalid results: {}", e))
}

const OVERSIZED_TRAP: &[u8] = b"host error message too long";

/// The callback registered with the VM for every host import
///
/// On success the encoded results are written to `*results` in a
/// VM-allocated buffer, which the VM then owns, and null is returned. On
/// failure the VM-created error is returned.
///
/// # Safety
/// - `env` must point to a valid `SvmEnv` whose `host_env` is a
///   `FunctionEnvironment` registered through [`crate::ImportsBuilder`]
/// - `args` must be null or point to a valid buffer
/// - `results` must be valid for writes
#[no_mangle]
pub unsafe extern "C" fn svm_trampoline(
    env: *mut SvmEnv,
    args: *const RawBuffer,
    results: *mut RawBuffer,
) -> *mut RawBuffer {
    let env = &*((*env).host_env as *const FunctionEnvironment);
    let args = if args.is_null() { &[][..] } else { (*args).as_slice() };

    let message = match dispatch(env, args) {
        Ok(bytes) => match ForeignBuffer::clone_from_slice(env.vm.clone(), &bytes) {
            Ok(buffer) => {
                buffer.into_raw().write_to(results);
                return std::ptr::null_mut();
            }
            Err(err) => format!("invalid results: {}", err),
        },
        Err(message) => message,
    };
    tracing::debug!(target: "svm::dispatch", name = %env.name, %message, "host call failed");
    // The VM copies the message; the alias only lives for this call
    let error = RawBuffer::borrowed(message.as_bytes())
        .unwrap_or_else(|_| RawBuffer::borrowed(OVERSIZED_TRAP).unwrap_or_default());
    (env.error_create)(error)
}
