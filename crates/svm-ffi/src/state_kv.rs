//! Host-backed state key-value store
//!
//! The VM reads and writes app storage through five C callbacks registered
//! once when the store is created. Like import dispatch, the callbacks carry
//! no context, so the Rust handlers behind them live in one process-wide
//! table. The table lock is held only to clone a handler out, never while it
//! runs, so a handler may register handlers itself.
//!
//! Values and state roots are fixed size. A missing handler or a wrongly
//! sized result cannot be reported back through the C signatures and is
//! fatal.

use std::ffi::c_void;
use std::ptr;
use std::slice;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use svm_codec::address::STATE_LENGTH;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::runtime::{VmApi, SVM_SUCCESS};

/// Size of every stored value
pub const KV_VALUE_SIZE: usize = 32;

/// Look up a key; `None` when absent
pub type GetHandler = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;
/// Store a value under a key
pub type SetHandler = Arc<dyn Fn(&[u8], &[u8]) + Send + Sync>;
/// Drop uncommitted changes
pub type DiscardHandler = Arc<dyn Fn() + Send + Sync>;
/// Produce a state root: `checkpoint` commits, `head` reads the current one
pub type StateHandler = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// `get` callback: copies at most [`KV_VALUE_SIZE`] bytes into `value`
pub type KvGetFn =
    unsafe extern "C" fn(key: *const u8, key_len: u32, value: *mut u8, value_len: *mut u32);
/// `set` callback
pub type KvSetFn =
    unsafe extern "C" fn(key: *const u8, key_len: u32, value: *const u8, value_len: u32);
/// `discard` callback
pub type KvDiscardFn = unsafe extern "C" fn();
/// `checkpoint` and `head` callback: writes [`STATE_LENGTH`] bytes
pub type KvStateFn = unsafe extern "C" fn(state: *mut u8);

/// VM entry point creating a store over the host callbacks
pub type StateKvCreateFn = unsafe extern "C" fn(
    kv: *mut *mut c_void,
    get: KvGetFn,
    set: KvSetFn,
    discard: KvDiscardFn,
    checkpoint: KvStateFn,
    head: KvStateFn,
) -> u32;

/// VM entry point destroying a store
pub type StateKvDestroyFn = unsafe extern "C" fn(kv: *mut c_void);

/// A store callback the host cannot serve
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateKvViolation {
    /// No handler was registered for the operation
    #[error("`{0}` handler wasn't registered for the state KV")]
    MissingHandler(&'static str),

    /// A handler returned a result of the wrong size
    #[error("`{operation}` returned an invalid {what} size; expected: {expected}, got: {actual}")]
    InvalidSize {
        /// Callback name
        operation: &'static str,
        /// "value" or "state"
        what: &'static str,
        /// Required size
        expected: usize,
        /// Returned size
        actual: usize,
    },
}

#[derive(Default, Clone)]
struct Handlers {
    get: Option<GetHandler>,
    set: Option<SetHandler>,
    discard: Option<DiscardHandler>,
    checkpoint: Option<StateHandler>,
    head: Option<StateHandler>,
}

static HANDLERS: LazyLock<RwLock<Handlers>> = LazyLock::new(|| RwLock::new(Handlers::default()));

/// Install the `get` handler, replacing any previous one
pub fn register_get<F>(f: F)
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    HANDLERS.write().get = Some(Arc::new(f));
}

/// Install the `set` handler, replacing any previous one
pub fn register_set<F>(f: F)
where
    F: Fn(&[u8], &[u8]) + Send + Sync + 'static,
{
    HANDLERS.write().set = Some(Arc::new(f));
}

/// Install the `discard` handler, replacing any previous one
pub fn register_discard<F>(f: F)
where
    F: Fn() + Send + Sync + 'static,
{
    HANDLERS.write().discard = Some(Arc::new(f));
}

/// Install the `checkpoint` handler, replacing any previous one
pub fn register_checkpoint<F>(f: F)
where
    F: Fn() -> Vec<u8> + Send + Sync + 'static,
{
    HANDLERS.write().checkpoint = Some(Arc::new(f));
}

/// Install the `head` handler, replacing any previous one
pub fn register_head<F>(f: F)
where
    F: Fn() -> Vec<u8> + Send + Sync + 'static,
{
    HANDLERS.write().head = Some(Arc::new(f));
}

/// Remove every handler
pub fn clear_handlers() {
    *HANDLERS.write() = Handlers::default();
}

fn handler<T: Clone>(
    name: &'static str,
    pick: impl FnOnce(&Handlers) -> &Option<T>,
) -> std::result::Result<T, StateKvViolation> {
    pick(&HANDLERS.read())
        .clone()
        .ok_or(StateKvViolation::MissingHandler(name))
}

fn check_size(
    operation: &'static str,
    what: &'static str,
    expected: usize,
    actual: usize,
) -> std::result::Result<(), StateKvViolation> {
    if actual != expected {
        return Err(StateKvViolation::InvalidSize {
            operation,
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Run the `get` handler and check the value size
pub fn get(key: &[u8]) -> std::result::Result<Option<[u8; KV_VALUE_SIZE]>, StateKvViolation> {
    let f = handler("get", |h| &h.get)?;
    match f(key) {
        None => Ok(None),
        Some(value) => {
            check_size("get", "value", KV_VALUE_SIZE, value.len())?;
            let mut fixed = [0u8; KV_VALUE_SIZE];
            fixed.copy_from_slice(&value);
            Ok(Some(fixed))
        }
    }
}

/// Run the `set` handler
pub fn set(key: &[u8], value: &[u8]) -> std::result::Result<(), StateKvViolation> {
    let f = handler("set", |h| &h.set)?;
    f(key, value);
    Ok(())
}

/// Run the `discard` handler
pub fn discard() -> std::result::Result<(), StateKvViolation> {
    let f = handler("discard", |h| &h.discard)?;
    f();
    Ok(())
}

fn state(
    operation: &'static str,
    f: StateHandler,
) -> std::result::Result<[u8; STATE_LENGTH], StateKvViolation> {
    let root = f();
    check_size(operation, "state", STATE_LENGTH, root.len())?;
    let mut fixed = [0u8; STATE_LENGTH];
    fixed.copy_from_slice(&root);
    Ok(fixed)
}

/// Run the `checkpoint` handler and check the state size
pub fn checkpoint() -> std::result::Result<[u8; STATE_LENGTH], StateKvViolation> {
    state("checkpoint", handler("checkpoint", |h| &h.checkpoint)?)
}

/// Run the `head` handler and check the state size
pub fn head() -> std::result::Result<[u8; STATE_LENGTH], StateKvViolation> {
    state("head", handler("head", |h| &h.head)?)
}

fn fatal(err: StateKvViolation) -> ! {
    tracing::error!(target: "svm::state_kv", "{}", err);
    panic!("{}", err);
}

unsafe fn bytes<'a>(ptr: *const u8, len: u32) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(ptr, len as usize)
    }
}

/// `get` callback handed to the VM
///
/// # Safety
/// `key` must be valid for `key_len` bytes, `value` writable for
/// [`KV_VALUE_SIZE`] bytes and `value_len` writable.
pub unsafe extern "C" fn svm_kv_get(
    key: *const u8,
    key_len: u32,
    value: *mut u8,
    value_len: *mut u32,
) {
    match get(bytes(key, key_len)) {
        Ok(Some(found)) => {
            ptr::copy_nonoverlapping(found.as_ptr(), value, KV_VALUE_SIZE);
            *value_len = KV_VALUE_SIZE as u32;
        }
        Ok(None) => *value_len = 0,
        Err(err) => fatal(err),
    }
}

/// `set` callback handed to the VM
///
/// # Safety
/// `key` and `value` must be valid for their lengths.
pub unsafe extern "C" fn svm_kv_set(
    key: *const u8,
    key_len: u32,
    value: *const u8,
    value_len: u32,
) {
    if let Err(err) = set(bytes(key, key_len), bytes(value, value_len)) {
        fatal(err);
    }
}

/// `discard` callback handed to the VM
///
/// # Safety
/// Always safe to call; unsafe only to match the C signature.
pub unsafe extern "C" fn svm_kv_discard() {
    if let Err(err) = discard() {
        fatal(err);
    }
}

/// `checkpoint` callback handed to the VM
///
/// # Safety
/// `state` must be writable for [`STATE_LENGTH`] bytes.
pub unsafe extern "C" fn svm_kv_checkpoint(state: *mut u8) {
    match checkpoint() {
        Ok(root) => ptr::copy_nonoverlapping(root.as_ptr(), state, STATE_LENGTH),
        Err(err) => fatal(err),
    }
}

/// `head` callback handed to the VM
///
/// # Safety
/// `head` must be writable for [`STATE_LENGTH`] bytes.
pub unsafe extern "C" fn svm_kv_head(head: *mut u8) {
    match self::head() {
        Ok(root) => ptr::copy_nonoverlapping(root.as_ptr(), head, STATE_LENGTH),
        Err(err) => fatal(err),
    }
}

/// A VM-side store wired to the process-wide handlers
pub struct StateKv {
    raw: *mut c_void,
    destroy: StateKvDestroyFn,
}

impl std::fmt::Debug for StateKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateKv").field("raw", &self.raw).finish()
    }
}

impl StateKv {
    /// Ask the VM to create a store over the host callbacks
    pub fn new(api: &VmApi) -> Result<Self> {
        let mut raw: *mut c_void = ptr::null_mut();
        // SAFETY: the out-parameter is valid and the callbacks are 'static
        let result = unsafe {
            (api.state_kv_create)(
                &mut raw,
                svm_kv_get,
                svm_kv_set,
                svm_kv_discard,
                svm_kv_checkpoint,
                svm_kv_head,
            )
        };
        if result != SVM_SUCCESS {
            return Err(Error::StateKv("failed to create FFI state KV store".to_string()));
        }
        tracing::debug!(target: "svm::state_kv", "state KV created");
        Ok(Self {
            raw,
            destroy: api.state_kv_destroy,
        })
    }

    /// The VM's handle
    pub fn as_ptr(&self) -> *mut c_void {
        self.raw
    }
}

impl Drop for StateKv {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: created by `state_kv_create` and destroyed once
            unsafe { (self.destroy)(self.raw) };
        }
    }
}
