//! A small in-process VM speaking the C ABI the host bindings expect
//!
//! Deploy registers a template at an address derived from the principal,
//! spawn instantiates a known template, and exec calls a host import by name:
//!
//! ```text
//! exec tx: name length (1) + name + encoded value list
//! ```
//!
//! Special import names: `__abort` yields a failed receipt without calling
//! anything. The mock never panics across the ABI; misuse of its allocator is
//! counted instead and checked by the tests.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

use parking_lot::Mutex;
use svm_codec::receipt::{DeployReceipt, ExecReceipt, ReceiptHeader, SpawnReceipt};
use svm_codec::{
    decode_values, encode_vm_error, Address, Immediate, Receipt, State, TxType, VmReportedError,
};
use svm_ffi::dispatch::{ImportCallback, SvmEnv};
use svm_ffi::state_kv::{KvDiscardFn, KvGetFn, KvSetFn, KvStateFn};
use svm_ffi::{RawBuffer, VmApi, KV_VALUE_SIZE};

static VM_LIVE: LazyLock<Mutex<HashSet<usize>>> = LazyLock::new(|| Mutex::new(HashSet::new()));
static BAD_FREES: AtomicUsize = AtomicUsize::new(0);
static KV_LIVE: AtomicUsize = AtomicUsize::new(0);

/// Frees of buffers the mock never allocated, or already freed
pub fn bad_frees() -> usize {
    BAD_FREES.load(Ordering::SeqCst)
}

/// The mock's exported functions
pub fn api() -> VmApi {
    VmApi {
        runtime_create: mock_runtime_create,
        runtime_destroy: mock_runtime_destroy,
        imports_alloc: mock_imports_alloc,
        imports_destroy: mock_imports_destroy,
        import_func_new: mock_import_func_new,
        validate: mock_validate,
        deploy: mock_deploy,
        spawn: mock_spawn,
        exec: mock_exec,
        byte_array_alloc: mock_byte_array_alloc,
        byte_array_destroy: mock_byte_array_destroy,
        wasm_error_create: mock_wasm_error_create,
        state_kv_create: mock_state_kv_create,
        state_kv_destroy: mock_state_kv_destroy,
    }
}

/// State KV stores created and not yet destroyed
pub fn live_kv_stores() -> usize {
    KV_LIVE.load(Ordering::SeqCst)
}

/// Build an exec transaction
pub fn exec_tx(name: &str, args: &[u8]) -> Vec<u8> {
    let mut tx = vec![name.len() as u8];
    tx.extend_from_slice(name.as_bytes());
    tx.extend_from_slice(args);
    tx
}

// ============================================================================
// Allocator
// ============================================================================

fn vm_alloc(bytes: &[u8]) -> RawBuffer {
    if bytes.is_empty() {
        return RawBuffer::empty();
    }
    let boxed: Box<[u8]> = bytes.to_vec().into_boxed_slice();
    let len = boxed.len() as u32;
    let ptr = Box::into_raw(boxed) as *const u8;
    VM_LIVE.lock().insert(ptr as usize);
    RawBuffer {
        bytes: ptr,
        length: len,
        capacity: len,
    }
}

unsafe extern "C" fn mock_byte_array_alloc(length: u32) -> RawBuffer {
    vm_alloc(&vec![0u8; length as usize])
}

unsafe extern "C" fn mock_byte_array_destroy(bytes: RawBuffer) {
    if bytes.bytes.is_null() {
        return;
    }
    if !VM_LIVE.lock().remove(&(bytes.bytes as usize)) {
        BAD_FREES.fetch_add(1, Ordering::SeqCst);
        return;
    }
    let slice = ptr::slice_from_raw_parts_mut(bytes.bytes as *mut u8, bytes.capacity as usize);
    drop(Box::from_raw(slice));
}

unsafe extern "C" fn mock_wasm_error_create(message: RawBuffer) -> *mut RawBuffer {
    Box::into_raw(Box::new(vm_alloc(message.as_slice())))
}

unsafe fn set_error(error: *mut RawBuffer, bytes: &[u8]) -> u32 {
    vm_alloc(bytes).write_to(error);
    1
}

unsafe fn set_receipt(out: *mut RawBuffer, error: *mut RawBuffer, receipt: &Receipt) -> u32 {
    match receipt.encode() {
        Ok(bytes) => {
            vm_alloc(&bytes).write_to(out);
            0
        }
        Err(e) => set_error(error, e.to_string().as_bytes()),
    }
}

unsafe fn set_vm_error(error: *mut RawBuffer, reported: VmReportedError) -> u32 {
    match encode_vm_error(&reported) {
        Ok(bytes) => set_error(error, &bytes),
        Err(_) => set_error(error, b"unencodable error"),
    }
}

// ============================================================================
// Imports
// ============================================================================

struct MockImport {
    namespace: String,
    name: String,
    func: ImportCallback,
    host_env: *mut c_void,
    params: Vec<u8>,
    returns: Vec<u8>,
}

struct MockImports {
    functions: Vec<MockImport>,
}

unsafe extern "C" fn mock_imports_alloc(count: u32) -> *mut c_void {
    Box::into_raw(Box::new(MockImports {
        functions: Vec::with_capacity(count as usize),
    })) as *mut c_void
}

unsafe extern "C" fn mock_imports_destroy(imports: *mut c_void) {
    drop(Box::from_raw(imports as *mut MockImports));
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn mock_import_func_new(
    imports: *mut c_void,
    namespace: RawBuffer,
    name: RawBuffer,
    func: ImportCallback,
    host_env: *mut c_void,
    params: RawBuffer,
    returns: RawBuffer,
    error: *mut RawBuffer,
) -> u32 {
    let name = String::from_utf8_lossy(name.as_slice()).into_owned();
    if name == "reject" {
        return set_error(error, b"import name is reserved");
    }
    let imports = &mut *(imports as *mut MockImports);
    imports.functions.push(MockImport {
        namespace: String::from_utf8_lossy(namespace.as_slice()).into_owned(),
        name,
        func,
        host_env,
        params: params.as_slice().to_vec(),
        returns: returns.as_slice().to_vec(),
    });
    0
}

// ============================================================================
// Runtime
// ============================================================================

#[derive(Default)]
struct MockState {
    templates: HashSet<Address>,
    apps: HashMap<Address, u64>,
}

struct MockRuntime {
    imports: *const MockImports,
    state: Mutex<MockState>,
}

unsafe extern "C" fn mock_runtime_create(
    runtime: *mut *mut c_void,
    imports: *const c_void,
    error: *mut RawBuffer,
) -> u32 {
    let imports = imports as *const MockImports;
    if (*imports).functions.iter().any(|f| f.namespace.is_empty()) {
        return set_error(error, b"empty import namespace");
    }
    let boxed = Box::new(MockRuntime {
        imports,
        state: Mutex::new(MockState::default()),
    });
    *runtime = Box::into_raw(boxed) as *mut c_void;
    0
}

unsafe extern "C" fn mock_runtime_destroy(runtime: *mut c_void) {
    drop(Box::from_raw(runtime as *mut MockRuntime));
}

unsafe extern "C" fn mock_validate(
    _runtime: *mut c_void,
    tx_type: u8,
    tx: RawBuffer,
    error: *mut RawBuffer,
) -> u32 {
    if tx_type > 2 {
        return set_error(error, b"unknown transaction type");
    }
    if tx.is_empty() {
        return set_error(error, b"empty transaction");
    }
    0
}

fn header(tx_type: TxType, success: bool) -> ReceiptHeader {
    ReceiptHeader {
        tx_type,
        version: 0,
        success,
    }
}

fn template_address(principal: &Address, tx: &[u8]) -> Address {
    let mut addr = *principal;
    addr.0[19] = addr.0[19].wrapping_add(tx.len() as u8);
    addr
}

fn app_address(template: &Address) -> Address {
    let mut addr = *template;
    addr.0[0] ^= 0xFF;
    addr
}

unsafe extern "C" fn mock_deploy(
    receipt: *mut RawBuffer,
    runtime: *mut c_void,
    tx: RawBuffer,
    addr: RawBuffer,
    gas_metering: bool,
    gas_limit: u64,
    error: *mut RawBuffer,
) -> u32 {
    let runtime = &*(runtime as *const MockRuntime);
    let tx = tx.as_slice();
    let principal = Address::from_bytes(addr.as_slice());

    let gas_used = tx.len() as u64;
    if gas_metering && gas_used > gas_limit {
        return set_vm_error(error, VmReportedError::OutOfGas);
    }

    let template_addr = template_address(&principal, tx);
    runtime.state.lock().templates.insert(template_addr);

    let deployed = Receipt::Deploy(DeployReceipt {
        header: header(TxType::Deploy, true),
        template_addr,
        gas_used: if gas_metering { gas_used } else { 0 },
        logs: Vec::new(),
    });
    set_receipt(receipt, error, &deployed)
}

unsafe extern "C" fn mock_spawn(
    receipt: *mut RawBuffer,
    runtime: *mut c_void,
    tx: RawBuffer,
    _addr: RawBuffer,
    _gas_metering: bool,
    _gas_limit: u64,
    error: *mut RawBuffer,
) -> u32 {
    let runtime = &*(runtime as *const MockRuntime);
    let template_addr = Address::from_bytes(tx.as_slice());

    let mut state = runtime.state.lock();
    if !state.templates.contains(&template_addr) {
        return set_vm_error(error, VmReportedError::TemplateNotFound { template_addr });
    }
    let app_addr = app_address(&template_addr);
    state.apps.insert(app_addr, 0);

    let spawned = Receipt::Spawn(SpawnReceipt {
        header: header(TxType::Spawn, true),
        app_addr,
        init_state: State::ZERO,
        return_data: svm_codec::encode_immediate(&Immediate::Unit),
        gas_used: 0,
        logs: Vec::new(),
    });
    set_receipt(receipt, error, &spawned)
}

fn failed_exec() -> Receipt {
    Receipt::Exec(ExecReceipt {
        header: header(TxType::Exec, false),
        new_state: State::ZERO,
        return_data: Vec::new(),
        gas_used: 0,
        logs: Vec::new(),
    })
}

unsafe extern "C" fn mock_exec(
    receipt: *mut RawBuffer,
    runtime: *mut c_void,
    tx: RawBuffer,
    addr: RawBuffer,
    _gas_metering: bool,
    _gas_limit: u64,
    error: *mut RawBuffer,
) -> u32 {
    let runtime = &*(runtime as *const MockRuntime);
    let app_addr = Address::from_bytes(addr.as_slice());
    let template_addr = app_address(&app_addr);

    let calls = {
        let mut state = runtime.state.lock();
        match state.apps.get_mut(&app_addr) {
            Some(calls) => {
                *calls += 1;
                *calls
            }
            None => return set_vm_error(error, VmReportedError::AppNotFound { app_addr }),
        }
    };

    let tx = tx.as_slice();
    let name_len = tx.first().copied().unwrap_or(0) as usize;
    if tx.len() < 1 + name_len {
        return set_error(error, b"malformed exec transaction");
    }
    let name = String::from_utf8_lossy(&tx[1..1 + name_len]).into_owned();
    let args = &tx[1 + name_len..];

    if name == "__abort" {
        return set_receipt(receipt, error, &failed_exec());
    }

    let imports = &*runtime.imports;
    let Some(import) = imports.functions.iter().find(|f| f.name == name) else {
        return set_vm_error(
            error,
            VmReportedError::FunctionNotFound {
                template_addr,
                app_addr,
                func: name,
            },
        );
    };

    let mut env = SvmEnv {
        inner_env: ptr::null(),
        host_env: import.host_env as *const c_void,
    };
    let args = RawBuffer::borrowed(args).unwrap_or_default();
    let mut results = RawBuffer::empty();
    let trap = (import.func)(&mut env, &args, &mut results);

    if !trap.is_null() {
        let trap = Box::from_raw(trap);
        let message = String::from_utf8_lossy(trap.as_slice()).into_owned();
        mock_byte_array_destroy(*trap);
        return set_vm_error(
            error,
            VmReportedError::FunctionFailed {
                template_addr,
                app_addr,
                func: name,
                message,
            },
        );
    }

    // The results buffer was allocated through this VM and is ours to free
    let values = decode_values(results.as_slice());
    mock_byte_array_destroy(results);
    let values = match values {
        Ok(values) => values,
        Err(e) => return set_error(error, e.to_string().as_bytes()),
    };

    let returns: Vec<Immediate> = values
        .iter()
        .zip(import.returns.iter())
        .map(|(value, ty)| match ty {
            0 => Immediate::I32(value.to_i32()),
            _ => Immediate::I64(value.to_i64()),
        })
        .collect();
    let return_data = match svm_codec::calldata::encode_immediates(&returns) {
        Ok(bytes) => bytes,
        Err(e) => return set_error(error, e.to_string().as_bytes()),
    };

    let mut new_state = State::ZERO;
    new_state.0[..8].copy_from_slice(&calls.to_be_bytes());

    let executed = Receipt::Exec(ExecReceipt {
        header: header(TxType::Exec, true),
        new_state,
        return_data,
        gas_used: 10,
        logs: Vec::new(),
    });
    set_receipt(receipt, error, &executed)
}

/// Import names and namespaces registered with the mock, for assertions
///
/// # Safety
/// `imports` must be a live handle from this mock.
pub unsafe fn registered(imports: *mut c_void) -> Vec<(String, String, Vec<u8>, Vec<u8>)> {
    let imports = &*(imports as *const MockImports);
    imports
        .functions
        .iter()
        .map(|f| {
            (
                f.namespace.clone(),
                f.name.clone(),
                f.params.clone(),
                f.returns.clone(),
            )
        })
        .collect()
}

// ============================================================================
// State KV
// ============================================================================

/// The callbacks a store was created with, called the way the VM does
pub struct MockKv {
    get: KvGetFn,
    set: KvSetFn,
    discard: KvDiscardFn,
    checkpoint: KvStateFn,
    head: KvStateFn,
}

impl MockKv {
    /// Read a key through the host `get` callback
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut value = [0u8; KV_VALUE_SIZE];
        let mut len = u32::MAX;
        unsafe { (self.get)(key.as_ptr(), key.len() as u32, value.as_mut_ptr(), &mut len) };
        match len {
            0 => None,
            len => Some(value[..len as usize].to_vec()),
        }
    }

    /// Write a key through the host `set` callback
    pub fn set(&self, key: &[u8], value: &[u8]) {
        unsafe { (self.set)(key.as_ptr(), key.len() as u32, value.as_ptr(), value.len() as u32) };
    }

    /// Drop uncommitted changes
    pub fn discard(&self) {
        unsafe { (self.discard)() };
    }

    /// Commit and return the new root
    pub fn checkpoint(&self) -> State {
        let mut root = [0u8; 32];
        unsafe { (self.checkpoint)(root.as_mut_ptr()) };
        State::from_bytes(&root)
    }

    /// The current root
    pub fn head(&self) -> State {
        let mut root = [0u8; 32];
        unsafe { (self.head)(root.as_mut_ptr()) };
        State::from_bytes(&root)
    }
}

unsafe extern "C" fn mock_state_kv_create(
    kv: *mut *mut c_void,
    get: KvGetFn,
    set: KvSetFn,
    discard: KvDiscardFn,
    checkpoint: KvStateFn,
    head: KvStateFn,
) -> u32 {
    let store = Box::new(MockKv {
        get,
        set,
        discard,
        checkpoint,
        head,
    });
    *kv = Box::into_raw(store) as *mut c_void;
    KV_LIVE.fetch_add(1, Ordering::SeqCst);
    0
}

unsafe extern "C" fn mock_state_kv_destroy(kv: *mut c_void) {
    drop(Box::from_raw(kv as *mut MockKv));
    KV_LIVE.fetch_sub(1, Ordering::SeqCst);
}

/// The callbacks behind a store handle
///
/// # Safety
/// `kv` must be a live handle from this mock.
pub unsafe fn state_kv<'a>(kv: *mut c_void) -> &'a MockKv {
    &*(kv as *const MockKv)
}
