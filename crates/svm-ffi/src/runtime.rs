//! Runtime wrapper over the VM's C entry points
//!
//! Every call lends the transaction and address bytes to the VM as
//! host-owned buffers and takes ownership of the receipt or error buffer the
//! VM returns. A failing entry point reports a [`VmReportedError`]; a
//! receipt with `success = false` is returned as data.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use svm_codec::{
    decode_deploy_receipt, decode_exec_receipt, decode_spawn_receipt, decode_vm_error, Address,
    DeployReceipt, ExecReceipt, SpawnReceipt, TxType, VmReportedError,
};

use crate::buffer::{
    AllocFn, DestroyFn, ExternAllocator, ForeignAllocator, ForeignBuffer, HostAllocator, RawBuffer,
};
use crate::config::RuntimeConfig;
use crate::dispatch::{ErrorCreateFn, ImportCallback};
use crate::error::{Error, Operation, Result};
use crate::imports::{Imports, ImportsBuilder};
use crate::state_kv::{StateKvCreateFn, StateKvDestroyFn};

/// C result code of a successful entry point call
pub const SVM_SUCCESS: u32 = 0;

/// Signature shared by the deploy, spawn and exec entry points
pub type EntryPointFn = unsafe extern "C" fn(
    receipt: *mut RawBuffer,
    runtime: *mut c_void,
    tx: RawBuffer,
    addr: RawBuffer,
    gas_metering: bool,
    gas_limit: u64,
    error: *mut RawBuffer,
) -> u32;

/// The VM's exported C functions
#[derive(Debug, Clone, Copy)]
pub struct VmApi {
    /// Create a runtime over the given imports
    pub runtime_create:
        unsafe extern "C" fn(runtime: *mut *mut c_void, imports: *const c_void, error: *mut RawBuffer) -> u32,
    /// Destroy a runtime
    pub runtime_destroy: unsafe extern "C" fn(runtime: *mut c_void),
    /// Allocate an imports table
    pub imports_alloc: unsafe extern "C" fn(count: u32) -> *mut c_void,
    /// Destroy an imports table
    pub imports_destroy: unsafe extern "C" fn(imports: *mut c_void),
    /// Add one import to a table
    pub import_func_new: unsafe extern "C" fn(
        imports: *mut c_void,
        namespace: RawBuffer,
        name: RawBuffer,
        func: ImportCallback,
        host_env: *mut c_void,
        params: RawBuffer,
        returns: RawBuffer,
        error: *mut RawBuffer,
    ) -> u32,
    /// Validate a transaction of the given type
    pub validate:
        unsafe extern "C" fn(runtime: *mut c_void, tx_type: u8, tx: RawBuffer, error: *mut RawBuffer) -> u32,
    /// Deploy a template
    pub deploy: EntryPointFn,
    /// Spawn an app
    pub spawn: EntryPointFn,
    /// Call an app function
    pub exec: EntryPointFn,
    /// Allocate a VM byte array
    pub byte_array_alloc: AllocFn,
    /// Release a VM byte array
    pub byte_array_destroy: DestroyFn,
    /// Turn a message into a trap error buffer
    pub wasm_error_create: ErrorCreateFn,
    /// Create a state KV store over host callbacks
    pub state_kv_create: StateKvCreateFn,
    /// Destroy a state KV store
    pub state_kv_destroy: StateKvDestroyFn,
}

/// A VM runtime with its host imports
pub struct Runtime {
    raw: *mut c_void,
    api: VmApi,
    config: RuntimeConfig,
    host: Arc<HostAllocator>,
    vm: Arc<ExternAllocator>,
    imports: Imports,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("imports", &self.imports.functions().len())
            .field("live_vm_buffers", &self.vm.live())
            .finish()
    }
}

impl Runtime {
    /// Register the imports and create a runtime
    pub fn new(api: VmApi, imports: ImportsBuilder, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let vm = Arc::new(ExternAllocator::new(api.byte_array_alloc, api.byte_array_destroy));
        let imports = imports.build(&api, &vm, &config.import_namespace)?;

        let mut raw: *mut c_void = ptr::null_mut();
        let mut error = RawBuffer::empty();
        // SAFETY: out-parameters are valid; `imports` outlives the runtime
        let result = unsafe { (api.runtime_create)(&mut raw, imports.as_ptr(), &mut error) };
        // SAFETY: the error buffer, if any, is now ours
        let error = unsafe { vm.adopt(error) };
        if result != SVM_SUCCESS {
            return Err(Error::RuntimeCreation(
                String::from_utf8_lossy(error.as_slice()).into_owned(),
            ));
        }

        tracing::debug!(
            target: "svm::runtime",
            imports = imports.functions().len(),
            gas_metering = config.gas_metering,
            gas_limit = config.gas_limit,
            "runtime created"
        );

        Ok(Self {
            raw,
            api,
            config,
            host: HostAllocator::global(),
            vm,
            imports,
        })
    }

    /// The active configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Host imports registered with this runtime
    pub fn imports(&self) -> &Imports {
        &self.imports
    }

    /// VM-allocated buffers the host holds and has not released
    pub fn live_vm_buffers(&self) -> usize {
        self.vm.live()
    }

    fn lend(&self, bytes: &[u8]) -> Result<ForeignBuffer> {
        Ok(ForeignBuffer::clone_from_slice(self.host.clone(), bytes)?)
    }

    fn vm_error(&self, operation: Operation, error: &ForeignBuffer) -> Error {
        let error: VmReportedError = decode_vm_error(error.as_slice());
        tracing::warn!(target: "svm::runtime", %operation, %error, "VM reported an error");
        Error::Vm { operation, error }
    }

    /// Validate a transaction without running it
    pub fn validate(&self, tx_type: TxType, tx: &[u8]) -> Result<()> {
        let tx = self.lend(tx)?;
        let mut error = RawBuffer::empty();
        // SAFETY: `tx` is only borrowed by the VM for this call
        let result = unsafe { (self.api.validate)(self.raw, tx_type as u8, tx.raw(), &mut error) };
        // SAFETY: the error buffer, if any, is now ours
        let error = unsafe { self.vm.adopt(error) };
        if result != SVM_SUCCESS {
            return Err(self.vm_error(Operation::Validate, &error));
        }
        Ok(())
    }

    fn invoke(
        &self,
        operation: Operation,
        entry: EntryPointFn,
        tx: &[u8],
        addr: &Address,
        gas_metering: bool,
        gas_limit: u64,
    ) -> Result<ForeignBuffer> {
        tracing::debug!(
            target: "svm::runtime",
            %operation,
            tx_len = tx.len(),
            %addr,
            gas_metering,
            gas_limit,
            "calling VM"
        );

        let tx = self.lend(tx)?;
        let addr = self.lend(addr.as_bytes())?;
        let mut receipt = RawBuffer::empty();
        let mut error = RawBuffer::empty();

        // SAFETY: `tx` and `addr` are only borrowed by the VM for this call;
        // the out-parameters are valid
        let result = unsafe {
            entry(
                &mut receipt,
                self.raw,
                tx.raw(),
                addr.raw(),
                gas_metering,
                gas_limit,
                &mut error,
            )
        };
        // SAFETY: both out-buffers, if set, are now ours
        let (receipt, error) = unsafe { (self.vm.adopt(receipt), self.vm.adopt(error)) };

        if result != SVM_SUCCESS {
            return Err(self.vm_error(operation, &error));
        }
        tracing::debug!(target: "svm::runtime", %operation, receipt_len = receipt.len(), "VM returned");
        Ok(receipt)
    }

    /// Deploy a template with explicit gas settings
    pub fn deploy_with(
        &self,
        tx: &[u8],
        principal: &Address,
        gas_metering: bool,
        gas_limit: u64,
    ) -> Result<DeployReceipt> {
        let receipt = self.invoke(
            Operation::Deploy,
            self.api.deploy,
            tx,
            principal,
            gas_metering,
            gas_limit,
        )?;
        Ok(decode_deploy_receipt(receipt.as_slice())?)
    }

    /// Spawn an app with explicit gas settings
    pub fn spawn_with(
        &self,
        tx: &[u8],
        principal: &Address,
        gas_metering: bool,
        gas_limit: u64,
    ) -> Result<SpawnReceipt> {
        let receipt = self.invoke(
            Operation::Spawn,
            self.api.spawn,
            tx,
            principal,
            gas_metering,
            gas_limit,
        )?;
        Ok(decode_spawn_receipt(receipt.as_slice())?)
    }

    /// Call an app function with explicit gas settings
    pub fn exec_with(
        &self,
        tx: &[u8],
        app: &Address,
        gas_metering: bool,
        gas_limit: u64,
    ) -> Result<ExecReceipt> {
        let receipt = self.invoke(
            Operation::Exec,
            self.api.exec,
            tx,
            app,
            gas_metering,
            gas_limit,
        )?;
        Ok(decode_exec_receipt(receipt.as_slice())?)
    }

    /// Deploy a template using the configured gas settings
    pub fn deploy(&self, tx: &[u8], principal: &Address) -> Result<DeployReceipt> {
        self.deploy_with(tx, principal, self.config.gas_metering, self.config.gas_limit)
    }

    /// Spawn an app using the configured gas settings
    pub fn spawn(&self, tx: &[u8], principal: &Address) -> Result<SpawnReceipt> {
        self.spawn_with(tx, principal, self.config.gas_metering, self.config.gas_limit)
    }

    /// Call an app function using the configured gas settings
    pub fn exec(&self, tx: &[u8], app: &Address) -> Result<ExecReceipt> {
        self.exec_with(tx, app, self.config.gas_metering, self.config.gas_limit)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: created by `runtime_create`, destroyed once, before the
            // imports it refers to
            unsafe { (self.api.runtime_destroy)(self.raw) };
        }
    }
}
