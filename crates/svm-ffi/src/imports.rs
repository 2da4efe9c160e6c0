//! Host imports with explicit signatures
//!
//! Functions are declared with their parameter and result types up front and
//! registered before the runtime is created. Nothing can be unregistered.

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::Arc;

use svm_codec::{Value, ValueType};

use crate::buffer::{checked_len, ExternAllocator, RawBuffer};
use crate::dispatch::{self, svm_trampoline, FunctionEnvironment, HostError, HostFunction};
use crate::error::{Error, Result};
use crate::runtime::VmApi;

/// A registered host import
#[derive(Clone)]
pub struct ImportFunction {
    /// Import name
    pub name: String,
    /// Import namespace
    pub namespace: String,
    /// Parameter types
    pub params: Vec<ValueType>,
    /// Result types
    pub returns: Vec<ValueType>,
    /// Host implementation
    pub implementation: HostFunction,
    /// Index in the dispatch table
    pub index: usize,
}

impl std::fmt::Debug for ImportFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportFunction")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .field("index", &self.index)
            .finish()
    }
}

/// Collects host imports for one runtime
#[derive(Debug, Default)]
pub struct ImportsBuilder {
    namespace: Option<String>,
    functions: Vec<ImportFunction>,
    names: HashSet<String>,
}

impl ImportsBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace for the imports; defaults to the runtime configuration's
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Register a host function under `name` and return its dispatch index
    pub fn register_function<F>(
        &mut self,
        name: &str,
        params: &[ValueType],
        returns: &[ValueType],
        implementation: F,
    ) -> Result<usize>
    where
        F: Fn(&[Value]) -> std::result::Result<Vec<Value>, HostError> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(Error::Import("import name cannot be empty".to_string()));
        }
        if !self.names.insert(name.to_string()) {
            return Err(Error::Import(format!("duplicate import `{}`", name)));
        }

        let implementation: HostFunction = Arc::new(implementation);
        let index = dispatch::register(implementation.clone());
        tracing::debug!(
            target: "svm::imports",
            name,
            index,
            params = params.len(),
            returns = returns.len(),
            "registered host import"
        );

        self.functions.push(ImportFunction {
            name: name.to_string(),
            namespace: String::new(),
            params: params.to_vec(),
            returns: returns.to_vec(),
            implementation,
            index,
        });
        Ok(index)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Hand the imports to the VM
    pub(crate) fn build(
        self,
        api: &VmApi,
        vm: &Arc<ExternAllocator>,
        default_namespace: &str,
    ) -> Result<Imports> {
        let namespace = self
            .namespace
            .unwrap_or_else(|| default_namespace.to_string());

        let count = checked_len(self.functions.len())?;
        // SAFETY: `imports_alloc` is the VM's entry point
        let raw = unsafe { (api.imports_alloc)(count) };
        let mut imports = Imports {
            raw,
            destroy: api.imports_destroy,
            functions: Vec::with_capacity(self.functions.len()),
            envs: Vec::with_capacity(self.functions.len()),
        };

        for mut function in self.functions {
            function.namespace = namespace.clone();

            let env = Box::new(FunctionEnvironment {
                index: function.index,
                name: function.name.clone(),
                params: function.params.clone(),
                returns: function.returns.clone(),
                vm: Arc::clone(vm),
                error_create: api.wasm_error_create,
            });
            let params = ValueType::encode_list(&function.params);
            let returns = ValueType::encode_list(&function.returns);
            let namespace_raw = RawBuffer::borrowed(namespace.as_bytes())?;
            let name_raw = RawBuffer::borrowed(function.name.as_bytes())?;
            let params_raw = RawBuffer::borrowed(&params)?;
            let returns_raw = RawBuffer::borrowed(&returns)?;
            let mut error = RawBuffer::empty();

            // SAFETY: every buffer is only borrowed for the call; `env` is
            // kept alive by `imports` for as long as the VM may call back
            let result = unsafe {
                (api.import_func_new)(
                    imports.raw,
                    namespace_raw,
                    name_raw,
                    svm_trampoline,
                    &*env as *const FunctionEnvironment as *mut c_void,
                    params_raw,
                    returns_raw,
                    &mut error,
                )
            };
            // SAFETY: the VM hands ownership of the error buffer to the host
            let error = unsafe { vm.adopt(error) };
            if result != 0 {
                return Err(Error::Import(format!(
                    "`{}` rejected by the VM: {}",
                    function.name,
                    String::from_utf8_lossy(error.as_slice())
                )));
            }

            imports.envs.push(env);
            imports.functions.push(function);
        }

        Ok(imports)
    }
}

/// Imports handed to the VM, kept alive for the runtime's lifetime
pub struct Imports {
    raw: *mut c_void,
    destroy: unsafe extern "C" fn(imports: *mut c_void),
    functions: Vec<ImportFunction>,
    envs: Vec<Box<FunctionEnvironment>>,
}

impl Imports {
    /// The VM handle
    pub fn as_ptr(&self) -> *mut c_void {
        self.raw
    }

    /// Registered functions
    pub fn functions(&self) -> &[ImportFunction] {
        &self.functions
    }
}

impl Drop for Imports {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: created by `imports_alloc`, destroyed once
            unsafe { (self.destroy)(self.raw) };
        }
        self.envs.clear();
    }
}
