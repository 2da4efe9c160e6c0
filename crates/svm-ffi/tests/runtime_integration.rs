//! Deploy, spawn and exec through the bindings against an in-process VM

mod common;

use std::io::Write;

use common::mock_vm;
use svm_codec::{encode_values, Address, Immediate, TxType, Value, ValueType, VmReportedError};
use svm_ffi::{Error, HostError, ImportsBuilder, Operation, Runtime, RuntimeConfig};

fn principal() -> Address {
    Address::from_bytes(&[0x11; 20])
}

fn imports() -> ImportsBuilder {
    let mut builder = ImportsBuilder::new();
    builder
        .register_function(
            "add",
            &[ValueType::I32, ValueType::I32],
            &[ValueType::I32],
            |args| Ok(vec![Value::i32(args[0].to_i32() + args[1].to_i32())]),
        )
        .unwrap();
    builder
        .register_function("wide", &[ValueType::I64], &[ValueType::I64], |args| {
            Ok(vec![Value::i64(args[0].to_i64() * 2)])
        })
        .unwrap();
    builder
        .register_function("fail", &[], &[], |_| Err(HostError::from("boom")))
        .unwrap();
    builder
        .register_function("mistyped", &[], &[ValueType::I32], |_| {
            Ok(vec![Value::i64(1)])
        })
        .unwrap();
    builder
}

/// A VM always passes an encoded list, even with no arguments
fn no_args() -> Vec<u8> {
    encode_values(&[]).unwrap()
}

fn runtime() -> Runtime {
    Runtime::new(mock_vm::api(), imports(), RuntimeConfig::default()).unwrap()
}

/// Deploy a template and spawn an app from it
fn spawn_app(runtime: &Runtime) -> Address {
    let deployed = runtime.deploy(b"template code", &principal()).unwrap();
    let spawned = runtime
        .spawn(deployed.template_addr.as_bytes(), &principal())
        .unwrap();
    spawned.app_addr
}

fn exec_error(result: svm_ffi::Result<svm_codec::ExecReceipt>) -> VmReportedError {
    match result {
        Err(Error::Vm {
            operation: Operation::Exec,
            error,
        }) => error,
        other => panic!("expected an exec error, got {:?}", other),
    }
}

#[test]
fn test_deploy_spawn_exec() {
    let runtime = runtime();

    let deployed = runtime.deploy(b"template code", &principal()).unwrap();
    assert!(deployed.header.success);
    assert_eq!(deployed.header.tx_type, TxType::Deploy);
    assert_ne!(deployed.template_addr, principal());
    assert_eq!(deployed.gas_used, 0);

    let spawned = runtime
        .spawn(deployed.template_addr.as_bytes(), &principal())
        .unwrap();
    assert!(spawned.header.success);
    assert_eq!(spawned.returns().unwrap(), vec![Immediate::Unit]);

    let args = encode_values(&[Value::i32(3), Value::i32(4)]).unwrap();
    let receipt = runtime
        .exec(&mock_vm::exec_tx("add", &args), &spawned.app_addr)
        .unwrap();
    assert!(receipt.header.success);
    assert_eq!(receipt.header.tx_type, TxType::Exec);
    assert_eq!(receipt.returns().unwrap(), vec![Immediate::I32(7)]);
    assert_eq!(receipt.gas_used, 10);
    assert_eq!(&receipt.new_state.as_bytes()[..8], &1u64.to_be_bytes());
}

#[test]
fn test_exec_negative_and_wide_values() {
    let runtime = runtime();
    let app = spawn_app(&runtime);

    let args = encode_values(&[Value::i32(-10), Value::i32(3)]).unwrap();
    let receipt = runtime.exec(&mock_vm::exec_tx("add", &args), &app).unwrap();
    assert_eq!(receipt.returns().unwrap(), vec![Immediate::I32(-7)]);

    let args = encode_values(&[Value::i64(1 << 40)]).unwrap();
    let receipt = runtime.exec(&mock_vm::exec_tx("wide", &args), &app).unwrap();
    assert_eq!(receipt.returns().unwrap(), vec![Immediate::I64(1 << 41)]);
    assert_eq!(&receipt.new_state.as_bytes()[..8], &2u64.to_be_bytes());
}

#[test]
fn test_metered_deploy_out_of_gas() {
    let runtime = Runtime::new(mock_vm::api(), imports(), RuntimeConfig::metered(4)).unwrap();

    let err = runtime.deploy(b"too long for the limit", &principal()).unwrap_err();
    assert!(matches!(
        err,
        Error::Vm {
            operation: Operation::Deploy,
            error: VmReportedError::OutOfGas
        }
    ));
    assert_eq!(err.to_string(), "deploy failed: out of gas");

    let receipt = runtime.deploy_with(b"abc", &principal(), true, 100).unwrap();
    assert_eq!(receipt.gas_used, 3);
}

#[test]
fn test_spawn_unknown_template() {
    let runtime = runtime();
    let template_addr = Address::from_bytes(&[0x42; 20]);

    match runtime.spawn(template_addr.as_bytes(), &principal()) {
        Err(Error::Vm {
            operation: Operation::Spawn,
            error: VmReportedError::TemplateNotFound { template_addr: addr },
        }) => assert_eq!(addr, template_addr),
        other => panic!("expected template not found, got {:?}", other),
    }
}

#[test]
fn test_exec_unknown_app() {
    let runtime = runtime();
    let app = Address::from_bytes(&[0x99; 20]);
    let error = exec_error(runtime.exec(&mock_vm::exec_tx("add", &[]), &app));
    assert_eq!(error, VmReportedError::AppNotFound { app_addr: app });
}

#[test]
fn test_exec_unknown_function() {
    let runtime = runtime();
    let app = spawn_app(&runtime);
    let error = exec_error(runtime.exec(&mock_vm::exec_tx("missing", &[]), &app));
    match error {
        VmReportedError::FunctionNotFound { app_addr, func, .. } => {
            assert_eq!(app_addr, app);
            assert_eq!(func, "missing");
        }
        other => panic!("expected function not found, got {:?}", other),
    }
}

#[test]
fn test_host_error_becomes_trap() {
    let runtime = runtime();
    let app = spawn_app(&runtime);
    let error = exec_error(runtime.exec(&mock_vm::exec_tx("fail", &no_args()), &app));
    match error {
        VmReportedError::FunctionFailed { func, message, .. } => {
            assert_eq!(func, "fail");
            assert_eq!(message, "boom");
        }
        other => panic!("expected function failed, got {:?}", other),
    }
    assert_eq!(runtime.live_vm_buffers(), 0);
}

#[test]
fn test_result_type_mismatch_traps() {
    let runtime = runtime();
    let app = spawn_app(&runtime);
    let error = exec_error(runtime.exec(&mock_vm::exec_tx("mistyped", &no_args()), &app));
    match error {
        VmReportedError::FunctionFailed { message, .. } => {
            assert!(message.starts_with("result type mismatch"), "{}", message);
        }
        other => panic!("expected function failed, got {:?}", other),
    }
}

#[test]
fn test_argument_type_mismatch_traps() {
    let runtime = runtime();
    let app = spawn_app(&runtime);
    let args = encode_values(&[Value::i64(1), Value::i32(2)]).unwrap();
    let error = exec_error(runtime.exec(&mock_vm::exec_tx("add", &args), &app));
    match error {
        VmReportedError::FunctionFailed { message, .. } => {
            assert!(message.starts_with("argument type mismatch"), "{}", message);
        }
        other => panic!("expected function failed, got {:?}", other),
    }
}

#[test]
fn test_failed_receipt_is_data() {
    let runtime = runtime();
    let app = spawn_app(&runtime);
    let receipt = runtime.exec(&mock_vm::exec_tx("__abort", &[]), &app).unwrap();
    assert!(!receipt.header.success);
    assert!(receipt.return_data.is_empty());
    assert_eq!(receipt.gas_used, 0);
}

#[test]
fn test_validate() {
    let runtime = runtime();
    runtime.validate(TxType::Deploy, b"code").unwrap();

    match runtime.validate(TxType::Exec, &[]) {
        Err(Error::Vm {
            operation: Operation::Validate,
            error: VmReportedError::Other { message },
        }) => assert_eq!(message, "empty transaction"),
        other => panic!("expected a validation error, got {:?}", other),
    }
}

#[test]
fn test_import_rejected_by_vm() {
    let mut builder = ImportsBuilder::new();
    builder.register_function("reject", &[], &[], |_| Ok(vec![])).unwrap();

    match Runtime::new(mock_vm::api(), builder, RuntimeConfig::default()) {
        Err(Error::Import(message)) => assert!(message.contains("reserved"), "{}", message),
        other => panic!("expected an import error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(mock_vm::bad_frees(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    let result = Runtime::new(mock_vm::api(), imports(), RuntimeConfig::metered(0));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "gas_metering = true").unwrap();
    writeln!(file, "gas_limit = 1000").unwrap();
    writeln!(file, "import_namespace = \"env\"").unwrap();

    let config = RuntimeConfig::load(file.path()).unwrap();
    let runtime = Runtime::new(mock_vm::api(), imports(), config).unwrap();
    assert_eq!(runtime.config().gas_limit, 1000);

    let registered = unsafe { mock_vm::registered(runtime.imports().as_ptr()) };
    assert_eq!(registered.len(), 4);
    let (namespace, name, params, returns) = &registered[0];
    assert_eq!(namespace, "env");
    assert_eq!(name, "add");
    assert_eq!(params, &[0, 0]);
    assert_eq!(returns, &[0]);

    let deployed = runtime.deploy(b"code", &principal()).unwrap();
    assert_eq!(deployed.gas_used, 4);
}

#[test]
fn test_builder_namespace_overrides_config() {
    let builder = imports().namespace("custom");
    let runtime = Runtime::new(mock_vm::api(), builder, RuntimeConfig::default()).unwrap();
    assert!(runtime
        .imports()
        .functions()
        .iter()
        .all(|f| f.namespace == "custom"));
}

#[test]
fn test_no_buffers_leak() {
    let runtime = runtime();
    let app = spawn_app(&runtime);
    let args = encode_values(&[Value::i32(1), Value::i32(2)]).unwrap();

    for _ in 0..10 {
        runtime.exec(&mock_vm::exec_tx("add", &args), &app).unwrap();
        let _ = runtime.exec(&mock_vm::exec_tx("fail", &no_args()), &app);
        let _ = runtime.validate(TxType::Exec, &[]);
    }

    assert_eq!(runtime.live_vm_buffers(), 0);
    assert_eq!(mock_vm::bad_frees(), 0);
}

#[test]
fn test_panicking_import_becomes_trap() {
    let mut builder = ImportsBuilder::new();
    builder
        .register_function("explode", &[], &[], |_| panic!("kaboom"))
        .unwrap();
    builder
        .register_function("explode_owned", &[], &[], |_| {
            panic!("{} kaboom", "formatted")
        })
        .unwrap();
    let runtime = Runtime::new(mock_vm::api(), builder, RuntimeConfig::default()).unwrap();
    let app = spawn_app(&runtime);

    let error = exec_error(runtime.exec(&mock_vm::exec_tx("explode", &no_args()), &app));
    match error {
        VmReportedError::FunctionFailed { func, message, .. } => {
            assert_eq!(func, "explode");
            assert_eq!(message, "host function panicked: kaboom");
        }
        other => panic!("expected function failed, got {:?}", other),
    }

    let error = exec_error(runtime.exec(&mock_vm::exec_tx("explode_owned", &no_args()), &app));
    match error {
        VmReportedError::FunctionFailed { message, .. } => {
            assert_eq!(message, "host function panicked: formatted kaboom");
        }
        other => panic!("expected function failed, got {:?}", other),
    }

    // The runtime keeps working after a trapped panic
    assert_eq!(runtime.live_vm_buffers(), 0);
    assert_eq!(mock_vm::bad_frees(), 0);
    runtime.validate(TxType::Deploy, b"code").unwrap();
}
