//! Shared test support for the svm-ffi integration tests

#![allow(dead_code)]

pub mod mock_vm;
