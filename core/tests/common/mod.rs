#![allow(dead_code)]

// Host-linked stand-ins for plugin libraries. `echo_*` follows the example
// plugin's contract exactly, including null normalization.

use std::ffi::{CStr, CString, c_char};
use std::ptr;

use inproc_host::{EntryPoints, LoadOptions, Registry, ViolationPolicy};
use inproc_host::{DuplicatePolicy, Ledger};
use std::sync::Arc;

pub unsafe extern "C" fn echo_name() -> *const c_char {
    c"echo_plugin".as_ptr()
}

pub unsafe extern "C" fn echo_call(func: *const c_char, args_json: *const c_char) -> *mut c_char {
    let func = if func.is_null() {
        ""
    } else {
        unsafe { CStr::from_ptr(func) }.to_str().unwrap_or("")
    };
    let args = if args_json.is_null() {
        "null"
    } else {
        unsafe { CStr::from_ptr(args_json) }.to_str().unwrap_or("null")
    };
    let resp = format!("{{\"result\":\"ok\",\"func\":\"{}\",\"args\":{}}}", func, args);
    CString::new(resp).map(CString::into_raw).unwrap_or(ptr::null_mut())
}

pub unsafe extern "C" fn echo_free(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr) });
}

pub fn echo_entry_points() -> EntryPoints {
    unsafe { EntryPoints::from_parts("echo", Some(echo_name), Some(echo_call), Some(echo_free)) }
        .expect("echo plugin exports all symbols")
}

/// Registry whose ledger reports violations instead of panicking.
pub fn reporting_registry() -> Registry {
    Registry::with_ledger(
        Arc::new(Ledger::with_policy(ViolationPolicy::Report)),
        DuplicatePolicy::Reject,
    )
}

pub fn registry_with_echo() -> (Registry, String) {
    let registry = reporting_registry();
    let key = registry
        .register_static(echo_entry_points(), "echo", LoadOptions::default())
        .expect("register echo plugin");
    (registry, key)
}
