use std::ffi::{CStr, CString};
use std::os::raw::c_char;

// Example in-process plugin. Answers every call with
//   {"result":"ok","func":"<func>","args":<args_json verbatim>}
// Exports:
// - plugin_name() -> const char*
// - plugin_call_json(func, args_json) -> char* (owned by this library)
// - plugin_free(ptr)

#[no_mangle]
pub extern "C" fn plugin_name() -> *const c_char {
    static NAME: &[u8] = b"rust_inproc\0";
    NAME.as_ptr() as *const c_char
}

/// # Safety
/// `func` and `args_json` must each be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn plugin_call_json(func: *const c_char, args_json: *const c_char) -> *mut c_char {
    let func = if func.is_null() { "" } else { CStr::from_ptr(func).to_str().unwrap_or("") };
    let args = if args_json.is_null() { "null" } else { CStr::from_ptr(args_json).to_str().unwrap_or("null") };
    let resp = format!("{{\"result\":\"ok\",\"func\":\"{}\",\"args\":{}}}", func, args);
    match CString::new(resp) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// # Safety
/// `ptr` must be null or a pointer returned by `plugin_call_json` that has
/// not been freed.
#[no_mangle]
pub unsafe extern "C" fn plugin_free(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    drop(CString::from_raw(ptr));
}
