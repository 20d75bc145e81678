mod common;

use std::ffi::{CStr, CString, c_char};
use std::ptr;

use inproc_host::{CallGateway, EntryPoints, LoadOptions, OwnerTag, PluginError};
use serde_json::json;

unsafe extern "C" fn failing_name() -> *const c_char {
    c"failing".as_ptr()
}

unsafe extern "C" fn failing_call(func: *const c_char, _args: *const c_char) -> *mut c_char {
    let func = if func.is_null() {
        ""
    } else {
        unsafe { CStr::from_ptr(func) }.to_str().unwrap_or("")
    };
    let resp = match func {
        "oom" => return ptr::null_mut(),
        "garbage" => "this is not json".to_string(),
        "legacy" => "{\"ok\": false, \"error\": \"compiler not found\"}".to_string(),
        _ => format!("{{\"result\":\"error\",\"error\":\"no function {}\"}}", func),
    };
    CString::new(resp).map(CString::into_raw).unwrap_or(ptr::null_mut())
}

fn registry_with_failing() -> (inproc_host::Registry, String) {
    let registry = common::reporting_registry();
    let entry = unsafe {
        EntryPoints::from_parts(
            "failing",
            Some(failing_name),
            Some(failing_call),
            Some(common::echo_free),
        )
    }
    .unwrap();
    let key = registry
        .register_static(entry, "failing", LoadOptions::default())
        .unwrap();
    (registry, key)
}

#[test]
fn add_scenario_echoes_function_and_args() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let result = gateway
        .call(&key, Some("add"), Some(b"[1,2]".as_slice()))
        .unwrap();
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"add","args":[1,2]}"#
    );
    assert_eq!(result.len(), r#"{"result":"ok","func":"add","args":[1,2]}"#.len());
    gateway.release(&result).unwrap();
    registry.unload(&key).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn null_inputs_are_normalized_by_the_plugin() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let result = gateway.call(&key, None, None).unwrap();
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"","args":null}"#
    );
    gateway.release(&result).unwrap();
}

#[test]
fn blank_payload_is_sent_as_null() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let result = gateway.call(&key, Some("f"), Some(b"  ".as_slice())).unwrap();
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"f","args":null}"#
    );
    gateway.release(&result).unwrap();
}

#[test]
fn payload_is_passed_verbatim_without_validation() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let result = gateway.call(&key, Some("raw"), Some(b"[1,".as_slice())).unwrap();
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"raw","args":[1,}"#
    );
    gateway.release(&result).unwrap();
}

#[test]
fn call_json_decodes_and_releases() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let value = gateway
        .call_json(&key, "sum", &json!({"values": [1, 2, 3]}))
        .unwrap();
    assert_eq!(
        value,
        json!({"result": "ok", "func": "sum", "args": {"values": [1, 2, 3]}})
    );
    assert_eq!(registry.ledger().outstanding(), 0);
}

#[test]
fn null_response_is_allocation_failure() {
    let (registry, key) = registry_with_failing();
    let gateway = CallGateway::new(&registry);

    let err = gateway.call(&key, Some("oom"), None).unwrap_err();
    match err {
        PluginError::AllocationFailed {
            ref plugin,
            ref function,
        } => {
            assert_eq!(plugin, "failing");
            assert_eq!(function, "oom");
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.ledger().outstanding(), 0);
    assert_eq!(registry.lookup(&key).unwrap().in_flight(), 0);
}

#[test]
fn structured_failures_become_call_failed() {
    let (registry, key) = registry_with_failing();
    let gateway = CallGateway::new(&registry);

    let err = gateway.call_json(&key, "missing", &json!(null)).unwrap_err();
    assert!(
        matches!(err, PluginError::CallFailed { ref reason, .. } if reason == "no function missing"),
        "{err}"
    );

    let err = gateway.call_json(&key, "legacy", &json!([])).unwrap_err();
    assert!(
        matches!(err, PluginError::CallFailed { ref reason, .. } if reason == "compiler not found"),
        "{err}"
    );
    assert_eq!(registry.ledger().outstanding(), 0);
}

#[test]
fn undecodable_response_is_reported_and_released() {
    let (registry, key) = registry_with_failing();
    let gateway = CallGateway::new(&registry);

    let err = gateway.call_json(&key, "garbage", &json!(1)).unwrap_err();
    assert!(matches!(err, PluginError::InvalidResponse { .. }), "{err}");
    assert!(err.to_string().contains("this is not json"));
    assert_eq!(registry.ledger().outstanding(), 0);
}

#[test]
fn raw_call_leaves_error_shaped_responses_opaque() {
    let (registry, key) = registry_with_failing();
    let gateway = CallGateway::new(&registry);

    let result = gateway.call(&key, Some("legacy"), None).unwrap();
    assert!(gateway.response_text(&result).unwrap().contains("\"ok\": false"));
    gateway.release(&result).unwrap();
}

#[test]
fn interior_nul_is_rejected_before_crossing() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let err = gateway.call(&key, Some("a\0b"), None).unwrap_err();
    assert!(
        matches!(err, PluginError::InvalidArgument { what: "function name", .. }),
        "{err}"
    );
    let err = gateway
        .call(&key, Some("f"), Some(b"[\"a\0\"]".as_slice()))
        .unwrap_err();
    assert!(matches!(err, PluginError::InvalidArgument { what: "argument payload", .. }));
    let err = gateway
        .call(&key, Some("f"), Some([0xff, 0xfe].as_slice()))
        .unwrap_err();
    assert!(matches!(err, PluginError::InvalidArgument { .. }));
    assert_eq!(registry.ledger().outstanding(), 0);
}

#[test]
fn unknown_plugin_is_not_found() {
    let (registry, _) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);
    let err = gateway.call("nope", Some("f"), None).unwrap_err();
    assert!(matches!(err, PluginError::PluginNotFound { ref name } if name == "nope"));
    assert_eq!(err.issuer(), "registry");
}

#[test]
fn detached_results_do_not_pin_the_plugin() {
    let (registry, key) = common::registry_with_echo();
    let gateway = CallGateway::new(&registry);

    let result = gateway
        .call_detached(&key, Some("add"), Some(b"[3]".as_slice()))
        .unwrap();
    assert_eq!(result.owner(), OwnerTag::Host);
    assert_eq!(registry.lookup(&key).unwrap().outstanding(), 0);

    registry.unload(&key).unwrap();
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"add","args":[3]}"#
    );
    gateway.release(&result).unwrap();
    assert_eq!(registry.ledger().outstanding(), 0);
}
