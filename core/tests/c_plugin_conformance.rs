// Loads the C example plugin, whose responses live on the C library's heap
// and must be released through its own plugin_free.

use inproc_host::{CallGateway, OwnerTag, Registry};
use serde_json::json;

fn load_c_plugin() -> (Registry, String) {
    let registry = Registry::new();
    let key = registry.load(c_inproc::LIBRARY).expect("load C example plugin");
    (registry, key)
}

#[test]
fn c_plugin_registers_under_its_reported_name() {
    let (registry, key) = load_c_plugin();
    assert_eq!(key, c_inproc::PLUGIN_NAME);
    let handle = registry.lookup(&key).unwrap();
    assert!(handle.is_dynamic());
    assert_eq!(handle.origin(), c_inproc::LIBRARY);
    drop(handle);
    registry.unload(&key).unwrap();
}

#[test]
fn add_call_is_echoed_and_released_through_plugin_free() {
    let (registry, key) = load_c_plugin();
    let gateway = CallGateway::new(&registry);
    let plugin = registry.lookup(&key).unwrap();

    let result = gateway
        .call(&key, Some("add"), Some(b"[1,2]".as_slice()))
        .unwrap();
    assert_eq!(result.owner(), OwnerTag::Plugin(plugin.id()));
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"add","args":[1,2]}"#
    );
    assert_eq!(plugin.outstanding(), 1);
    assert!(registry.unload(&key).is_err(), "outstanding buffer must pin the library");

    gateway.release(&result).unwrap();
    assert_eq!(plugin.outstanding(), 0);
    drop(plugin);
    registry.unload(&key).unwrap();
}

#[test]
fn null_function_and_args_are_normalized_by_the_plugin() {
    let (registry, key) = load_c_plugin();
    let gateway = CallGateway::new(&registry);

    let result = gateway.call(&key, None, None).unwrap();
    assert_eq!(
        gateway.response_text(&result).unwrap(),
        r#"{"result":"ok","func":"","args":null}"#
    );
    gateway.release(&result).unwrap();
    assert_eq!(registry.ledger().outstanding(), 0);
    registry.unload(&key).unwrap();
}

#[test]
fn json_calls_round_through_the_c_allocator() {
    let (registry, key) = load_c_plugin();
    let gateway = CallGateway::new(&registry);

    for i in 0..32 {
        let value = gateway
            .call_json(&key, "sum", &json!({ "terms": [i, i + 1] }))
            .unwrap();
        assert_eq!(value["result"], "ok");
        assert_eq!(value["func"], "sum");
        assert_eq!(value["args"]["terms"], json!([i, i + 1]));
    }
    assert_eq!(registry.ledger().outstanding(), 0);
    assert!(registry.shutdown().is_empty());
}
