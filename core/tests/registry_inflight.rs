mod common;

use std::ffi::c_char;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use inproc_host::{CallGateway, EntryPoints, LoadOptions, PluginError};

static ENTERED: AtomicBool = AtomicBool::new(false);
static OPEN: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn gated_name() -> *const c_char {
    c"gated".as_ptr()
}

// Blocks inside the plugin until the test opens the gate.
unsafe extern "C" fn gated_call(func: *const c_char, args: *const c_char) -> *mut c_char {
    ENTERED.store(true, Ordering::SeqCst);
    while !OPEN.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(2));
    }
    unsafe { common::echo_call(func, args) }
}

fn wait_for(flag: &AtomicBool) {
    for _ in 0..5000 {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("timed out waiting for plugin call to start");
}

#[test]
fn unload_waits_for_in_flight_calls_and_their_buffers() {
    let registry = common::reporting_registry();
    let entry = unsafe {
        EntryPoints::from_parts("gated", Some(gated_name), Some(gated_call), Some(common::echo_free))
    }
    .unwrap();
    let key = registry
        .register_static(entry, "gated", LoadOptions::default())
        .unwrap();
    let gateway = CallGateway::new(&registry);

    thread::scope(|s| {
        let worker = s.spawn(|| gateway.call(&key, Some("slow"), None));

        wait_for(&ENTERED);
        assert_eq!(registry.lookup(&key).unwrap().in_flight(), 1);
        let err = registry.unload(&key).unwrap_err();
        assert!(
            matches!(err, PluginError::PluginInUse { in_flight: 1, outstanding: 0, .. }),
            "{err}"
        );

        OPEN.store(true, Ordering::SeqCst);
        let result = worker.join().unwrap().unwrap();

        // The call has returned but its buffer still pins the plugin.
        assert_eq!(registry.lookup(&key).unwrap().in_flight(), 0);
        assert!(matches!(
            registry.unload(&key),
            Err(PluginError::PluginInUse { in_flight: 0, outstanding: 1, .. })
        ));

        gateway.release(&result).unwrap();
    });

    registry.unload(&key).unwrap();
    assert!(registry.is_empty());
}
