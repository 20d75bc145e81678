//! file: core/src/gateway.rs
//! description: synchronous call gateway into registered plugins.
//!
//! `CallGateway::call` is the single cross-boundary primitive: it marshals a
//! function name and JSON argument payload into C strings, enters the
//! plugin's `plugin_call_json`, and records the returned buffer in the
//! ledger as plugin-owned before handing it back. There is no retry and no
//! timeout; a plugin that never returns blocks the calling thread.

use std::ffi::{CStr, CString, c_char};
use std::ptr::{self, NonNull};

use log::debug;
use serde_json::Value as JsonValue;

use crate::error::{PluginError, Result};
use crate::ledger::{CallResult, Owner};
use crate::registry::Registry;

#[derive(Clone, Copy)]
pub struct CallGateway<'r> {
    registry: &'r Registry,
}

impl<'r> CallGateway<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Invoke `function` on plugin `key` with a raw JSON argument payload.
    ///
    /// `None` for either input is passed to the plugin as a null pointer;
    /// plugins normalize it to `""` and `null` respectively. An empty or
    /// all-whitespace payload is treated as absent.
    pub fn call(
        &self,
        key: &str,
        function: Option<&str>,
        args: Option<&[u8]>,
    ) -> Result<CallResult> {
        let func = function
            .map(|f| to_c_string("function name", f.as_bytes()))
            .transpose()?;
        let args = args.filter(|a| !a.trim_ascii().is_empty());
        let args_json = args
            .map(|a| {
                std::str::from_utf8(a).map_err(|e| PluginError::InvalidArgument {
                    what: "argument payload",
                    reason: e.to_string(),
                })?;
                to_c_string("argument payload", a)
            })
            .transpose()?;

        let call = self.registry.begin_call(key)?;
        let plugin = call.handle();
        let _serial = plugin.serialize_call();

        debug!(
            "call {}::{} ({} arg bytes)",
            plugin.name(),
            function.unwrap_or("<null>"),
            args.map_or(0, |a| a.len())
        );
        // SAFETY: both pointers are null or borrowed from live CStrings that
        // outlive the call.
        let raw = unsafe {
            plugin.entry_points().call(
                func.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
                args_json.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
            )
        };
        let Some(out) = NonNull::new(raw) else {
            return Err(PluginError::AllocationFailed {
                plugin: plugin.name().to_string(),
                function: function.unwrap_or_default().to_string(),
            });
        };

        // SAFETY: a non-null return is a NUL-terminated buffer owned by the
        // plugin until handed to its `plugin_free`.
        let len = unsafe { CStr::from_ptr(out.as_ptr() as *const c_char) }
            .to_bytes()
            .len();
        let owner = Owner::Plugin {
            id: plugin.id(),
            free: plugin.entry_points().free_fn(),
        };
        // Registered before `call` drops, so the plugin is never observed
        // with neither an in-flight call nor an outstanding buffer.
        let result = unsafe { self.registry.ledger().acquire(out.cast::<u8>(), len, owner) };
        Ok(result)
    }

    /// Like `call`, but copies the response into a host-owned buffer and
    /// returns the plugin's buffer immediately. The result does not keep the
    /// plugin from being unloaded.
    pub fn call_detached(
        &self,
        key: &str,
        function: Option<&str>,
        args: Option<&[u8]>,
    ) -> Result<CallResult> {
        let result = self.call(key, function, args)?;
        let ledger = self.registry.ledger();
        let bytes = ledger.read(&result);
        let released = ledger.release(&result);
        let bytes = bytes?;
        released?;
        Ok(ledger.acquire_host(bytes))
    }

    /// Encode `args`, call, decode the response and release the buffer.
    ///
    /// Responses shaped `{"ok": false, "error": ...}` or
    /// `{"result": "error", "error": ...}` are reported as `CallFailed`.
    pub fn call_json(&self, key: &str, function: &str, args: &JsonValue) -> Result<JsonValue> {
        let payload = serde_json::to_vec(args).map_err(|e| PluginError::InvalidArgument {
            what: "argument payload",
            reason: e.to_string(),
        })?;
        let result = self.call(key, Some(function), Some(&payload))?;
        let ledger = self.registry.ledger();
        let bytes = ledger.read(&result);
        let released = ledger.release(&result);
        let bytes = bytes?;
        released?;

        let value: JsonValue =
            serde_json::from_slice(&bytes).map_err(|e| PluginError::InvalidResponse {
                plugin: key.to_string(),
                reason: format!("{} in {}", e, String::from_utf8_lossy(&bytes)),
            })?;
        if let Some(reason) = reported_failure(&value) {
            return Err(PluginError::CallFailed {
                plugin: key.to_string(),
                function: function.to_string(),
                reason,
            });
        }
        Ok(value)
    }

    pub fn release(&self, result: &CallResult) -> Result<()> {
        self.registry.ledger().release(result)
    }

    /// Copy of the response text; the buffer stays outstanding.
    pub fn response_text(&self, result: &CallResult) -> Result<String> {
        self.registry.ledger().read_to_string(result)
    }
}

fn to_c_string(what: &'static str, bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| PluginError::InvalidArgument {
        what,
        reason: e.to_string(),
    })
}

fn reported_failure(value: &JsonValue) -> Option<String> {
    let map = value.as_object()?;
    let failed = map.get("ok").and_then(JsonValue::as_bool) == Some(false)
        || map.get("result").and_then(JsonValue::as_str) == Some("error");
    if !failed {
        return None;
    }
    Some(match map.get("error") {
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => value.to_string(),
    })
}
