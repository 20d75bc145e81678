//! file: core/src/abi.rs
//! description: the three-symbol C ABI and the load-time capability check.
//!
//! A plugin is any shared library (or set of host-linked functions) that
//! provides `plugin_name`, `plugin_call_json` and `plugin_free` with the
//! signatures below. `EntryPoints` only exists once all three are present,
//! so call sites never deal with partially resolved plugins.

use std::ffi::{CStr, c_char};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use libloading::Library;

use crate::error::{PluginError, Result};

pub type PluginNameFn = unsafe extern "C" fn() -> *const c_char;
pub type PluginCallJsonFn =
    unsafe extern "C" fn(func: *const c_char, args_json: *const c_char) -> *mut c_char;
pub type PluginFreeFn = unsafe extern "C" fn(ptr: *mut c_char);

pub const NAME_SYMBOL: &str = "plugin_name";
pub const CALL_SYMBOL: &str = "plugin_call_json";
pub const FREE_SYMBOL: &str = "plugin_free";

#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    name_fn: PluginNameFn,
    call_fn: PluginCallJsonFn,
    free_fn: PluginFreeFn,
}

impl EntryPoints {
    /// Assemble entry points from individually resolved symbols.
    ///
    /// Fails with `IncompleteAbi` listing every absent symbol.
    ///
    /// # Safety
    /// Each function must honor the plugin ABI: `plugin_name` returns a
    /// NUL-terminated string or null, `plugin_call_json` accepts nullable
    /// NUL-terminated strings and returns a NUL-terminated buffer or null,
    /// and `plugin_free` releases exactly the buffers `plugin_call_json`
    /// hands out.
    pub unsafe fn from_parts(
        origin: &str,
        name_fn: Option<PluginNameFn>,
        call_fn: Option<PluginCallJsonFn>,
        free_fn: Option<PluginFreeFn>,
    ) -> Result<Self> {
        match (name_fn, call_fn, free_fn) {
            (Some(name_fn), Some(call_fn), Some(free_fn)) => Ok(Self {
                name_fn,
                call_fn,
                free_fn,
            }),
            (name_fn, call_fn, free_fn) => {
                let missing = [
                    (name_fn.is_none(), NAME_SYMBOL),
                    (call_fn.is_none(), CALL_SYMBOL),
                    (free_fn.is_none(), FREE_SYMBOL),
                ]
                .into_iter()
                .filter_map(|(absent, symbol)| absent.then_some(symbol))
                .collect();
                Err(PluginError::IncompleteAbi {
                    origin: origin.to_string(),
                    missing,
                })
            }
        }
    }

    /// Resolve the three symbols from a loaded library.
    ///
    /// # Safety
    /// The symbols, when present, must have the signatures declared in this
    /// module; `libloading` cannot verify types.
    pub unsafe fn resolve(library: &Library, origin: &str) -> Result<Self> {
        // SAFETY: the caller vouches for the symbol signatures. The copied
        // function pointers stay valid for as long as `library` is loaded,
        // which the registry guarantees by owning both together.
        unsafe {
            let name_fn = library
                .get::<PluginNameFn>(NAME_SYMBOL.as_bytes())
                .ok()
                .map(|s| *s);
            let call_fn = library
                .get::<PluginCallJsonFn>(CALL_SYMBOL.as_bytes())
                .ok()
                .map(|s| *s);
            let free_fn = library
                .get::<PluginFreeFn>(FREE_SYMBOL.as_bytes())
                .ok()
                .map(|s| *s);
            Self::from_parts(origin, name_fn, call_fn, free_fn)
        }
    }

    /// Call `plugin_name` and copy the result into host memory.
    pub fn read_name(&self, origin: &str) -> Result<String> {
        let invalid = |reason: &str| PluginError::InvalidPluginName {
            origin: origin.to_string(),
            reason: reason.to_string(),
        };
        // SAFETY: `from_parts` contract; the returned storage is only read
        // here, before any other call into the plugin.
        let raw = unsafe { (self.name_fn)() };
        if raw.is_null() {
            return Err(invalid("null pointer"));
        }
        let name = unsafe { CStr::from_ptr(raw) }
            .to_str()
            .map_err(|e| invalid(&format!("invalid UTF-8: {}", e)))?
            .trim();
        if name.is_empty() {
            return Err(invalid("empty string"));
        }
        Ok(name.to_string())
    }

    pub fn free_fn(&self) -> PluginFreeFn {
        self.free_fn
    }

    /// # Safety
    /// `func` and `args_json` must each be null or point to a live
    /// NUL-terminated string.
    pub(crate) unsafe fn call(&self, func: *const c_char, args_json: *const c_char) -> *mut c_char {
        unsafe { (self.call_fn)(func, args_json) }
    }
}

/// Suffix appended to load errors when the library was built for another
/// architecture. Empty when the format is unknown or matches the host.
pub(crate) fn arch_mismatch_hint(path: &Path) -> String {
    match guess_binary_arch(path) {
        Some(arch) if arch != std::env::consts::ARCH => format!(
            " Detected binary arch '{}', host arch '{}'.",
            arch,
            std::env::consts::ARCH
        ),
        _ => String::new(),
    }
}

/// Best-effort architecture sniffing from ELF, PE and Mach-O headers.
pub fn guess_binary_arch(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut header = [0u8; 64];
    let n = file.read(&mut header).ok()?;
    let header = &header[..n];

    if header.len() >= 20 && header.starts_with(b"\x7fELF") {
        // e_machine sits at offset 18; byte order is given by e_ident[5].
        let pair = [header[18], header[19]];
        let machine = if header[5] == 2 {
            u16::from_be_bytes(pair)
        } else {
            u16::from_le_bytes(pair)
        };
        return Some(
            match machine {
                3 => "x86",
                40 => "arm",
                62 => "x86_64",
                183 => "aarch64",
                243 => "riscv64",
                other => return Some(format!("elf-machine-{}", other)),
            }
            .to_string(),
        );
    }

    if header.len() >= 0x40 && header.starts_with(b"MZ") {
        let e_lfanew = u32::from_le_bytes([header[0x3c], header[0x3d], header[0x3e], header[0x3f]]);
        // IMAGE_FILE_HEADER.Machine follows the "PE\0\0" signature.
        file.seek(SeekFrom::Start(e_lfanew as u64 + 4)).ok()?;
        let mut machine = [0u8; 2];
        file.read_exact(&mut machine).ok()?;
        return Some(
            match u16::from_le_bytes(machine) {
                0x014c => "x86".to_string(),
                0x8664 => "x86_64".to_string(),
                0xaa64 => "aarch64".to_string(),
                other => format!("pe-0x{:x}", other),
            },
        );
    }

    if header.len() >= 8 {
        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic == 0xfeed_facf || magic == 0xfeed_face {
            let cpu = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            return Some(
                match cpu {
                    0x0100_0007 => "x86_64".to_string(),
                    0x0100_000c => "aarch64".to_string(),
                    7 => "x86".to_string(),
                    other => format!("mach-o-cpu-0x{:x}", other),
                },
            );
        }
    }

    None
}
