//! The C example plugin.
//!
//! The build script compiles `src/plugin.c` with the target's C compiler into
//! shared libraries. The plugin allocates every response with its own
//! `malloc` and releases it with `free` inside `plugin_free`, so a host that
//! frees those buffers any other way corrupts the wrong heap. Hosts load the
//! libraries by path.

/// Name the plugin reports from `plugin_name`.
pub const PLUGIN_NAME: &str = "c_plugin_example";

/// The complete plugin.
pub const LIBRARY: &str = env!("C_INPROC_LIBRARY");

/// The same plugin built without `plugin_free`.
pub const LIBRARY_WITHOUT_FREE: &str = env!("C_INPROC_LIBRARY_WITHOUT_FREE");
