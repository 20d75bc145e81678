//! file: core/src/registry.rs
//! description: runtime plugin registry.
//!
//! The registry owns every loaded plugin: its library, validated entry
//! points, scheduling policy and in-flight counter. It is an explicit
//! instance created by the host and shared by reference; there is no
//! process-wide table.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use chrono::{DateTime, Utc};
use libloading::Library;
use log::{info, warn};

use crate::abi::{EntryPoints, arch_mismatch_hint};
use crate::config::{CallPolicy, DuplicatePolicy, HostConfig, LoadOptions};
use crate::error::{PluginError, Result};
use crate::ledger::{Ledger, PluginId};

pub struct PluginHandle {
    id: PluginId,
    name: String,
    origin: String,
    entry: EntryPoints,
    call_policy: CallPolicy,
    call_lock: Mutex<()>,
    in_flight: AtomicUsize,
    loaded_at: DateTime<Utc>,
    ledger: Arc<Ledger>,
    library: Option<Library>,
}

impl PluginHandle {
    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Library path, or the label given to `register_static`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn call_policy(&self) -> CallPolicy {
        self.call_policy
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Buffers from this plugin not yet released.
    pub fn outstanding(&self) -> usize {
        self.ledger.outstanding_for(self.id)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    pub(crate) fn entry_points(&self) -> &EntryPoints {
        &self.entry
    }

    /// Held for the duration of a call when the plugin is not reentrant.
    pub(crate) fn serialize_call(&self) -> Option<MutexGuard<'_, ()>> {
        match self.call_policy {
            CallPolicy::Serialized => {
                Some(self.call_lock.lock().unwrap_or_else(PoisonError::into_inner))
            }
            CallPolicy::Concurrent => None,
        }
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        let Some(library) = self.library.take() else {
            return;
        };
        let outstanding = self.outstanding();
        if outstanding > 0 {
            // Unmapping would leave those buffers (and their free routine)
            // dangling; keep the code mapped for the life of the process.
            warn!(
                "leaking library {} for plugin '{}': {} buffer(s) still outstanding",
                self.origin, self.name, outstanding
            );
            std::mem::forget(library);
        } else {
            drop(library);
        }
    }
}

/// Marks one call as in flight until dropped.
pub(crate) struct InFlight {
    handle: Arc<PluginHandle>,
}

impl InFlight {
    pub(crate) fn handle(&self) -> &PluginHandle {
        &self.handle
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.handle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Registry {
    plugins: RwLock<HashMap<String, Arc<PluginHandle>>>,
    ledger: Arc<Ledger>,
    duplicate_policy: DuplicatePolicy,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(Ledger::new()), DuplicatePolicy::default())
    }

    /// Build a registry with the policies from `config`. Plugins listed in
    /// the config are not loaded; see `load_configured`.
    pub fn with_config(config: &HostConfig) -> Self {
        let ledger = Ledger::with_policy(config.violation_policy.unwrap_or_default());
        Self::with_ledger(Arc::new(ledger), config.duplicate_policy)
    }

    pub fn with_ledger(ledger: Arc<Ledger>, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            plugins: RwLock::new(HashMap::new()),
            ledger,
            duplicate_policy,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        self.load_with(path, LoadOptions::default())
    }

    /// Load a shared library, check its ABI and register it under the name
    /// it reports.
    pub fn load_with<P: AsRef<Path>>(&self, path: P, options: LoadOptions) -> Result<String> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PluginError::LibraryNotFound {
                path: path.to_path_buf(),
            });
        }
        let origin = path.display().to_string();

        // SAFETY: loading runs the library's initializers; the host accepts
        // that by asking for the load.
        let library = unsafe { Library::new(path) }.map_err(|source| PluginError::LibraryLoad {
            path: path.to_path_buf(),
            source,
            hint: arch_mismatch_hint(path),
        })?;
        // SAFETY: the three symbols are resolved with the ABI signatures.
        let entry = unsafe { EntryPoints::resolve(&library, &origin) }?;

        self.insert(entry, origin, Some(library), options)
    }

    /// Register entry points linked into the host itself.
    pub fn register_static(
        &self,
        entry: EntryPoints,
        origin: &str,
        options: LoadOptions,
    ) -> Result<String> {
        self.insert(entry, origin.to_string(), None, options)
    }

    fn insert(
        &self,
        entry: EntryPoints,
        origin: String,
        library: Option<Library>,
        options: LoadOptions,
    ) -> Result<String> {
        let name = entry.read_name(&origin)?;
        let handle = Arc::new(PluginHandle {
            id: PluginId::next(),
            name: name.clone(),
            origin,
            entry,
            call_policy: options.call_policy,
            call_lock: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            loaded_at: Utc::now(),
            ledger: Arc::clone(&self.ledger),
            library,
        });

        let mut plugins = self.write();
        if let Some(existing) = plugins.get(&name) {
            match self.duplicate_policy {
                DuplicatePolicy::Reject => return Err(PluginError::DuplicatePlugin { name }),
                DuplicatePolicy::Replace => {
                    ensure_idle(existing)?;
                    info!(
                        "replacing plugin '{}' from {} with {}",
                        name, existing.origin, handle.origin
                    );
                }
            }
        }
        info!(
            "registered plugin '{}' ({}) from {} [{:?}]",
            name, handle.id, handle.origin, handle.call_policy
        );
        let replaced = plugins.insert(name.clone(), handle);
        drop(plugins);
        drop(replaced);
        Ok(name)
    }

    /// Remove a plugin. Refused while calls are in flight or any of its
    /// buffers are outstanding.
    pub fn unload(&self, name: &str) -> Result<()> {
        let mut plugins = self.write();
        let handle = plugins.get(name).ok_or_else(|| PluginError::PluginNotFound {
            name: name.to_string(),
        })?;
        ensure_idle(handle)?;
        let removed = plugins.remove(name);
        drop(plugins);
        if let Some(handle) = &removed {
            info!("unloaded plugin '{}' ({})", handle.name, handle.id);
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<PluginHandle>> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::PluginNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Load every plugin listed in `config`. Failures are logged and
    /// returned in order; loading continues past them.
    pub fn load_configured(&self, config: &HostConfig) -> Vec<Result<String>> {
        config
            .plugins
            .iter()
            .map(|plugin| {
                let res = self.load_with(&plugin.path, plugin.load_options());
                if let Err(e) = &res {
                    warn!("configured load failed for {}: {}", plugin.path.display(), e);
                }
                res
            })
            .collect()
    }

    /// Unload every idle plugin; returns the ones still in use.
    pub fn shutdown(&self) -> Vec<(String, PluginError)> {
        let mut busy = Vec::new();
        for name in self.keys() {
            if let Err(e) = self.unload(&name) {
                warn!("shutdown: {}", e);
                busy.push((name, e));
            }
        }
        busy
    }

    /// Look up a plugin and count a call against it. The counter is raised
    /// under the read lock so `unload` cannot slip in between.
    pub(crate) fn begin_call(&self, name: &str) -> Result<InFlight> {
        let plugins = self.read();
        let handle = plugins
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::PluginNotFound {
                name: name.to_string(),
            })?;
        handle.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(InFlight { handle })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<PluginHandle>>> {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<PluginHandle>>> {
        self.plugins.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_idle(handle: &PluginHandle) -> Result<()> {
    let in_flight = handle.in_flight();
    let outstanding = handle.outstanding();
    if in_flight > 0 || outstanding > 0 {
        return Err(PluginError::PluginInUse {
            name: handle.name.clone(),
            in_flight,
            outstanding,
        });
    }
    Ok(())
}
