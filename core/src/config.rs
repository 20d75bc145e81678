//! file: core/src/config.rs
//! description: host configuration and per-plugin load options.
//!
//! A host config is a JSON file naming the libraries to load, how calls to
//! each may be scheduled, and the registry/ledger policies. Relative plugin
//! paths are resolved against the directory containing the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, Result};
use crate::ledger::ViolationPolicy;

/// Environment variable consulted when no config path is given explicitly.
pub const CONFIG_ENV: &str = "INPROC_HOST_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "inproc.json";

/// What `load` does when a plugin name is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    /// Unload the registered plugin (if idle) and register the new one.
    Replace,
}

/// Whether the gateway may enter a plugin from several threads at once.
/// Plugins are assumed non-reentrant unless declared otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPolicy {
    #[default]
    Serialized,
    Concurrent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub call_policy: CallPolicy,
}

impl LoadOptions {
    pub fn concurrent() -> Self {
        Self {
            call_policy: CallPolicy::Concurrent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    pub function: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub path: PathBuf,
    /// Declares the plugin thread-safe.
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub calls: Vec<CallSpec>,
}

impl PluginConfig {
    pub fn load_options(&self) -> LoadOptions {
        if self.concurrent {
            LoadOptions::concurrent()
        } else {
            LoadOptions::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Unset means the build default (panic in debug, report in release).
    #[serde(default)]
    pub violation_policy: Option<ViolationPolicy>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl HostConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config: HostConfig = serde_json::from_str(&raw)?;
        if let Some(base) = path.parent() {
            for plugin in &mut config.plugins {
                if plugin.path.is_relative() {
                    plugin.path = base.join(&plugin.path);
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (i, plugin) in self.plugins.iter().enumerate() {
            if plugin.path.as_os_str().is_empty() {
                return Err(PluginError::Config(format!("plugins[{}]: path is empty", i)));
            }
            if let Some(call) = plugin.calls.iter().find(|c| c.function.trim().is_empty()) {
                return Err(PluginError::Config(format!(
                    "plugins[{}]: call with empty function name (args: {})",
                    i, call.args
                )));
            }
        }
        Ok(())
    }

    /// Pick the config file: explicit path, then `INPROC_HOST_CONFIG`, then
    /// `./inproc.json` when it exists.
    pub fn resolve_path<P: AsRef<Path>>(explicit: Option<P>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.as_ref().to_path_buf());
        }
        if let Ok(envp) = std::env::var(CONFIG_ENV) {
            if !envp.trim().is_empty() {
                return Some(PathBuf::from(envp));
            }
        }
        let local = std::env::current_dir().ok()?.join(DEFAULT_CONFIG_FILE);
        local.is_file().then_some(local)
    }
}
