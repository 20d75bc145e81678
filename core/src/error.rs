//! file: core/src/error.rs
//! description: error taxonomy for the plugin host.
//!
//! Every fallible operation in the crate returns `PluginError`. Each variant
//! carries a severity `Level` and the component that raised it so the CLI
//! (and embedding hosts) can render uniform reports.

use std::fmt;
use std::path::PathBuf;

use crate::ledger::BufferId;

pub type Result<T> = std::result::Result<T, PluginError>;

/// Severity attached to every error; picks the report prefix and the CLI
/// styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level_str = match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        };
        write!(f, "{}", level_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("library path does not exist or is not a file: {}", .path.display())]
    LibraryNotFound { path: PathBuf },

    #[error("failed to load library {}: {source}.{hint}", .path.display())]
    LibraryLoad {
        path: PathBuf,
        source: libloading::Error,
        hint: String,
    },

    #[error("{origin} does not export the required symbol(s): {}", .missing.join(", "))]
    IncompleteAbi {
        origin: String,
        missing: Vec<&'static str>,
    },

    #[error("plugin_name in {origin} returned an unusable name: {reason}")]
    InvalidPluginName { origin: String, reason: String },

    #[error("a plugin named '{name}' is already registered")]
    DuplicatePlugin { name: String },

    #[error("unknown plugin '{name}'")]
    PluginNotFound { name: String },

    #[error("invalid {what}: {reason}")]
    InvalidArgument { what: &'static str, reason: String },

    #[error("plugin '{plugin}' failed to run '{function}': {reason}")]
    CallFailed {
        plugin: String,
        function: String,
        reason: String,
    },

    #[error("plugin '{plugin}' could not allocate a response for '{function}'")]
    AllocationFailed { plugin: String, function: String },

    #[error("plugin '{plugin}' returned an undecodable response: {reason}")]
    InvalidResponse { plugin: String, reason: String },

    #[error("buffer {id} is unknown or was already released")]
    DoubleFreeOrUnknownBuffer { id: BufferId },

    #[error(
        "plugin '{name}' is still in use ({in_flight} call(s) in flight, {outstanding} buffer(s) outstanding)"
    )]
    PluginInUse {
        name: String,
        in_flight: usize,
        outstanding: usize,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn level(&self) -> Level {
        match self {
            PluginError::DoubleFreeOrUnknownBuffer { .. } => Level::Critical,
            PluginError::PluginInUse { .. } | PluginError::DuplicatePlugin { .. } => Level::Warning,
            _ => Level::Error,
        }
    }

    /// Component that raised the error.
    pub fn issuer(&self) -> &'static str {
        match self {
            PluginError::LibraryNotFound { .. }
            | PluginError::LibraryLoad { .. }
            | PluginError::IncompleteAbi { .. }
            | PluginError::InvalidPluginName { .. } => "abi",
            PluginError::DuplicatePlugin { .. }
            | PluginError::PluginNotFound { .. }
            | PluginError::PluginInUse { .. } => "registry",
            PluginError::InvalidArgument { .. }
            | PluginError::CallFailed { .. }
            | PluginError::AllocationFailed { .. }
            | PluginError::InvalidResponse { .. } => "gateway",
            PluginError::DoubleFreeOrUnknownBuffer { .. } => "ledger",
            PluginError::Config(_) | PluginError::ConfigParse(_) | PluginError::Io(_) => "config",
        }
    }
}

pub fn generate_error_report(error: &PluginError) -> String {
    format!("INPROC | {} | {} | {}", error.level(), error.issuer(), error)
}
