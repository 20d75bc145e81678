pub mod abi;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod registry;

pub use abi::{EntryPoints, PluginCallJsonFn, PluginFreeFn, PluginNameFn};
pub use config::{CallPolicy, DuplicatePolicy, HostConfig, LoadOptions};
pub use error::{Level, PluginError, Result, generate_error_report};
pub use gateway::CallGateway;
pub use ledger::{BufferId, CallResult, Ledger, Owner, OwnerTag, PluginId, ViolationPolicy};
pub use registry::{PluginHandle, Registry};
