//! file: core/src/ledger.rs
//! description: ownership ledger for buffers crossing the plugin boundary.
//!
//! Every buffer handed across the ABI is recorded here together with the
//! deallocator that must reclaim it. Plugins may link their own allocator,
//! so a plugin-owned buffer is only ever released through that plugin's
//! `plugin_free`, and a host-owned buffer only through the host allocator.
//! Releases go through `Ledger::release`, which removes the record before
//! freeing; a second release finds nothing and reports a violation instead
//! of touching memory.

use std::collections::HashMap;
use std::ffi::c_char;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::abi::PluginFreeFn;
use crate::error::{PluginError, Result};

/// Process-wide source of buffer tickets. Shared by every ledger so a
/// result from one ledger can never name a record held by another.
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide source of plugin ids, for the same reason.
static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

/// Ticket issued per acquired buffer. Never reused, so a stale id cannot
/// free a later allocation that happens to land at the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one loaded plugin instance. A plugin reloaded under the same
/// name receives a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

impl PluginId {
    pub(crate) fn next() -> Self {
        PluginId(NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin-{}", self.0)
    }
}

/// Which side's deallocator owns a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerTag {
    Plugin(PluginId),
    Host,
}

/// Owner plus the release rule bound to it.
#[derive(Debug, Clone, Copy)]
pub enum Owner {
    Plugin { id: PluginId, free: PluginFreeFn },
    Host,
}

impl Owner {
    pub fn tag(&self) -> OwnerTag {
        match self {
            Owner::Plugin { id, .. } => OwnerTag::Plugin(*id),
            Owner::Host => OwnerTag::Host,
        }
    }
}

/// What the ledger does when asked to release or read a buffer it does not
/// hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationPolicy {
    Panic,
    Report,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ViolationPolicy::Panic
        } else {
            ViolationPolicy::Report
        }
    }
}

/// A buffer returned across the boundary.
///
/// There is no destructor: the only way to free it is `Ledger::release`.
#[must_use = "a CallResult leaks its buffer and pins its plugin unless released"]
#[derive(Debug)]
pub struct CallResult {
    id: BufferId,
    ptr: NonNull<u8>,
    len: usize,
    owner: OwnerTag,
}

// SAFETY: the handle carries no thread affinity; the ledger serializes
// release, and reads go through `unsafe fn as_bytes` or the ledger.
unsafe impl Send for CallResult {}
unsafe impl Sync for CallResult {}

impl CallResult {
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Payload length in bytes, excluding any trailing NUL.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn owner(&self) -> OwnerTag {
        self.owner
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Borrow the payload without copying.
    ///
    /// # Safety
    /// The buffer must not be released while the slice is alive.
    pub unsafe fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

/// Snapshot of one outstanding buffer.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: BufferId,
    pub owner: OwnerTag,
    pub len: usize,
    pub acquired_at: DateTime<Utc>,
}

struct Record {
    ptr: NonNull<u8>,
    len: usize,
    owner: Owner,
    acquired_at: DateTime<Utc>,
}

// SAFETY: records are only touched under the ledger mutex and freed once.
unsafe impl Send for Record {}

impl Record {
    /// # Safety
    /// `ptr` must have come from the allocator bound to `owner` and must not
    /// have been freed yet.
    unsafe fn free(self) {
        match self.owner {
            Owner::Plugin { free, .. } => unsafe { free(self.ptr.as_ptr() as *mut c_char) },
            Owner::Host => unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                    self.ptr.as_ptr(),
                    self.len,
                )));
            },
        }
    }
}

pub struct Ledger {
    records: Mutex<HashMap<BufferId, Record>>,
    policy: ViolationPolicy,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::with_policy(ViolationPolicy::default())
    }

    pub fn with_policy(policy: ViolationPolicy) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> ViolationPolicy {
        self.policy
    }

    /// Record `ptr` as owned by `owner`.
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes allocated by the deallocator
    /// bound to `owner`, and must not already be recorded.
    pub unsafe fn acquire(&self, ptr: NonNull<u8>, len: usize, owner: Owner) -> CallResult {
        let id = BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            id,
            Record {
                ptr,
                len,
                owner,
                acquired_at: Utc::now(),
            },
        );
        debug!("ledger: acquired buffer {} ({} bytes, {:?})", id, len, owner.tag());
        CallResult {
            id,
            ptr,
            len,
            owner: owner.tag(),
        }
    }

    /// Move host bytes into a ledger-tracked, host-owned buffer.
    pub fn acquire_host(&self, bytes: Vec<u8>) -> CallResult {
        let len = bytes.len();
        let ptr = NonNull::from(Box::leak(bytes.into_boxed_slice())).cast::<u8>();
        // SAFETY: freshly leaked boxed slice of exactly `len` bytes.
        unsafe { self.acquire(ptr, len, Owner::Host) }
    }

    /// Free a buffer with the rule recorded for its owner.
    pub fn release(&self, result: &CallResult) -> Result<()> {
        self.release_id(result.id)
    }

    pub fn release_id(&self, id: BufferId) -> Result<()> {
        let record = self.lock().remove(&id);
        match record {
            Some(record) => {
                let owner = record.owner.tag();
                // SAFETY: the record was just removed, so this is the only
                // release of this buffer.
                unsafe { record.free() };
                debug!("ledger: released buffer {} ({:?})", id, owner);
                Ok(())
            }
            None => Err(self.violation(id)),
        }
    }

    /// Copy a recorded buffer's payload into host memory.
    pub fn read(&self, result: &CallResult) -> Result<Vec<u8>> {
        {
            let records = self.lock();
            if let Some(record) = records.get(&result.id) {
                // SAFETY: the record is held under the lock, so the buffer
                // cannot be released concurrently.
                let bytes =
                    unsafe { std::slice::from_raw_parts(record.ptr.as_ptr(), record.len) };
                return Ok(bytes.to_vec());
            }
        }
        Err(self.violation(result.id))
    }

    pub fn read_to_string(&self, result: &CallResult) -> Result<String> {
        let bytes = self.read(result)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    pub fn outstanding_for(&self, plugin: PluginId) -> usize {
        self.lock()
            .values()
            .filter(|r| r.owner.tag() == OwnerTag::Plugin(plugin))
            .count()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .lock()
            .iter()
            .map(|(id, r)| LedgerEntry {
                id: *id,
                owner: r.owner.tag(),
                len: r.len,
                acquired_at: r.acquired_at,
            })
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    fn violation(&self, id: BufferId) -> PluginError {
        let err = PluginError::DoubleFreeOrUnknownBuffer { id };
        error!("ledger violation: {}", err);
        if self.policy == ViolationPolicy::Panic {
            panic!("ownership ledger violation: {}", err);
        }
        err
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BufferId, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
