//! Shared directory for cross-process presence state
//!
//! The directory is the only state shared between coordinators and presence
//! nodes. Three logical namespaces, all TTL-bounded so dead owners decay:
//!
//! - `vnode:owners` — vnode id → instance id, whole-key TTL
//! - `vnode:load`   — vnode id → live session count, whole-key TTL
//! - `user:<userId>` — routing cache entry, per-key TTL
//!
//! The directory is not a coordination primitive; contention on ownership
//! writes is mediated by the coordinator.

mod memory;
mod redis;

pub use memory::MemoryDirectory;
pub use self::redis::RedisDirectory;

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Default TTL for ownership and load entries. Must be at least twice the
/// heartbeat interval so one missed heartbeat does not evict a live owner.
pub const DEFAULT_OWNER_TTL: Duration = Duration::from_secs(60);

/// Default TTL for user→instance routing cache entries.
pub const DEFAULT_USER_CACHE_TTL: Duration = Duration::from_secs(60);

/// Directory client interface
///
/// Abstracts the shared key-value backend so development and tests run
/// against an in-memory store while production uses Redis.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Snapshot of current vnode ownership.
    async fn get_owners(&self) -> Result<HashMap<u32, String>>;

    /// Merge-and-refresh ownership entries.
    ///
    /// Writes the given entries and refreshes the TTL of the whole
    /// namespace. Entries not present in `entries` must be left intact.
    async fn put_owners(&self, entries: &HashMap<u32, String>, ttl: Duration) -> Result<()>;

    /// Atomically remove ownership for a set of vnodes.
    async fn delete_owners(&self, vnodes: &[u32]) -> Result<()>;

    /// Snapshot of current per-vnode load counters.
    async fn get_loads(&self) -> Result<HashMap<u32, u64>>;

    /// Merge-and-refresh load entries, same semantics as [`put_owners`].
    ///
    /// [`put_owners`]: Directory::put_owners
    async fn put_loads(&self, entries: &HashMap<u32, u64>, ttl: Duration) -> Result<()>;

    /// Cached instance for a user, if the cache entry is still live.
    async fn get_user_instance(&self, user_id: &str) -> Result<Option<String>>;

    /// Fire-and-forget routing cache write.
    async fn put_user_instance(&self, user_id: &str, instance_id: &str, ttl: Duration)
        -> Result<()>;
}
