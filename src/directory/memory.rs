//! In-memory directory for development and testing
//!
//! TTLs are tracked as deadlines and enforced lazily on read, which is
//! enough to exercise the decay semantics in tests without a reaper task.

use super::Directory;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A TTL-bounded map namespace: the whole key expires at once, matching the
/// whole-key EXPIRE semantics of the production backend.
#[derive(Debug, Default)]
struct ExpiringMap<V> {
    entries: HashMap<u32, V>,
    deadline: Option<Instant>,
}

impl<V: Clone> ExpiringMap<V> {
    fn live(&self) -> HashMap<u32, V> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => HashMap::new(),
            _ if self.deadline.is_none() => HashMap::new(),
            _ => self.entries.clone(),
        }
    }

    fn merge_refresh(&mut self, entries: &HashMap<u32, V>, ttl: Duration) {
        // A fully expired namespace starts from scratch rather than
        // resurrecting stale entries alongside the new write.
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            self.entries.clear();
        }
        for (k, v) in entries {
            self.entries.insert(*k, v.clone());
        }
        self.deadline = Some(Instant::now() + ttl);
    }
}

/// Local in-memory directory
///
/// Suitable for development, tests, and single-process demos. All three
/// namespaces live in process memory with deadline-based expiry.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    owners: RwLock<ExpiringMap<String>>,
    loads: RwLock<ExpiringMap<u64>>,
    /// user id → (instance id, entry deadline)
    users: DashMap<String, (String, Instant)>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL on the ownership namespace, if set and unexpired.
    pub fn owners_ttl_remaining(&self) -> Option<Duration> {
        self.owners
            .read()
            .deadline
            .and_then(|d| d.checked_duration_since(Instant::now()))
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get_owners(&self) -> Result<HashMap<u32, String>> {
        Ok(self.owners.read().live())
    }

    async fn put_owners(&self, entries: &HashMap<u32, String>, ttl: Duration) -> Result<()> {
        self.owners.write().merge_refresh(entries, ttl);
        Ok(())
    }

    async fn delete_owners(&self, vnodes: &[u32]) -> Result<()> {
        let mut owners = self.owners.write();
        for vnode in vnodes {
            owners.entries.remove(vnode);
        }
        Ok(())
    }

    async fn get_loads(&self) -> Result<HashMap<u32, u64>> {
        Ok(self.loads.read().live())
    }

    async fn put_loads(&self, entries: &HashMap<u32, u64>, ttl: Duration) -> Result<()> {
        self.loads.write().merge_refresh(entries, ttl);
        Ok(())
    }

    async fn get_user_instance(&self, user_id: &str) -> Result<Option<String>> {
        // Clone out of the map guard before any removal; DashMap locks are
        // not re-entrant within a shard.
        let entry = self.users.get(user_id).map(|e| e.value().clone());
        match entry {
            Some((instance, deadline)) if Instant::now() < deadline => Ok(Some(instance)),
            Some(_) => {
                self.users.remove(user_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_user_instance(
        &self,
        user_id: &str,
        instance_id: &str,
        ttl: Duration,
    ) -> Result<()> {
        self.users.insert(
            user_id.to_string(),
            (instance_id.to_string(), Instant::now() + ttl),
        );
        Ok(())
    }
}
