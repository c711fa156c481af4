//! Admission coordinator
//!
//! Stateless owner of the ownership write path: admits instances into the
//! vnode fabric, evicts them, and answers client routing queries. Holds a
//! local ring replica warmed from the directory and lazily refreshed on
//! routing misses. Ownership contention is serialized by running a single
//! coordinator replica; see DESIGN.md.

pub mod http;

use crate::directory::Directory;
use crate::ring::HashRing;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// `weight` is a percentage-points-of-the-ring figure: an instance with
/// weight `w` asks for `floor(V * w / 100)` vnodes (at least one).
const WEIGHT_DIVISOR: u64 = 100;

/// Where a routing answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Cache,
    Hash,
}

/// A routing decision for one user.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub instance: String,
    pub source: RouteSource,
    /// Populated only when the decision came from the hash path.
    pub vnode: Option<u32>,
}

/// The admission controller and routing oracle.
pub struct Coordinator {
    directory: Arc<dyn Directory>,
    ring: HashRing,
    owner_ttl: Duration,
    user_cache_ttl: Duration,
}

impl Coordinator {
    pub fn new(
        directory: Arc<dyn Directory>,
        vnode_count: u32,
        owner_ttl: Duration,
        user_cache_ttl: Duration,
    ) -> Self {
        Self {
            directory,
            ring: HashRing::new(vnode_count),
            owner_ttl,
            user_cache_ttl,
        }
    }

    /// Warm the local ring replica from the directory.
    pub async fn warm(&self) -> Result<()> {
        let owners = self.directory.get_owners().await?;
        info!(vnodes = owners.len(), "warmed ring from directory");
        self.ring.replace_all(owners);
        Ok(())
    }

    /// Admit an instance: assign it unowned vnodes in first-fit order.
    ///
    /// Assigns `max(1, floor(V * weight / 100))` vnodes when that many are
    /// free, whatever remains when fewer are, and fails with [`Error::RingFull`]
    /// only when none are.
    pub async fn register(&self, instance_id: &str, weight: u32) -> Result<Vec<u32>> {
        let occupied = self.directory.get_owners().await?;

        let vnode_count = self.ring.vnode_count();
        let desired =
            (u64::from(vnode_count) * u64::from(weight) / WEIGHT_DIVISOR).max(1) as usize;

        let mut chosen = Vec::with_capacity(desired);
        for vnode in 0..vnode_count {
            if chosen.len() == desired {
                break;
            }
            if !occupied.contains_key(&vnode) {
                chosen.push(vnode);
            }
        }

        if chosen.is_empty() {
            return Err(Error::RingFull);
        }
        if chosen.len() < desired {
            warn!(
                instance_id,
                desired,
                assigned = chosen.len(),
                "ring nearly full, assigning fewer vnodes than requested"
            );
        }

        let entries: HashMap<u32, String> = chosen
            .iter()
            .map(|vnode| (*vnode, instance_id.to_string()))
            .collect();
        self.directory.put_owners(&entries, self.owner_ttl).await?;
        self.ring.update_mappings(&entries);

        info!(
            instance_id,
            vnodes = chosen.len(),
            "registered instance"
        );
        Ok(chosen)
    }

    /// Evict an instance: withdraw every vnode it owns.
    pub async fn unregister(&self, instance_id: &str) -> Result<Vec<u32>> {
        let owners = self.directory.get_owners().await?;

        let mut removed: Vec<u32> = owners
            .iter()
            .filter(|(_, owner)| owner.as_str() == instance_id)
            .map(|(vnode, _)| *vnode)
            .collect();
        removed.sort_unstable();

        if removed.is_empty() {
            return Err(Error::InstanceNotFound(instance_id.to_string()));
        }

        self.directory.delete_owners(&removed).await?;
        self.ring.remove_mappings(&removed);

        info!(
            instance_id,
            vnodes = removed.len(),
            "unregistered instance"
        );
        Ok(removed)
    }

    /// Answer "which instance owns this user?".
    pub async fn route(&self, user_id: &str) -> Result<RouteDecision> {
        if let Some(instance) = self.directory.get_user_instance(user_id).await? {
            return Ok(RouteDecision {
                instance,
                source: RouteSource::Cache,
                vnode: None,
            });
        }

        let vnode = self.ring.user_vnode(user_id);
        let owner = match self.ring.owner_of_vnode(vnode) {
            Some(owner) => owner,
            None => {
                // Local replica may be stale; take a fresh snapshot and retry.
                self.ring.replace_all(self.directory.get_owners().await?);
                self.ring
                    .owner_of_vnode(vnode)
                    .ok_or(Error::OwnerNotFound(vnode))?
            }
        };

        if let Err(err) = self
            .directory
            .put_user_instance(user_id, &owner, self.user_cache_ttl)
            .await
        {
            warn!(user_id, error = %err, "routing cache write failed");
        }

        Ok(RouteDecision {
            instance: owner,
            source: RouteSource::Hash,
            vnode: Some(vnode),
        })
    }

    /// Directory snapshot of ownership and load, for operators.
    pub async fn vnode_status(&self) -> Result<(HashMap<u32, String>, HashMap<u32, u64>)> {
        let owners = self.directory.get_owners().await?;
        let loads = self.directory.get_loads().await?;
        Ok((owners, loads))
    }

    pub fn vnode_count(&self) -> u32 {
        self.ring.vnode_count()
    }
}
