//! Vnode hash ring
//!
//! Maps users to virtual nodes and virtual nodes to owning instances.
//! The user→vnode mapping is pure and stable: the first 32 bits of the MD5
//! digest of the user id, reduced mod the fixed vnode count. Changing the
//! digest invalidates every cached user→instance mapping in flight, so the
//! function is pinned.
//!
//! Ownership reads are hot (every connection, every routing query) while
//! writes only happen on ownership changes, so the owner map sits behind a
//! read-mostly lock.

use md5::{Digest, Md5};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Default number of virtual nodes in the ring.
pub const DEFAULT_VNODE_COUNT: u32 = 1024;

/// Fixed-size hash ring: user → vnode → owning instance.
#[derive(Debug)]
pub struct HashRing {
    /// Number of vnodes; fixed at construction.
    vnode_count: u32,
    /// vnode id → owning instance id
    owners: RwLock<HashMap<u32, String>>,
}

impl HashRing {
    /// Create an empty ring with the given vnode count.
    pub fn new(vnode_count: u32) -> Self {
        assert!(vnode_count > 0, "vnode count must be positive");
        Self {
            vnode_count,
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// The fixed vnode count of this ring.
    pub fn vnode_count(&self) -> u32 {
        self.vnode_count
    }

    /// Map a user id to its vnode.
    ///
    /// First 32 bits (big-endian) of the MD5 digest of the UTF-8 bytes,
    /// mod the vnode count. Deterministic across processes and restarts.
    pub fn user_vnode(&self, user_id: &str) -> u32 {
        Self::digest32(user_id) % self.vnode_count
    }

    /// The raw 32-bit digest prefix, before reduction.
    fn digest32(user_id: &str) -> u32 {
        let digest = Md5::digest(user_id.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Current owner of a vnode, if any.
    pub fn owner_of_vnode(&self, vnode: u32) -> Option<String> {
        self.owners.read().get(&vnode).cloned()
    }

    /// Merge a batch of authoritative ownership entries into the ring.
    ///
    /// A merge, not a replace: entries absent from `mappings` are left
    /// untouched.
    pub fn update_mappings(&self, mappings: &HashMap<u32, String>) {
        if mappings.is_empty() {
            return;
        }
        let mut owners = self.owners.write();
        for (vnode, instance) in mappings {
            owners.insert(*vnode, instance.clone());
        }
    }

    /// Withdraw ownership for a set of vnodes.
    pub fn remove_mappings(&self, vnodes: &[u32]) {
        if vnodes.is_empty() {
            return;
        }
        let mut owners = self.owners.write();
        for vnode in vnodes {
            owners.remove(vnode);
        }
    }

    /// Replace the entire ownership view with an authoritative snapshot.
    pub fn replace_all(&self, mappings: HashMap<u32, String>) {
        *self.owners.write() = mappings;
    }

    /// Snapshot of the current ownership map, for cache serving.
    pub fn snapshot(&self) -> HashMap<u32, String> {
        self.owners.read().clone()
    }

    /// Vnodes currently owned by the given instance.
    pub fn vnodes_of(&self, instance_id: &str) -> Vec<u32> {
        let mut vnodes: Vec<u32> = self
            .owners
            .read()
            .iter()
            .filter(|(_, owner)| owner.as_str() == instance_id)
            .map(|(vnode, _)| *vnode)
            .collect();
        vnodes.sort_unstable();
        vnodes
    }
}
