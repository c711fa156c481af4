//! Presence node
//!
//! Holds the long-lived client sessions for the vnodes this instance owns.
//! The node is authoritative for its own vnodes: its `online` view is fed by
//! local connects/disconnects and by bus events published for those vnodes
//! elsewhere in the fleet. Heartbeats refresh the ownership lease and load
//! counters in the directory; absence past the TTL means the fleet presumes
//! this node dead.
//!
//! Shared state is two hot maps behind a single mutex: the session registry
//! and the per-vnode online sets. Mutations are cheap inserts/removes on
//! connect, disconnect, and each consumed bus event.

pub mod protocol;
mod session;

pub use session::build_router;

use crate::auth::TokenValidator;
use crate::bus::{EventBus, PresenceAction, PresenceEvent};
use crate::clock::MonotonicClock;
use crate::directory::Directory;
use crate::ring::HashRing;
use crate::{Error, Result};
use parking_lot::Mutex;
use protocol::ServerFrame;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Presence node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Unique instance id; also the bus consumer group.
    pub node_id: String,
    /// Vnodes this node owns for its lifetime.
    pub assigned_vnodes: Vec<u32>,
    /// Ring size; must match the coordinator's.
    pub vnode_count: u32,
    /// Ownership/load lease refresh cadence.
    pub heartbeat_interval: Duration,
    /// Transport liveness ping cadence per connection.
    pub ping_interval: Duration,
    /// TTL written with each lease refresh; at least twice the heartbeat.
    pub owner_ttl: Duration,
    /// Remote online entries older than this with no local session are
    /// evicted by the scrub, bounding staleness after lost offline events.
    pub stale_after: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            assigned_vnodes: Vec::new(),
            vnode_count: crate::ring::DEFAULT_VNODE_COUNT,
            heartbeat_interval: Duration::from_secs(30),
            ping_interval: Duration::from_secs(30),
            owner_ttl: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Commands delivered to a session task through its outbox.
#[derive(Debug)]
pub enum SessionCommand {
    Frame(ServerFrame),
    Close { code: u16, reason: &'static str },
}

/// Handle to one live session.
struct SessionHandle {
    session_id: u64,
    outbox: mpsc::UnboundedSender<SessionCommand>,
}

/// The two hot maps, guarded together.
#[derive(Default)]
struct NodeState {
    /// user id → live local session
    clients: HashMap<String, SessionHandle>,
    /// vnode → user id → last-seen unix millis (local clock)
    online: HashMap<u32, HashMap<String, i64>>,
}

/// A presence node instance.
pub struct PresenceNode {
    config: NodeConfig,
    assigned: HashSet<u32>,
    ring: HashRing,
    directory: Arc<dyn Directory>,
    bus: Arc<dyn EventBus>,
    validator: TokenValidator,
    clock: MonotonicClock,
    state: Mutex<NodeState>,
    next_session_id: AtomicU64,
    ready: AtomicBool,
}

impl PresenceNode {
    /// Build a node, failing fast on configuration that would violate the
    /// ownership invariants at runtime.
    pub fn new(
        config: NodeConfig,
        directory: Arc<dyn Directory>,
        bus: Arc<dyn EventBus>,
        validator: TokenValidator,
    ) -> Result<Self> {
        if config.node_id.is_empty() {
            return Err(Error::Config("node id must not be empty".to_string()));
        }
        if config.assigned_vnodes.is_empty() {
            return Err(Error::Config(
                "at least one assigned vnode is required".to_string(),
            ));
        }
        let assigned: HashSet<u32> = config.assigned_vnodes.iter().copied().collect();
        if let Some(bad) = assigned.iter().find(|v| **v >= config.vnode_count) {
            return Err(Error::Config(format!(
                "assigned vnode {} outside ring of size {}",
                bad, config.vnode_count
            )));
        }

        // Every owned vnode gets an online set up front so heartbeats
        // publish zero loads for idle vnodes.
        let online = assigned.iter().map(|v| (*v, HashMap::new())).collect();

        Ok(Self {
            ring: HashRing::new(config.vnode_count),
            assigned,
            directory,
            bus,
            validator,
            clock: MonotonicClock::new(),
            state: Mutex::new(NodeState {
                clients: HashMap::new(),
                online,
            }),
            next_session_id: AtomicU64::new(1),
            ready: AtomicBool::new(false),
            config,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// True once the initial lease heartbeat has been written.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    pub(crate) fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Vnode for a user under this ring size.
    pub fn user_vnode(&self, user_id: &str) -> u32 {
        self.ring.user_vnode(user_id)
    }

    /// Returns the user's vnode if this node owns it.
    pub fn owns_user(&self, user_id: &str) -> Result<u32> {
        let vnode = self.user_vnode(user_id);
        if self.assigned.contains(&vnode) {
            Ok(vnode)
        } else {
            Err(Error::NotOwned { vnode })
        }
    }

    /// Admit a new session for `user_id`: displace any prior session, record
    /// the user online, and announce the transition on the bus.
    ///
    /// Returns the session id the caller must present on detach.
    pub async fn attach_session(
        &self,
        user_id: &str,
        outbox: mpsc::UnboundedSender<SessionCommand>,
    ) -> Result<u64> {
        let vnode = self.owns_user(user_id)?;
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now_millis();

        {
            let mut state = self.state.lock();
            if let Some(previous) = state.clients.remove(user_id) {
                debug!(user_id, "displacing previous session");
                let _ = previous.outbox.send(SessionCommand::Close {
                    code: protocol::CLOSE_GOING_AWAY,
                    reason: protocol::REASON_DISPLACED,
                });
            }
            state.clients.insert(
                user_id.to_string(),
                SessionHandle {
                    session_id,
                    outbox,
                },
            );
            state
                .online
                .entry(vnode)
                .or_default()
                .insert(user_id.to_string(), now);
        }

        info!(user_id, vnode, "session attached");
        self.publish(user_id, PresenceAction::Online).await;
        Ok(session_id)
    }

    /// Tear down a session. Idempotent: a stale or repeated detach (e.g.
    /// after displacement) is a no-op, so the newer session's state and its
    /// online record survive.
    pub async fn detach_session(&self, user_id: &str, session_id: u64) {
        let removed = {
            let mut state = self.state.lock();
            match state.clients.get(user_id) {
                Some(handle) if handle.session_id == session_id => {
                    state.clients.remove(user_id);
                    let vnode = self.ring.user_vnode(user_id);
                    if let Some(set) = state.online.get_mut(&vnode) {
                        set.remove(user_id);
                    }
                    true
                }
                _ => false,
            }
        };

        if removed {
            info!(user_id, "session detached");
            self.publish(user_id, PresenceAction::Offline).await;
        }
    }

    /// Publish a presence transition; failure is logged, never fatal — the
    /// load TTL bounds how long the fleet can stay stale.
    async fn publish(&self, user_id: &str, action: PresenceAction) {
        let event = PresenceEvent {
            user_id: user_id.to_string(),
            action,
            timestamp: self.clock.now_millis(),
            node_id: self.config.node_id.clone(),
        };
        if let Err(err) = self.bus.publish(&event).await {
            warn!(user_id, ?action, error = %err, "presence publish failed");
        }
    }

    /// Apply one bus event to the local online view.
    ///
    /// Events we published ourselves were already applied locally; events
    /// for vnodes we do not own are someone else's concern. Application is
    /// idempotent at the set level, which makes at-least-once delivery safe.
    pub async fn apply_event(&self, event: &PresenceEvent) {
        if event.node_id == self.config.node_id {
            return;
        }
        let vnode = self.ring.user_vnode(&event.user_id);
        if !self.assigned.contains(&vnode) {
            return;
        }

        let now = self.clock.now_millis();
        let forward_to = {
            let mut state = self.state.lock();
            let set = state.online.entry(vnode).or_default();
            match event.action {
                PresenceAction::Online => {
                    set.insert(event.user_id.clone(), now);
                }
                PresenceAction::Offline => {
                    set.remove(&event.user_id);
                }
            }
            state
                .clients
                .get(&event.user_id)
                .map(|handle| handle.outbox.clone())
        };

        if let Some(outbox) = forward_to {
            let _ = outbox.send(SessionCommand::Frame(ServerFrame::StatusUpdate {
                action: event.action,
                timestamp: event.timestamp,
                source_node_id: event.node_id.clone(),
            }));
        }
    }

    /// Refresh the ownership lease and load counters in the directory.
    pub async fn heartbeat(&self) -> Result<()> {
        let owners: HashMap<u32, String> = self
            .assigned
            .iter()
            .map(|vnode| (*vnode, self.config.node_id.clone()))
            .collect();
        let loads: HashMap<u32, u64> = {
            let state = self.state.lock();
            self.assigned
                .iter()
                .map(|vnode| {
                    let count = state.online.get(vnode).map(HashMap::len).unwrap_or(0);
                    (*vnode, count as u64)
                })
                .collect()
        };

        self.directory
            .put_owners(&owners, self.config.owner_ttl)
            .await?;
        self.directory
            .put_loads(&loads, self.config.owner_ttl)
            .await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Heartbeat loop; write failures are logged and the next tick retries.
    pub async fn run_heartbeat(&self) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = self.heartbeat().await {
                warn!(error = %err, "heartbeat write failed, will retry next tick");
            }
        }
    }

    /// Consume the presence topic under this node's consumer group.
    ///
    /// Returns when the bus shuts down; transient receive failures back off
    /// briefly and continue.
    pub async fn run_consumer(&self) -> Result<()> {
        let mut subscription = self.bus.subscribe(&self.config.node_id).await?;
        loop {
            match subscription.next_event().await {
                Ok(Some(event)) => self.apply_event(&event).await,
                Ok(None) => {
                    info!("presence subscription closed");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "presence consume failed, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Evict remote online entries whose last-seen stamp is older than the
    /// staleness bound and which have no live local session. Covers the case
    /// of an offline event lost on the bus.
    pub fn scrub_stale(&self) -> usize {
        let cutoff = self.clock.now_millis() - self.config.stale_after.as_millis() as i64;
        let mut evicted = 0;

        let mut state = self.state.lock();
        let NodeState { clients, online } = &mut *state;
        for set in online.values_mut() {
            set.retain(|user_id, last_seen| {
                let keep = *last_seen >= cutoff || clients.contains_key(user_id);
                if !keep {
                    evicted += 1;
                }
                keep
            });
        }
        drop(state);

        if evicted > 0 {
            info!(evicted, "scrubbed stale presence entries");
        }
        evicted
    }

    /// Scrub loop, at half the staleness bound.
    pub async fn run_scrub(&self) {
        let mut interval = tokio::time::interval(self.config.stale_after / 2);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.scrub_stale();
        }
    }

    /// Close every live session with 1001. Session tasks observe the close
    /// command, detach, and publish their offline transitions.
    pub fn close_all_sessions(&self) {
        let state = self.state.lock();
        for handle in state.clients.values() {
            let _ = handle.outbox.send(SessionCommand::Close {
                code: protocol::CLOSE_GOING_AWAY,
                reason: protocol::REASON_SHUTDOWN,
            });
        }
    }

    /// Number of live local sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Whether the user has a live local session.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.state.lock().clients.contains_key(user_id)
    }

    /// Online members of one owned vnode.
    pub fn online_users(&self, vnode: u32) -> HashSet<String> {
        self.state
            .lock()
            .online
            .get(&vnode)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Live-session count for one owned vnode, as the heartbeat reports it.
    pub fn vnode_load(&self, vnode: u32) -> u64 {
        self.state
            .lock()
            .online
            .get(&vnode)
            .map(|set| set.len() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::directory::MemoryDirectory;

    fn test_node(assigned: Vec<u32>, vnode_count: u32) -> Result<PresenceNode> {
        let config = NodeConfig {
            node_id: "node-test".to_string(),
            assigned_vnodes: assigned,
            vnode_count,
            ..Default::default()
        };
        PresenceNode::new(
            config,
            Arc::new(MemoryDirectory::new()),
            Arc::new(MemoryBus::default()),
            TokenValidator::new("test-secret"),
        )
    }

    #[test]
    fn test_rejects_vnode_outside_ring() {
        let err = match test_node(vec![0, 16], 16) {
            Ok(_) => panic!("vnode 16 is out of range"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("outside ring"));
    }

    #[test]
    fn test_rejects_empty_assignment() {
        assert!(test_node(vec![], 16).is_err());
    }

    #[test]
    fn test_owns_user_matches_assignment() {
        let node = test_node(vec![0, 1, 2], 16).unwrap();
        // Find one owned and one foreign user.
        let owned = (0..)
            .map(|i| format!("user-{}", i))
            .find(|u| node.user_vnode(u) <= 2)
            .unwrap();
        let foreign = (0..)
            .map(|i| format!("user-{}", i))
            .find(|u| node.user_vnode(u) > 2)
            .unwrap();

        assert!(node.owns_user(&owned).is_ok());
        match node.owns_user(&foreign) {
            Err(Error::NotOwned { vnode }) => assert!(vnode > 2),
            other => panic!("expected NotOwned, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_idle_vnodes_report_zero_load() {
        let node = test_node(vec![3, 4], 16).unwrap();
        assert_eq!(node.vnode_load(3), 0);
        assert_eq!(node.vnode_load(4), 0);
    }
}
