//! Presence event bus
//!
//! A key-partitioned, at-least-once pub/sub channel carrying online/offline
//! transitions on the single topic `user_status_events`. Events are keyed by
//! user id so all events for one user are totally ordered; no ordering holds
//! across users. Every presence node subscribes under its own consumer group
//! (group id = instance id) so each node sees every event — the broadcast is
//! how remote-presence views stay coherent.
//!
//! Consumers must be idempotent at the set level: adding a present member or
//! removing an absent one is a no-op.

mod kafka;
mod memory;

pub use kafka::KafkaBus;
pub use memory::MemoryBus;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The single presence topic.
pub const PRESENCE_TOPIC: &str = "user_status_events";

/// An online/offline transition for one user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// The user whose presence changed; also the partitioning key.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// The transition.
    pub action: PresenceAction,
    /// Monotonic unix-millisecond timestamp at the publishing node.
    pub timestamp: i64,
    /// The publishing instance, used for self-event suppression.
    #[serde(rename = "nodeId")]
    pub node_id: String,
}

/// Presence transition kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Online,
    Offline,
}

/// Event bus publisher/subscriber interface.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event, keyed by its user id.
    async fn publish(&self, event: &PresenceEvent) -> Result<()>;

    /// Subscribe under the given consumer group. Each group receives every
    /// event published after the subscription is established.
    async fn subscribe(&self, group_id: &str) -> Result<Box<dyn EventSubscription>>;
}

/// A live subscription to the presence topic.
#[async_trait]
pub trait EventSubscription: Send {
    /// Next event, in per-user publish order. `Ok(None)` means the bus has
    /// shut down and no further events will arrive.
    async fn next_event(&mut self) -> Result<Option<PresenceEvent>>;
}
