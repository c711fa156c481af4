//! In-process event bus for development and testing
//!
//! A tokio broadcast channel stands in for the partitioned topic. Publish
//! order is delivery order for all subscribers, which is stronger than the
//! per-user guarantee the contract requires, so consumers exercised against
//! this bus see production-legal orderings.

use super::{EventBus, EventSubscription, PresenceEvent};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// In-process broadcast bus.
#[derive(Debug)]
pub struct MemoryBus {
    sender: broadcast::Sender<PresenceEvent>,
}

impl MemoryBus {
    /// Create a bus retaining up to `capacity` undelivered events per
    /// subscriber before lag kicks in.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &PresenceEvent) -> Result<()> {
        // No subscribers is not a failure: a lone node publishing into the
        // void matches a topic with no consumers attached.
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self, _group_id: &str) -> Result<Box<dyn EventSubscription>> {
        Ok(Box::new(MemorySubscription {
            receiver: self.sender.subscribe(),
        }))
    }
}

struct MemorySubscription {
    receiver: broadcast::Receiver<PresenceEvent>,
}

#[async_trait]
impl EventSubscription for MemorySubscription {
    async fn next_event(&mut self) -> Result<Option<PresenceEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Ok(Some(event)),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "presence subscription lagged, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
