//! Change notification fan-out
//!
//! Every successful mutation publishes one `{resource, status, action}`
//! event to all live subscribers. Delivery is best-effort: a full or
//! disconnected subscriber is logged and skipped, and never affects other
//! subscribers or the mutation that triggered the event. Nothing is queued
//! or replayed; subscribers only see mutations that commit after they
//! connect.

use crate::resources::ResourceName;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-subscriber channel capacity. A subscriber that falls this far behind
/// starts losing events, which the delivery contract allows.
const SUBSCRIBER_BUFFER: usize = 100;

/// The kind of mutation that occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Save,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Save => write!(f, "save"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// A mutation event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub resource: String,
    pub status: bool,
    pub action: Action,
}

/// Messages pushed to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// Sent once, immediately after subscribing
    Welcome,
    /// A committed mutation
    Change(ChangeEvent),
}

/// Handle identifying a live subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The live subscriber set and publish fan-out
#[derive(Default)]
pub struct UpdateBus {
    subscribers: DashMap<SubscriberId, mpsc::Sender<BusMessage>>,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. The welcome event is already queued on
    /// the returned receiver.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = SubscriberId(Uuid::new_v4());

        // The channel was just created with a free slot, so this cannot fail.
        let _ = tx.try_send(BusMessage::Welcome);

        self.subscribers.insert(id, tx);
        info!(subscriber = %id, total = self.subscribers.len(), "subscriber connected");
        (id, rx)
    }

    /// Drop a subscriber. Idempotent; also invoked lazily by `publish` when
    /// a send hits a closed channel.
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscriber = %id, "subscriber removed");
        }
    }

    /// Broadcast a mutation event to every live subscriber
    pub fn publish(&self, resource: &ResourceName, action: Action) {
        let event = ChangeEvent {
            resource: resource.as_str().to_string(),
            status: true,
            action,
        };

        debug!(
            resource = %resource,
            action = %action,
            subscribers = self.subscribers.len(),
            "publishing change event"
        );

        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(BusMessage::Change(event.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Slow subscriber; the event is dropped for it alone.
                    debug!(subscriber = %entry.key(), "subscriber buffer full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    closed.push(*entry.key());
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Removes the subscriber from the bus when its transport closes
pub struct SubscriberGuard {
    bus: Arc<UpdateBus>,
    id: SubscriberId,
}

impl SubscriberGuard {
    pub fn new(bus: Arc<UpdateBus>, id: SubscriberId) -> Self {
        Self { bus, id }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todos() -> ResourceName {
        ResourceName::parse("todos").unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_gets_welcome_then_events() {
        let bus = UpdateBus::new();
        let (_id, mut rx) = bus.subscribe();

        assert_eq!(rx.recv().await.unwrap(), BusMessage::Welcome);

        bus.publish(&todos(), Action::Save);
        let msg = rx.recv().await.unwrap();
        assert_eq!(
            msg,
            BusMessage::Change(ChangeEvent {
                resource: "todos".to_string(),
                status: true,
                action: Action::Save,
            })
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_prior_events() {
        let bus = UpdateBus::new();
        let (_a, mut rx_a) = bus.subscribe();
        assert_eq!(rx_a.recv().await.unwrap(), BusMessage::Welcome);

        bus.publish(&todos(), Action::Save);

        let (_b, mut rx_b) = bus.subscribe();
        assert_eq!(rx_b.recv().await.unwrap(), BusMessage::Welcome);

        // A sees the event, B only has the welcome
        assert!(matches!(
            rx_a.recv().await.unwrap(),
            BusMessage::Change(_)
        ));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriber_does_not_affect_others() {
        let bus = UpdateBus::new();
        let (_a, rx_a) = bus.subscribe();
        let (_b, mut rx_b) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx_a);
        bus.publish(&todos(), Action::Delete);

        // B still receives; A is pruned lazily
        assert_eq!(rx_b.recv().await.unwrap(), BusMessage::Welcome);
        assert!(matches!(
            rx_b.recv().await.unwrap(),
            BusMessage::Change(ChangeEvent {
                action: Action::Delete,
                ..
            })
        ));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_guard_unsubscribes_on_drop() {
        let bus = Arc::new(UpdateBus::new());
        let (id, _rx) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(SubscriberGuard::new(bus.clone(), id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ChangeEvent {
            resource: "todos".to_string(),
            status: true,
            action: Action::Save,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"resource": "todos", "status": true, "action": "save"})
        );
    }
}
