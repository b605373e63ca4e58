//! Event system for compositor lifecycle notifications
//!
//! Every registry change and load/unload transition is broadcast here so
//! admin front-ends and tests can follow the state machine.

pub mod types;

pub use types::CompositeEvent;

use tokio::sync::broadcast;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast bus for compositor events
///
/// # Example
///
/// ```no_run
/// use usb_composite::events::{CompositeEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(CompositeEvent::FunctionReleased {
///     name: "msc".to_string(),
/// });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("Received event: {:?}", event);
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<CompositeEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub fn publish(&self, event: CompositeEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to events
    ///
    /// A subscriber that falls too far behind receives a `Lagged` error.
    pub fn subscribe(&self) -> broadcast::Receiver<CompositeEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CompositeEvent::FunctionRegistered {
            name: "msc".to_string(),
            slot: 0,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CompositeEvent::FunctionRegistered { slot: 0, .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(CompositeEvent::DeviceUnloaded { functions: 2 });

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();

        assert!(matches!(event1, CompositeEvent::DeviceUnloaded { .. }));
        assert!(matches!(event2, CompositeEvent::DeviceUnloaded { .. }));
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.publish(CompositeEvent::DeviceUnloaded { functions: 0 });

        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
