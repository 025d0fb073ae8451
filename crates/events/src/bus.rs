//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the outbound `onAlertEvent` hook: every admitted
//! [`AlertEvent`] is published here after it has been written to history,
//! and screen or haptic layers subscribe independently.

use geoguard_core::AlertEvent;
use tokio::sync::broadcast;

/// Alerts buffered per listener before the slowest one starts lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast of admitted alerts to in-process listeners.
///
/// ```rust
/// use geoguard_events::bus::EventBus;
///
/// let bus = EventBus::default();
/// let _screen = bus.subscribe();
/// ```
pub struct EventBus {
    sender: broadcast::Sender<AlertEvent>,
}

impl EventBus {
    /// A listener that falls more than `capacity` alerts behind skips the
    /// oldest ones and sees `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    /// Publish `event`, returning how many listeners it reached. Zero is
    /// not an error: the history keeps its own copy.
    pub fn publish(&self, event: AlertEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use geoguard_core::{AlertKind, Coordinate, Observation};

    fn entered(zone: &str) -> AlertEvent {
        let obs = Observation::position(Coordinate::new(45.0, 5.0), Utc::now());
        AlertEvent::new(AlertKind::Entered, zone, obs, format!("Entered zone '{zone}'"))
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(entered("home").with_monitor("family")), 1);

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.kind, AlertKind::Entered);
        assert_eq!(received.subject_name, "home");
        assert_eq!(received.monitor, "family");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = entered("work");
        bus.publish(event.clone());

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.id, event.id);
        assert_eq!(e2.id, event.id);
    }

    #[test]
    fn publish_reports_listeners_reached() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(entered("orphan")), 0);

        let _screen = bus.subscribe();
        let _haptics = bus.subscribe();
        assert_eq!(bus.publish(entered("home")), 2);
    }

    #[tokio::test]
    async fn slow_listener_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for zone in ["a", "b", "c"] {
            bus.publish(entered(zone));
        }

        assert_matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        );
        assert_eq!(rx.recv().await.expect("b kept").subject_name, "b");
    }
}
