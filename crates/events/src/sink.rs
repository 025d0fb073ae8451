//! The dispatch boundary between the monitor and its side effects.
//!
//! The monitor hands every admitted [`AlertEvent`] to an [`EventSink`] and
//! does not wait on, or care about, the outcome. [`FanoutSink`] is the
//! production implementation:
//!
//! 1. append to the [`AlertHistory`] (always, before anything can fail),
//! 2. publish on the [`EventBus`] for UI / notification / haptic listeners,
//! 3. deliver to every configured [`AlertChannel`] concurrently, logging
//!    failures.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use geoguard_core::{AlertEvent, Coordinate, Timestamp};

use crate::bus::EventBus;
use crate::delivery::report::HttpReporter;
use crate::delivery::AlertChannel;
use crate::history::AlertHistory;

/// Fan-out target for admitted alerts.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver `event` everywhere it needs to go. Must not fail: errors are
    /// handled (logged) inside the sink.
    async fn dispatch(&self, event: AlertEvent);

    /// Optional position trail hook, called for valid location samples.
    async fn record_position(&self, _coordinate: Coordinate, _timestamp: Timestamp) {}
}

/// History + bus + external channels.
pub struct FanoutSink {
    history: Arc<AlertHistory>,
    bus: Arc<EventBus>,
    channels: Vec<Arc<dyn AlertChannel>>,
    trail: Option<Arc<HttpReporter>>,
}

impl FanoutSink {
    pub fn new(history: Arc<AlertHistory>, bus: Arc<EventBus>) -> Self {
        Self {
            history,
            bus,
            channels: Vec::new(),
            trail: None,
        }
    }

    /// Add an external delivery channel.
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Enable best-effort position trail reporting through `reporter`.
    pub fn with_position_trail(mut self, reporter: Arc<HttpReporter>) -> Self {
        self.trail = Some(reporter);
        self
    }

    pub fn history(&self) -> &Arc<AlertHistory> {
        &self.history
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn dispatch(&self, event: AlertEvent) {
        if let Err(e) = self.history.append(event.clone()).await {
            tracing::error!(
                event_id = %event.id,
                error = %e,
                "Failed to persist alert history entry"
            );
        }

        if self.bus.publish(event.clone()) == 0 {
            tracing::debug!(event_id = %event.id, "No in-process alert listeners");
        }

        let deliveries = self.channels.iter().map(|channel| {
            let event = &event;
            async move { (channel.name(), channel.deliver(event).await) }
        });

        for (channel, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    tracing::debug!(channel, event_id = %event.id, "Alert delivered");
                }
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        channel,
                        event_id = %event.id,
                        error = %e,
                        "Alert report failed, not retrying"
                    );
                }
                Err(e) => {
                    tracing::error!(channel, event_id = %event.id, error = %e, "Alert delivery failed");
                }
            }
        }
    }

    async fn record_position(&self, coordinate: Coordinate, timestamp: Timestamp) {
        let Some(reporter) = &self.trail else {
            return;
        };
        if let Err(e) = reporter.report_position(coordinate, timestamp).await {
            tracing::warn!(error = %e, "Position trail report failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryError;
    use chrono::Utc;
    use geoguard_core::{AlertKind, Observation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        calls: AtomicUsize,
        fail: Option<fn() -> DeliveryError>,
    }

    #[async_trait]
    impl AlertChannel for CountingChannel {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _event: &AlertEvent) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                Some(error) => Err(error()),
                None => Ok(()),
            }
        }
    }

    fn event() -> AlertEvent {
        AlertEvent::new(
            AlertKind::Left,
            "home",
            Observation::position(Coordinate::new(45.0, 5.0), Utc::now()),
            "Left zone 'home'",
        )
    }

    #[tokio::test]
    async fn dispatch_reaches_history_bus_and_channels() {
        let history = Arc::new(AlertHistory::in_memory());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let channel = Arc::new(CountingChannel {
            calls: AtomicUsize::new(0),
            fail: None,
        });

        let sink = FanoutSink::new(Arc::clone(&history), Arc::clone(&bus))
            .with_channel(channel.clone());
        let e = event();
        sink.dispatch(e.clone()).await;

        assert_eq!(history.len().await, 1);
        assert_eq!(rx.recv().await.expect("published").id, e.id);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_failure_still_records_history() {
        let history = Arc::new(AlertHistory::in_memory());
        let failing = Arc::new(CountingChannel {
            calls: AtomicUsize::new(0),
            fail: Some(|| DeliveryError::HttpStatus(500)),
        });
        let refusing = Arc::new(CountingChannel {
            calls: AtomicUsize::new(0),
            fail: Some(|| DeliveryError::Unavailable("notifications disabled".into())),
        });
        let sink = FanoutSink::new(Arc::clone(&history), Arc::new(EventBus::default()))
            .with_channel(failing.clone())
            .with_channel(refusing.clone());

        sink.dispatch(event()).await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(refusing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(history.len().await, 1);
    }

    #[tokio::test]
    async fn position_trail_is_a_no_op_when_disabled() {
        let sink = FanoutSink::new(
            Arc::new(AlertHistory::in_memory()),
            Arc::new(EventBus::default()),
        );
        sink.record_position(Coordinate::new(0.0, 0.0), Utc::now()).await;
    }
}
