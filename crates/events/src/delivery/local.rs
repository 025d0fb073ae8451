//! Local notification channel.
//!
//! The host platform owns real notification and vibration APIs; on a
//! desktop or server build [`LogNotifier`] stands in for them by writing
//! each alert through `tracing`, at `warn` level for emergencies.

use async_trait::async_trait;
use geoguard_core::AlertEvent;

use super::{AlertChannel, DeliveryError};

/// Notification channel that writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertChannel for LogNotifier {
    fn name(&self) -> &'static str {
        "log_notifier"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        if event.kind.is_emergency() {
            tracing::warn!(
                monitor = %event.monitor,
                subject = %event.subject_name,
                kind = %event.kind,
                "ALERT: {}",
                event.message,
            );
        } else {
            tracing::info!(
                monitor = %event.monitor,
                subject = %event.subject_name,
                kind = %event.kind,
                "{}",
                event.message,
            );
        }
        Ok(())
    }
}
