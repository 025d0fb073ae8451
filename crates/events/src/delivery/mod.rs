//! External delivery channels for admitted alerts.
//!
//! Each channel implements [`AlertChannel`]. Delivery is best-effort: the
//! [`FanoutSink`](crate::sink::FanoutSink) logs a [`DeliveryError`] and moves
//! on, it never retries or queues.

pub mod local;
pub mod report;

use async_trait::async_trait;
use geoguard_core::AlertEvent;

/// Error type for delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Report endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// A platform-side channel (notification centre, vibrator) refused.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

impl DeliveryError {
    /// Whether this is a transport failure (network or server side).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_) | Self::HttpStatus(_))
    }
}

/// A destination for admitted alerts: local notification, haptics, remote
/// reporting, ...
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError>;
}
