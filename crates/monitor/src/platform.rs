//! Seams to the host platform.
//!
//! The monitor never talks to a location service, sensor or permission
//! dialog directly. It consumes these traits, which the mobile shell (or a
//! test) implements.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use geoguard_core::{Observation, SamplingConfig, Timestamp};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a platform call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The user withdrew a permission the call depends on.
    #[error("Permission revoked")]
    PermissionRevoked,

    /// The call did not complete within the configured bound.
    #[error("Platform call timed out after {0:?}")]
    TimedOut(Duration),

    /// Any other platform-side failure.
    #[error("Platform call failed: {0}")]
    Failed(String),
}

/// Await `fut`, turning an overrun of `limit` into [`PlatformError::TimedOut`].
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, PlatformError>
where
    F: Future<Output = Result<T, PlatformError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(PlatformError::TimedOut(limit)))
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Outcome of a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request_foreground(&self) -> Result<PermissionStatus, PlatformError>;
    async fn request_background(&self) -> Result<PermissionStatus, PlatformError>;
}

/// Fixed answers, for hosts without a permission model (desktop daemon).
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    pub foreground: PermissionStatus,
    pub background: PermissionStatus,
}

impl StaticPermissions {
    pub fn granted() -> Self {
        Self {
            foreground: PermissionStatus::Granted,
            background: PermissionStatus::Granted,
        }
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissions {
    async fn request_foreground(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(self.foreground)
    }

    async fn request_background(&self) -> Result<PermissionStatus, PlatformError> {
        Ok(self.background)
    }
}

// ---------------------------------------------------------------------------
// Sample source
// ---------------------------------------------------------------------------

/// Opaque identifier of a platform subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Periodic producer of observations (location fixes or sensor magnitudes).
///
/// Observations are pushed into the `mpsc::Sender` handed to
/// [`subscribe`](SampleSource::subscribe); the platform drops the sender
/// when it tears the subscription down.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn subscribe(
        &self,
        config: SamplingConfig,
        sender: mpsc::Sender<Observation>,
    ) -> Result<SubscriptionHandle, PlatformError>;

    /// Tear down `handle`. Unknown or already-removed handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Whether the platform still considers `handle` alive. Background
    /// tasks can be killed by the OS without notice.
    async fn is_registered(&self, handle: SubscriptionHandle) -> Result<bool, PlatformError>;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Injectable wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
