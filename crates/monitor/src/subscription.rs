//! Ownership of the live platform subscription and its self-healing.
//!
//! The OS may silently kill a background task or close the stream feeding
//! it. The monitor loop calls [`Subscription::check`] on every self-check
//! tick; an unregistered or closed subscription is torn down and
//! re-established with [`Subscription::renew`]. A failed renewal is logged
//! and retried on the next tick. Only a revoked permission is fatal.

use std::sync::Arc;
use std::time::Duration;

use geoguard_core::{Observation, SamplingConfig};
use tokio::sync::mpsc;

use crate::platform::{bounded, PlatformError, SampleSource, SubscriptionHandle};

/// Capacity of the observation channel between platform and monitor loop.
pub const OBSERVATION_CHANNEL_CAPACITY: usize = 64;

/// Result of a self-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The subscription is gone; the payload says why.
    Lost(String),
    Revoked,
}

/// A subscription handle paired with the receiving end of its channel.
pub struct Subscription {
    source: Arc<dyn SampleSource>,
    sampling: SamplingConfig,
    timeout: Duration,
    handle: Option<SubscriptionHandle>,
    rx: Option<mpsc::Receiver<Observation>>,
}

impl Subscription {
    /// Subscribe to `source`, bounded by `timeout`.
    pub async fn open(
        source: Arc<dyn SampleSource>,
        sampling: SamplingConfig,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let mut subscription = Self {
            source,
            sampling,
            timeout,
            handle: None,
            rx: None,
        };
        subscription.attach().await?;
        Ok(subscription)
    }

    pub fn handle(&self) -> Option<SubscriptionHandle> {
        self.handle
    }

    /// Next observation. Pends forever while detached so it can sit in a
    /// `select!` next to the self-check timer; returns `None` exactly once
    /// when the platform closes the stream.
    pub async fn next(&mut self) -> Option<Observation> {
        match self.rx.as_mut() {
            Some(rx) => {
                let next = rx.recv().await;
                if next.is_none() {
                    self.rx = None;
                }
                next
            }
            None => std::future::pending().await,
        }
    }

    /// Ask the platform whether the subscription is still alive.
    pub async fn check(&self) -> Health {
        let Some(handle) = self.handle else {
            return Health::Lost("no active subscription".into());
        };
        if self.rx.is_none() {
            return Health::Lost("observation stream closed".into());
        }
        match bounded(self.timeout, self.source.is_registered(handle)).await {
            Ok(true) => Health::Healthy,
            Ok(false) => Health::Lost(format!("subscription {} unregistered", handle.0)),
            Err(PlatformError::PermissionRevoked) => Health::Revoked,
            Err(e) => Health::Lost(e.to_string()),
        }
    }

    /// Tear down whatever is left and subscribe again.
    pub async fn renew(&mut self) -> Result<(), PlatformError> {
        self.close().await;
        self.attach().await
    }

    /// Unsubscribe and drop the receiver. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            let unsubscribe = async {
                self.source.unsubscribe(handle).await;
                Ok::<_, PlatformError>(())
            };
            if let Err(e) = bounded(self.timeout, unsubscribe).await {
                tracing::warn!(handle = handle.0, error = %e, "Unsubscribe did not complete");
            }
        }
    }

    async fn attach(&mut self) -> Result<(), PlatformError> {
        let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_CAPACITY);
        let handle = bounded(self.timeout, self.source.subscribe(self.sampling, tx)).await?;
        tracing::debug!(handle = handle.0, "Sample subscription attached");
        self.handle = Some(handle);
        self.rx = Some(rx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Source {
        next_id: AtomicU64,
        registered: AtomicBool,
        revoked: AtomicBool,
        unsubscribed: Mutex<Vec<u64>>,
        senders: Mutex<Vec<mpsc::Sender<Observation>>>,
    }

    #[async_trait]
    impl SampleSource for Source {
        async fn subscribe(
            &self,
            _config: SamplingConfig,
            sender: mpsc::Sender<Observation>,
        ) -> Result<SubscriptionHandle, PlatformError> {
            self.senders.lock().expect("lock").push(sender);
            self.registered.store(true, Ordering::SeqCst);
            Ok(SubscriptionHandle(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn unsubscribe(&self, handle: SubscriptionHandle) {
            self.unsubscribed.lock().expect("lock").push(handle.0);
        }

        async fn is_registered(&self, _handle: SubscriptionHandle) -> Result<bool, PlatformError> {
            if self.revoked.load(Ordering::SeqCst) {
                return Err(PlatformError::PermissionRevoked);
            }
            Ok(self.registered.load(Ordering::SeqCst))
        }
    }

    async fn open(source: &Arc<Source>) -> Subscription {
        Subscription::open(
            source.clone(),
            SamplingConfig::default(),
            Duration::from_secs(1),
        )
        .await
        .expect("subscribe succeeds")
    }

    #[tokio::test]
    async fn unregistered_subscription_is_renewed() {
        let source = Arc::new(Source::default());
        let mut sub = open(&source).await;
        assert_eq!(sub.check().await, Health::Healthy);

        source.registered.store(false, Ordering::SeqCst);
        assert!(matches!(sub.check().await, Health::Lost(_)));

        sub.renew().await.expect("renew");
        assert_eq!(sub.handle(), Some(SubscriptionHandle(1)));
        assert_eq!(*source.unsubscribed.lock().expect("lock"), vec![0]);
        assert_eq!(sub.check().await, Health::Healthy);
    }

    #[tokio::test]
    async fn closed_stream_reports_lost() {
        let source = Arc::new(Source::default());
        let mut sub = open(&source).await;

        let sender = source.senders.lock().expect("lock").remove(0);
        sender
            .send(Observation::scalar(1.0, Utc::now()))
            .await
            .expect("receiver alive");
        drop(sender);

        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
        assert_eq!(
            sub.check().await,
            Health::Lost("observation stream closed".into())
        );
    }

    #[tokio::test]
    async fn revocation_is_reported() {
        let source = Arc::new(Source::default());
        let sub = open(&source).await;
        source.revoked.store(true, Ordering::SeqCst);
        assert_eq!(sub.check().await, Health::Revoked);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let source = Arc::new(Source::default());
        let mut sub = open(&source).await;
        sub.close().await;
        sub.close().await;
        assert_eq!(*source.unsubscribed.lock().expect("lock"), vec![0]);
        assert_eq!(sub.handle(), None);
    }
}
