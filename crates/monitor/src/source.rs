//! [`SampleSource`] fed by newline-delimited JSON.
//!
//! Lets the daemon be driven by a real feed (a GPS logger, a sensor bridge,
//! a recorded trace) piped to stdin. Each line is one serialized
//! [`Observation`]:
//!
//! ```text
//! {"reading":{"position":{"latitude":45.76,"longitude":4.83}},"timestamp":"2024-05-01T08:30:00Z"}
//! {"reading":{"scalar":48.2},"timestamp":"2024-05-01T08:30:01Z"}
//! ```
//!
//! Lines that do not parse are skipped with a warning. The input is shared
//! by every subscription, so a re-subscription continues where the previous
//! one stopped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use geoguard_core::{Observation, SamplingConfig};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::platform::{PlatformError, SampleSource, SubscriptionHandle};

struct Pump {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct JsonLinesSource<R> {
    lines: Arc<Mutex<Lines<BufReader<R>>>>,
    pumps: std::sync::Mutex<HashMap<SubscriptionHandle, Pump>>,
    next_id: AtomicU64,
    exhausted: CancellationToken,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(reader).lines())),
            pumps: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            exhausted: CancellationToken::new(),
        }
    }

    /// Cancelled once the input reaches end of file or fails to read.
    pub fn exhausted(&self) -> CancellationToken {
        self.exhausted.clone()
    }

    fn pumps(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionHandle, Pump>> {
        self.pumps.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<R> SampleSource for JsonLinesSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn subscribe(
        &self,
        _config: SamplingConfig,
        sender: mpsc::Sender<Observation>,
    ) -> Result<SubscriptionHandle, PlatformError> {
        if self.exhausted.is_cancelled() {
            return Err(PlatformError::Failed("input exhausted".into()));
        }

        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let join = tokio::spawn(pump(
            Arc::clone(&self.lines),
            sender,
            cancel.clone(),
            self.exhausted.clone(),
        ));
        self.pumps().insert(handle, Pump { cancel, join });

        tracing::debug!(handle = handle.0, "JSON lines subscription started");
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(pump) = self.pumps().remove(&handle) {
            pump.cancel.cancel();
        }
    }

    async fn is_registered(&self, handle: SubscriptionHandle) -> Result<bool, PlatformError> {
        Ok(self
            .pumps()
            .get(&handle)
            .is_some_and(|pump| !pump.join.is_finished()))
    }
}

async fn pump<R>(
    lines: Arc<Mutex<Lines<BufReader<R>>>>,
    sender: mpsc::Sender<Observation>,
    cancel: CancellationToken,
    exhausted: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut line_no = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = async { lines.lock().await.next_line().await } => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Observation input reached end of file");
                exhausted.cancel();
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read observation input");
                exhausted.cancel();
                return;
            }
        };
        line_no += 1;

        if line.trim().is_empty() {
            continue;
        }
        let observation: Observation = match serde_json::from_str(&line) {
            Ok(observation) => observation,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping unparseable observation");
                continue;
            }
        };
        if sender.send(observation).await.is_err() {
            // Receiver dropped: the monitor closed this subscription.
            return;
        }
    }
}
