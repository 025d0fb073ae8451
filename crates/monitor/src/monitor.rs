//! Monitor lifecycle: permissions, subscription, evaluation loop.
//!
//! A [`Monitor`] owns one sampling subscription, one spawned loop task and
//! one dispatch task. The loop suspends on a `tokio::select!` over
//! cancellation, the next observation and the self-check timer. Each
//! observation is evaluated against the current [`Strategy`] and debounced;
//! admitted alerts are queued to the dispatch task, which hands them to the
//! [`EventSink`] one at a time in admission order. Slow delivery delays
//! later alerts but never stalls sampling.
//!
//! ```text
//! Stopped --start()--> Acquiring --granted + subscribed--> Running
//!    ^                     |                                  |
//!    +------- denied ------+                                  |
//!    +------------- stop() / permission revoked --------------+
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use geoguard_core::{
    AlertEvent, Coordinate, CoreError, Debouncer, EvaluatorState, MonitorConfig, Observation,
    Strategy, Timestamp, Zone, ZoneCatalog,
};
use geoguard_events::EventSink;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::platform::{
    bounded, Clock, PermissionProvider, PermissionStatus, PlatformError, SampleSource,
    SystemClock,
};
use crate::subscription::{Health, Subscription};

/// Buffered notices per subscriber before the slowest one starts lagging.
const NOTICE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// State, notices and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Stopped,
    Acquiring,
    Running,
}

/// Errors surfaced by the monitor to its host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),
}

impl From<CoreError> for MonitorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCatalog(msg) => MonitorError::InvalidCatalog(msg),
            CoreError::Validation(msg) | CoreError::MalformedObservation(msg) => {
                MonitorError::InvalidConfig(msg)
            }
        }
    }
}

/// Lifecycle notifications published to [`Monitor::subscribe_notices`].
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorNotice {
    StateChanged { from: MonitorState, to: MonitorState },
    /// An error the host should show the user.
    Failed(MonitorError),
    /// The platform closed the observation stream; the self-check will
    /// try to re-subscribe.
    StreamClosed,
    /// The self-check replaced a lost subscription.
    Resubscribed { reason: String },
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Running counters, updated by the loop task.
#[derive(Debug, Default)]
pub struct MonitorStats {
    observations: AtomicU64,
    rejected: AtomicU64,
    admitted: AtomicU64,
    suppressed: AtomicU64,
    resubscriptions: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub observations: u64,
    pub rejected: u64,
    pub admitted: u64,
    pub suppressed: u64,
    pub resubscriptions: u64,
}

impl MonitorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            observations: self.observations.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            resubscriptions: self.resubscriptions.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Shared status (state + notices)
// ---------------------------------------------------------------------------

/// State cell shared between the handle and the loop task.
struct Status {
    state: watch::Sender<MonitorState>,
    notices: broadcast::Sender<MonitorNotice>,
}

impl Status {
    fn new() -> Self {
        let (state, _) = watch::channel(MonitorState::Stopped);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { state, notices }
    }

    fn current(&self) -> MonitorState {
        *self.state.borrow()
    }

    /// Move to `to`, publishing a notice if the state actually changed.
    fn transition(&self, monitor: &str, to: MonitorState) {
        let from = self.state.send_replace(to);
        if from != to {
            tracing::info!(monitor, ?from, ?to, "Monitor state changed");
            let _ = self.notices.send(MonitorNotice::StateChanged { from, to });
        }
    }

    fn fail(&self, monitor: &str, err: MonitorError) {
        tracing::warn!(monitor, error = %err, "Monitor error surfaced");
        let _ = self.notices.send(MonitorNotice::Failed(err));
    }

    fn notify(&self, notice: MonitorNotice) {
        let _ = self.notices.send(notice);
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct RunningTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Work queued from the loop to the dispatch task.
enum Outbound {
    Alert(AlertEvent),
    Position(Coordinate, Timestamp),
}

/// One presence / geofence / emergency monitor.
pub struct Monitor {
    config: Arc<MonitorConfig>,
    source: Arc<dyn SampleSource>,
    permissions: Arc<dyn PermissionProvider>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    strategy: Arc<RwLock<Arc<Strategy>>>,
    status: Arc<Status>,
    stats: Arc<MonitorStats>,
    task: Mutex<Option<RunningTask>>,
    /// Cancelled by `stop()` to abort any `start()` begun before it.
    start_abort: StdMutex<CancellationToken>,
    /// Dispatch task of the last stopped run, awaited by `flush()`.
    draining: StdMutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Validate `config` and build a stopped monitor.
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn SampleSource>,
        permissions: Arc<dyn PermissionProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;
        let strategy = config.build_strategy()?;
        Ok(Self {
            config: Arc::new(config),
            source,
            permissions,
            clock: Arc::new(SystemClock),
            sink,
            strategy: Arc::new(RwLock::new(Arc::new(strategy))),
            status: Arc::new(Status::new()),
            stats: Arc::new(MonitorStats::default()),
            task: Mutex::new(None),
            start_abort: StdMutex::new(CancellationToken::new()),
            draining: StdMutex::new(None),
        })
    }

    /// Replace the wall clock used for debouncing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn state(&self) -> MonitorState {
        self.status.current()
    }

    /// Receive every state transition and surfaced error from now on.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<MonitorNotice> {
        self.status.notices.subscribe()
    }

    /// Watch the current state.
    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.status.state.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The strategy observations are currently evaluated against.
    pub fn strategy(&self) -> Arc<Strategy> {
        current_strategy(&self.strategy)
    }

    // -- lifecycle ---------------------------------------------------------

    /// Acquire permissions, subscribe and spawn the loop task.
    ///
    /// A no-op while already acquiring or running. On denial the monitor
    /// returns to `Stopped` and the error is both returned and published.
    /// A `stop()` issued while permissions are pending aborts the start:
    /// it returns `Ok(())` with the monitor `Stopped` and nothing published.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let abort = lock(&self.start_abort).clone();
        let mut task = self.task.lock().await;
        if abort.is_cancelled() {
            return Ok(());
        }

        if let Some(running) = task.as_ref() {
            if !running.join.is_finished() && self.state() == MonitorState::Running {
                tracing::debug!(monitor = %self.name(), "Monitor already running");
                return Ok(());
            }
        }
        // Reap a loop that ended on its own (permission revoked).
        if let Some(stale) = task.take() {
            stale.cancel.cancel();
            let _ = stale.join.await;
            *lock(&self.draining) = Some(stale.dispatcher);
        }

        let name = self.name().to_string();
        self.status.transition(&name, MonitorState::Acquiring);

        let granted = tokio::select! {
            _ = abort.cancelled() => None,
            outcome = self.acquire_permissions() => Some(outcome),
        };
        match granted {
            None => {
                tracing::info!(monitor = %name, "Start aborted while acquiring permissions");
                self.status.transition(&name, MonitorState::Stopped);
                return Ok(());
            }
            Some(Err(err)) => {
                self.status.transition(&name, MonitorState::Stopped);
                self.status.fail(&name, err.clone());
                return Err(err);
            }
            Some(Ok(())) => {}
        }

        let mut subscription = match Subscription::open(
            Arc::clone(&self.source),
            self.config.sampling,
            self.config.platform_timeout(),
        )
        .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let err = match e {
                    PlatformError::PermissionRevoked => {
                        MonitorError::PermissionDenied("permission revoked while subscribing".into())
                    }
                    other => MonitorError::SubscriptionFailed(other.to_string()),
                };
                self.status.transition(&name, MonitorState::Stopped);
                self.status.fail(&name, err.clone());
                return Err(err);
            }
        };
        if abort.is_cancelled() {
            subscription.close().await;
            tracing::info!(monitor = %name, "Start aborted while subscribing");
            self.status.transition(&name, MonitorState::Stopped);
            return Ok(());
        }

        self.status.transition(&name, MonitorState::Running);

        let (outbound, queue) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_in_order(Arc::clone(&self.sink), queue));

        let cancel = CancellationToken::new();
        let worker = LoopWorker {
            name,
            config: Arc::clone(&self.config),
            clock: Arc::clone(&self.clock),
            outbound,
            strategy: Arc::clone(&self.strategy),
            status: Arc::clone(&self.status),
            stats: Arc::clone(&self.stats),
        };
        let join = tokio::spawn(worker.run(subscription, cancel.clone()));
        *task = Some(RunningTask {
            cancel,
            join,
            dispatcher,
        });

        Ok(())
    }

    /// Cancel the loop, unsubscribe and wait for the loop task to finish.
    ///
    /// Safe from any state, including while a `start()` is still acquiring
    /// permissions. Once this returns no new alert is queued; alerts queued
    /// earlier keep dispatching in order, see [`Monitor::flush`].
    pub async fn stop(&self) {
        {
            let mut abort = lock(&self.start_abort);
            abort.cancel();
            *abort = CancellationToken::new();
        }

        let mut task = self.task.lock().await;
        if let Some(running) = task.take() {
            running.cancel.cancel();
            if let Err(e) = running.join.await {
                tracing::error!(monitor = %self.name(), error = %e, "Monitor loop task panicked");
            }
            *lock(&self.draining) = Some(running.dispatcher);
        }
        self.status.transition(self.name(), MonitorState::Stopped);
    }

    /// Wait up to `limit` for alerts queued before the last `stop()` to
    /// reach the sink. Returns `false` if some were still in flight.
    pub async fn flush(&self, limit: Duration) -> bool {
        let dispatcher = lock(&self.draining).take();
        let Some(dispatcher) = dispatcher else {
            return true;
        };
        match tokio::time::timeout(limit, dispatcher).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(monitor = %self.name(), error = %e, "Dispatch task panicked");
                true
            }
            Err(_) => {
                tracing::warn!(
                    monitor = %self.name(),
                    limit_ms = limit.as_millis() as u64,
                    "Alerts still dispatching after flush limit"
                );
                false
            }
        }
    }

    async fn acquire_permissions(&self) -> Result<(), MonitorError> {
        let timeout = self.config.platform_timeout();

        let foreground = bounded(timeout, self.permissions.request_foreground()).await;
        check_permission("foreground", foreground)?;

        if self.config.require_background {
            let background = bounded(timeout, self.permissions.request_background()).await;
            check_permission("background", background)?;
        }
        Ok(())
    }

    // -- runtime updates ---------------------------------------------------

    /// Swap in a new zone catalog. On failure the old catalog stays active
    /// and the error is also published as a notice.
    pub fn replace_catalog(&self, zones: Vec<Zone>) -> Result<(), MonitorError> {
        let result = ZoneCatalog::load(zones).and_then(|catalog| {
            self.update_strategy(|current| current.with_catalog(catalog))
        });
        if let Err(e) = &result {
            self.status.fail(self.name(), MonitorError::from(e.clone()));
        }
        result.map_err(MonitorError::from)?;
        tracing::info!(monitor = %self.name(), "Zone catalog replaced");
        Ok(())
    }

    /// Change one threshold value; must stay inside the configured bounds.
    pub fn set_threshold(&self, name: &str, value: f64) -> Result<(), MonitorError> {
        self.update_strategy(|current| current.with_threshold(name, value))?;
        tracing::info!(monitor = %self.name(), threshold = name, value, "Threshold updated");
        Ok(())
    }

    /// Record the baseline for an anomaly monitor.
    pub fn calibrate(&self, baseline: f64) -> Result<(), MonitorError> {
        self.update_strategy(|current| current.calibrate(baseline))?;
        tracing::info!(monitor = %self.name(), baseline, "Baseline calibrated");
        Ok(())
    }

    fn update_strategy(
        &self,
        build: impl FnOnce(&Strategy) -> Result<Strategy, CoreError>,
    ) -> Result<(), CoreError> {
        let mut guard = self.strategy.write().unwrap_or_else(PoisonError::into_inner);
        let next = build(&guard)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

fn current_strategy(strategy: &RwLock<Arc<Strategy>>) -> Arc<Strategy> {
    Arc::clone(&strategy.read().unwrap_or_else(PoisonError::into_inner))
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drain the outbound queue into `sink`, one item at a time. Ends once the
/// loop has dropped its sender and the queue is empty.
async fn dispatch_in_order(
    sink: Arc<dyn EventSink>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Alert(event) => sink.dispatch(event).await,
            Outbound::Position(coordinate, timestamp) => {
                sink.record_position(coordinate, timestamp).await
            }
        }
    }
}

fn check_permission(
    scope: &str,
    outcome: Result<PermissionStatus, PlatformError>,
) -> Result<(), MonitorError> {
    match outcome {
        Ok(PermissionStatus::Granted) => Ok(()),
        Ok(PermissionStatus::Denied) => Err(MonitorError::PermissionDenied(format!(
            "{scope} location permission denied"
        ))),
        Err(e) => Err(MonitorError::PermissionDenied(format!(
            "{scope} permission request failed: {e}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Loop task
// ---------------------------------------------------------------------------

/// Everything the spawned loop needs, detached from the `Monitor` handle.
/// Dropping it closes the outbound queue.
struct LoopWorker {
    name: String,
    config: Arc<MonitorConfig>,
    clock: Arc<dyn Clock>,
    outbound: mpsc::UnboundedSender<Outbound>,
    strategy: Arc<RwLock<Arc<Strategy>>>,
    status: Arc<Status>,
    stats: Arc<MonitorStats>,
}

/// Per-run mutable state, owned exclusively by the loop task.
struct LoopState {
    evaluator: EvaluatorState,
    debouncer: Debouncer,
    last_trail: Option<Timestamp>,
}

impl LoopWorker {
    async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        let initial = current_strategy(&self.strategy);
        let mut state = LoopState {
            evaluator: EvaluatorState::new(&initial, self.config.moving_average_window),
            debouncer: if self.config.collapse_transitions {
                Debouncer::collapsed()
            } else {
                Debouncer::new()
            },
            last_trail: None,
        };

        let period = self.config.self_check_interval();
        let mut self_check = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        self_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(monitor = %self.name, "Monitor loop started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                next = subscription.next() => match next {
                    Some(observation) => self.process(observation, &mut state, &cancel),
                    None => {
                        tracing::warn!(
                            monitor = %self.name,
                            "Observation stream closed, waiting for self-check"
                        );
                        self.status.notify(MonitorNotice::StreamClosed);
                    }
                },

                _ = self_check.tick() => {
                    let healed = tokio::select! {
                        _ = cancel.cancelled() => break,
                        outcome = self.self_check(&mut subscription) => outcome,
                    };
                    if let Err(err) = healed {
                        subscription.close().await;
                        self.status.transition(&self.name, MonitorState::Stopped);
                        self.status.fail(&self.name, err);
                        tracing::info!(monitor = %self.name, "Monitor loop ended by revocation");
                        return;
                    }
                }
            }
        }

        subscription.close().await;
        tracing::info!(monitor = %self.name, "Monitor loop stopped");
    }

    /// One evaluate, debounce, dispatch cycle.
    fn process(&self, observation: Observation, state: &mut LoopState, cancel: &CancellationToken) {
        MonitorStats::bump(&self.stats.observations);

        let strategy = current_strategy(&self.strategy);
        let events = match state.evaluator.apply(&observation, &strategy) {
            Ok(events) => events,
            Err(e) => {
                MonitorStats::bump(&self.stats.rejected);
                tracing::warn!(monitor = %self.name, error = %e, "Dropping observation");
                return;
            }
        };

        let now = self.clock.now();
        self.maybe_report_position(&observation, now, state);

        for event in events {
            let event = event.with_monitor(self.name.as_str());
            if !state.debouncer.admit(&event, now, self.config.cooldown()) {
                MonitorStats::bump(&self.stats.suppressed);
                tracing::debug!(
                    monitor = %self.name,
                    subject = %event.subject_name,
                    kind = %event.kind,
                    "Alert suppressed by cooldown"
                );
                continue;
            }
            if cancel.is_cancelled() {
                return;
            }

            MonitorStats::bump(&self.stats.admitted);
            tracing::info!(
                monitor = %self.name,
                subject = %event.subject_name,
                kind = %event.kind,
                event_id = %event.id,
                "Alert admitted"
            );
            self.queue(Outbound::Alert(event));
        }
    }

    fn maybe_report_position(&self, observation: &Observation, now: Timestamp, state: &mut LoopState) {
        let (Some(interval), Some(coordinate)) =
            (self.config.position_report_interval(), observation.coordinate())
        else {
            return;
        };
        let due = match state.last_trail {
            None => true,
            Some(last) => (now - last).to_std().is_ok_and(|elapsed| elapsed >= interval),
        };
        if !due {
            return;
        }
        state.last_trail = Some(now);
        self.queue(Outbound::Position(coordinate, observation.timestamp));
    }

    fn queue(&self, item: Outbound) {
        if self.outbound.send(item).is_err() {
            tracing::error!(monitor = %self.name, "Dispatch task gone, dropping outbound item");
        }
    }

    /// Heal a lost subscription. Only a revoked permission is returned as
    /// an error; anything else is logged and retried on the next tick.
    async fn self_check(&self, subscription: &mut Subscription) -> Result<(), MonitorError> {
        let reason = match subscription.check().await {
            Health::Healthy => {
                tracing::debug!(monitor = %self.name, "Subscription healthy");
                return Ok(());
            }
            Health::Revoked => return Err(revoked()),
            Health::Lost(reason) => reason,
        };

        tracing::warn!(
            monitor = %self.name,
            reason = %reason,
            "Subscription lost, re-subscribing"
        );

        match subscription.renew().await {
            Ok(()) => {
                MonitorStats::bump(&self.stats.resubscriptions);
                tracing::info!(monitor = %self.name, "Subscription restored");
                self.status.notify(MonitorNotice::Resubscribed { reason });
                Ok(())
            }
            Err(PlatformError::PermissionRevoked) => Err(revoked()),
            Err(e) => {
                tracing::warn!(
                    monitor = %self.name,
                    error = %e,
                    retry_in_secs = self.config.self_check_interval_secs,
                    "Re-subscription failed"
                );
                Ok(())
            }
        }
    }
}

fn revoked() -> MonitorError {
    MonitorError::PermissionDenied("location permission revoked".into())
}
