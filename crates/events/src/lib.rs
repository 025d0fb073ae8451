//! Alert fan-out for the presence monitor.
//!
//! This crate turns admitted [`AlertEvent`](geoguard_core::AlertEvent)s into
//! side effects:
//!
//! - [`EventBus`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`; the UI layer subscribes to it.
//! - [`AlertHistory`] -- append-only local history, optionally mirrored to
//!   a JSON-lines file.
//! - [`delivery`] -- external delivery channels (remote HTTP report, local
//!   notification).
//! - [`FanoutSink`] -- the single dispatch boundary combining all of the
//!   above.

pub mod bus;
pub mod delivery;
pub mod history;
pub mod sink;

pub use bus::EventBus;
pub use delivery::local::LogNotifier;
pub use delivery::report::{HttpReporter, ReportConfig, ReportMethod};
pub use delivery::{AlertChannel, DeliveryError};
pub use history::{AlertHistory, HistoryEntry};
pub use sink::{EventSink, FanoutSink};
