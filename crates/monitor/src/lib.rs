//! Monitor runtime: drives the evaluation core from a platform sample
//! source and hands admitted alerts to the event sink.
//!
//! - [`platform`] -- permission, sampling and clock seams.
//! - [`subscription`] -- live subscription ownership and self-healing.
//! - [`monitor`] -- lifecycle state machine and evaluation loop.
//! - [`source`] -- JSON-lines sample source for desktop / replay use.

pub mod monitor;
pub mod platform;
pub mod source;
pub mod subscription;

pub use monitor::{Monitor, MonitorError, MonitorNotice, MonitorState, StatsSnapshot};
pub use platform::{
    Clock, ManualClock, PermissionProvider, PermissionStatus, PlatformError, SampleSource,
    StaticPermissions, SubscriptionHandle, SystemClock,
};
pub use source::JsonLinesSource;
