//! Pure evaluation core for presence, geofence and emergency detection.
//!
//! Nothing in this crate performs I/O or spawns tasks. The monitor crate
//! owns the lifecycle and feeds observations through these building blocks:
//!
//! - [`geo`] -- great-circle distance, ground speed and point-in-polygon.
//! - [`zone`] -- named circle/polygon regions and the [`ZoneCatalog`].
//! - [`threshold`] -- scalar limits bounded by a configured range.
//! - [`smoothing`] -- moving-average filter for noisy scalar streams.
//! - [`evaluator`] -- the membership state-transition function.
//! - [`cooldown`] -- per-subject alert debouncing.
//! - [`config`] -- validated monitor configuration.

pub mod alert;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod evaluator;
pub mod geo;
pub mod smoothing;
pub mod threshold;
pub mod types;
pub mod zone;

pub use alert::{AlertEvent, AlertKind};
pub use config::{MonitorConfig, MonitorKind, SamplingConfig};
pub use cooldown::{CooldownKey, Debouncer};
pub use error::CoreError;
pub use evaluator::{Evaluation, EvaluatorState, Membership, MembershipState, Strategy};
pub use smoothing::MovingAverage;
pub use threshold::{Threshold, ThresholdSet};
pub use types::{Coordinate, Observation, Reading, Timestamp};
pub use zone::{Zone, ZoneCatalog, ZoneShape};
