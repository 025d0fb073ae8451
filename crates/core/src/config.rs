//! Monitor configuration surface.
//!
//! A [`MonitorConfig`] is usually deserialized from a JSON file and must be
//! validated with [`MonitorConfig::validate`] before use. Every value is
//! range-checked; nothing is silently clamped.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::evaluator::Strategy;
use crate::smoothing::DEFAULT_WINDOW;
use crate::threshold::{validate_bounds, Threshold, ThresholdSet};
use crate::zone::{Zone, ZoneCatalog};

// ---------------------------------------------------------------------------
// Defaults and limits
// ---------------------------------------------------------------------------

/// Default alert cooldown (suits high-frequency anomaly monitors).
pub const DEFAULT_COOLDOWN_MS: u64 = 5_000;

/// Longest cooldown accepted (one day).
const MAX_COOLDOWN_MS: u64 = 24 * 60 * 60 * 1000;

/// Largest moving-average window accepted.
const MAX_WINDOW: usize = 1_000;

/// Default interval between subscription self-checks.
pub const DEFAULT_SELF_CHECK_INTERVAL_SECS: u64 = 300;

/// Default bound on any single platform call (permission, subscribe).
pub const DEFAULT_PLATFORM_TIMEOUT_SECS: u64 = 30;

/// Default sampling period requested from the platform.
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 10_000;

/// Maximum length of a monitor name.
const MAX_NAME_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Evaluation strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    LocationZone,
    ScalarThreshold,
    AnomalyBaseline,
}

/// Sampling request handed to the platform sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub interval_ms: u64,
    #[serde(default)]
    pub min_distance_meters: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            min_distance_meters: 0,
        }
    }
}

/// Full configuration of one monitor instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    pub kind: MonitorKind,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Share one cooldown between opposite transitions of a subject.
    #[serde(default)]
    pub collapse_transitions: bool,

    #[serde(default = "default_window")]
    pub moving_average_window: usize,

    #[serde(default)]
    pub threshold_min: f64,
    #[serde(default = "default_threshold_max")]
    pub threshold_max: f64,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,

    #[serde(default)]
    pub zones: Vec<Zone>,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default = "default_self_check_secs")]
    pub self_check_interval_secs: u64,

    #[serde(default = "default_platform_timeout_secs")]
    pub platform_timeout_secs: u64,

    /// Also request background permission before running.
    #[serde(default)]
    pub require_background: bool,

    /// Minimum seconds between best-effort position trail reports; `0`
    /// disables trail reporting.
    #[serde(default)]
    pub position_report_interval_secs: u64,
}

fn default_cooldown_ms() -> u64 {
    DEFAULT_COOLDOWN_MS
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_threshold_max() -> f64 {
    f64::MAX
}

fn default_self_check_secs() -> u64 {
    DEFAULT_SELF_CHECK_INTERVAL_SECS
}

fn default_platform_timeout_secs() -> u64 {
    DEFAULT_PLATFORM_TIMEOUT_SECS
}

impl MonitorConfig {
    /// Minimal configuration for `kind` with all defaults applied.
    pub fn new(name: impl Into<String>, kind: MonitorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            collapse_transitions: false,
            moving_average_window: DEFAULT_WINDOW,
            threshold_min: 0.0,
            threshold_max: f64::MAX,
            thresholds: Vec::new(),
            zones: Vec::new(),
            sampling: SamplingConfig::default(),
            self_check_interval_secs: DEFAULT_SELF_CHECK_INTERVAL_SECS,
            platform_timeout_secs: DEFAULT_PLATFORM_TIMEOUT_SECS,
            require_background: false,
            position_report_interval_secs: 0,
        }
    }

    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("unparseable monitor config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, failing on the first problem found.
    ///
    /// Zone and threshold problems surface as [`CoreError::InvalidCatalog`];
    /// everything else as [`CoreError::Validation`].
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_name(&self.name)?;

        if self.cooldown_ms > MAX_COOLDOWN_MS {
            return Err(CoreError::Validation(format!(
                "cooldown_ms {} exceeds maximum {MAX_COOLDOWN_MS}",
                self.cooldown_ms
            )));
        }
        if self.moving_average_window == 0 || self.moving_average_window > MAX_WINDOW {
            return Err(CoreError::Validation(format!(
                "moving_average_window must be in 1..={MAX_WINDOW}, got {}",
                self.moving_average_window
            )));
        }
        if self.sampling.interval_ms == 0 {
            return Err(CoreError::Validation(
                "sampling.interval_ms must be positive".into(),
            ));
        }
        if self.self_check_interval_secs == 0 {
            return Err(CoreError::Validation(
                "self_check_interval_secs must be positive".into(),
            ));
        }
        if self.platform_timeout_secs == 0 {
            return Err(CoreError::Validation(
                "platform_timeout_secs must be positive".into(),
            ));
        }

        self.build_strategy().map(|_| ())
    }

    /// Build the initial evaluation strategy described by this config.
    pub fn build_strategy(&self) -> Result<Strategy, CoreError> {
        match self.kind {
            MonitorKind::LocationZone => {
                if self.zones.is_empty() {
                    return Err(CoreError::InvalidCatalog(
                        "zone monitor needs at least one zone".into(),
                    ));
                }
                Ok(Strategy::LocationZone {
                    catalog: ZoneCatalog::load(self.zones.clone())?,
                })
            }
            MonitorKind::ScalarThreshold | MonitorKind::AnomalyBaseline => {
                validate_bounds(self.threshold_min, self.threshold_max)?;
                if self.thresholds.is_empty() {
                    return Err(CoreError::InvalidCatalog(
                        "scalar monitor needs at least one threshold".into(),
                    ));
                }
                let thresholds = ThresholdSet::load(
                    self.thresholds.clone(),
                    self.threshold_min,
                    self.threshold_max,
                )?;
                Ok(match self.kind {
                    MonitorKind::AnomalyBaseline => Strategy::AnomalyBaseline {
                        thresholds,
                        baseline: None,
                    },
                    _ => Strategy::ScalarThreshold { thresholds },
                })
            }
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn self_check_interval(&self) -> Duration {
        Duration::from_secs(self.self_check_interval_secs)
    }

    pub fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_secs)
    }

    /// `None` when position trail reporting is disabled.
    pub fn position_report_interval(&self) -> Option<Duration> {
        (self.position_report_interval_secs > 0)
            .then(|| Duration::from_secs(self.position_report_interval_secs))
    }
}

/// Rules: non-empty, at most `MAX_NAME_LEN` characters, only alphanumeric,
/// hyphen, underscore or dot (the name ends up in log fields and reports).
fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "monitor name must be 1..={MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(format!(
            "monitor name '{name}' contains invalid characters"
        )));
    }
    Ok(())
}
