//! Alert event types emitted when a monitored subject changes state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Observation;

/// What happened to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The position moved into a zone.
    Entered,
    /// The position moved out of a zone.
    Left,
    /// The filtered scalar rose above a threshold.
    ThresholdExceeded,
    /// The filtered scalar fell back below a threshold, or an anomaly ended.
    ThresholdRecovered,
    /// The filtered scalar deviated from the calibrated baseline.
    AnomalyDetected,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entered => "entered",
            Self::Left => "left",
            Self::ThresholdExceeded => "threshold_exceeded",
            Self::ThresholdRecovered => "threshold_recovered",
            Self::AnomalyDetected => "anomaly_detected",
        }
    }

    /// Emergency-style kinds warrant an urgent notification and haptics.
    pub fn is_emergency(self) -> bool {
        matches!(self, Self::ThresholdExceeded | Self::AnomalyDetected)
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single admitted (or candidate) state change.
///
/// Value type: built once by the evaluator and handed to the debouncer and
/// sinks without modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Opaque identifier, also used as the history key.
    pub id: Uuid,
    pub kind: AlertKind,
    /// Name of the zone or threshold the event is about.
    pub subject_name: String,
    /// The sample that triggered the transition.
    pub observation: Observation,
    /// Human-readable summary for notifications.
    pub message: String,
    /// Name of the monitor that produced the event. Empty until the monitor
    /// stamps it.
    #[serde(default)]
    pub monitor: String,
}

impl AlertEvent {
    pub fn new(
        kind: AlertKind,
        subject_name: impl Into<String>,
        observation: Observation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            subject_name: subject_name.into(),
            observation,
            message: message.into(),
            monitor: String::new(),
        }
    }

    /// Attach the name of the producing monitor.
    pub fn with_monitor(mut self, monitor: impl Into<String>) -> Self {
        self.monitor = monitor.into();
        self
    }
}
