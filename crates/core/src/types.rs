//! Shared value types: coordinates, observations and timestamps.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ---------------------------------------------------------------------------
// Coordinate
// ---------------------------------------------------------------------------

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check that both components are finite and inside their ranges
    /// (latitude in `[-90, 90]`, longitude in `[-180, 180]`).
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(CoreError::MalformedObservation(format!(
                "non-finite coordinate ({}, {})",
                self.latitude, self.longitude
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoreError::MalformedObservation(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoreError::MalformedObservation(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// The payload of one sample. A location monitor receives positions, a
/// sensor monitor receives scalar magnitudes (speed, field strength, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Position(Coordinate),
    Scalar(f64),
}

/// One immutable sample delivered by a sample source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub reading: Reading,
    pub timestamp: Timestamp,
}

impl Observation {
    pub fn position(coordinate: Coordinate, timestamp: Timestamp) -> Self {
        Self {
            reading: Reading::Position(coordinate),
            timestamp,
        }
    }

    pub fn scalar(value: f64, timestamp: Timestamp) -> Self {
        Self {
            reading: Reading::Scalar(value),
            timestamp,
        }
    }

    pub fn coordinate(&self) -> Option<Coordinate> {
        match self.reading {
            Reading::Position(c) => Some(c),
            Reading::Scalar(_) => None,
        }
    }

    pub fn scalar_value(&self) -> Option<f64> {
        match self.reading {
            Reading::Scalar(v) => Some(v),
            Reading::Position(_) => None,
        }
    }

    /// Reject samples the evaluator must never see.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self.reading {
            Reading::Position(c) => c.validate(),
            Reading::Scalar(v) if v.is_finite() => Ok(()),
            Reading::Scalar(v) => Err(CoreError::MalformedObservation(format!(
                "non-finite scalar reading {v}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn valid_coordinates_pass() {
        assert!(Coordinate::new(48.8566, 2.3522).validate().is_ok());
        assert!(Coordinate::new(-90.0, 180.0).validate().is_ok());
        assert!(Coordinate::new(90.0, -180.0).validate().is_ok());
    }

    #[test]
    fn out_of_range_or_nan_coordinates_fail() {
        assert!(Coordinate::new(90.1, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, -180.5).validate().is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn scalar_observation_rejects_nan() {
        let obs = Observation::scalar(f64::NAN, Utc::now());
        assert!(obs.validate().is_err());
        assert!(Observation::scalar(12.5, Utc::now()).validate().is_ok());
    }

    #[test]
    fn observation_deserializes_from_tagged_json() {
        let obs: Observation = serde_json::from_str(
            r#"{"reading":{"position":{"latitude":1.5,"longitude":2.5}},"timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .expect("valid observation json");
        assert_eq!(obs.coordinate(), Some(Coordinate::new(1.5, 2.5)));
        assert_eq!(obs.scalar_value(), None);
    }
}
