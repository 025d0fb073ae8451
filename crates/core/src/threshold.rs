//! Scalar limits for speed, magnetic deviation, noise level and similar
//! sensor-magnitude monitors.
//!
//! Threshold values are user-adjustable at runtime but always bounded by
//! the `[min, max]` range from configuration. Adjusting a value produces a
//! new [`ThresholdSet`]; the old one is never edited in place.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a filtered value is compared with the threshold value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Over when strictly greater than the threshold.
    #[default]
    GreaterThan,
}

impl Comparison {
    pub fn is_over(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
        }
    }
}

/// A single named scalar limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub comparison: Comparison,
}

impl Threshold {
    pub fn greater_than(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            comparison: Comparison::GreaterThan,
        }
    }

    pub fn is_over(&self, value: f64) -> bool {
        self.comparison.is_over(value, self.value)
    }
}

// ---------------------------------------------------------------------------
// ThresholdSet
// ---------------------------------------------------------------------------

/// Validated, uniquely named thresholds sharing one permitted range.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
    min: f64,
    max: f64,
}

impl ThresholdSet {
    /// Build a set, rejecting duplicate names and values outside `[min, max]`.
    pub fn load(thresholds: Vec<Threshold>, min: f64, max: f64) -> Result<Self, CoreError> {
        validate_bounds(min, max)?;

        let mut seen = HashSet::with_capacity(thresholds.len());
        for t in &thresholds {
            if t.name.trim().is_empty() {
                return Err(CoreError::InvalidCatalog(
                    "threshold name must not be empty".into(),
                ));
            }
            if !seen.insert(t.name.as_str()) {
                return Err(CoreError::InvalidCatalog(format!(
                    "duplicate threshold name '{}'",
                    t.name
                )));
            }
            check_in_range(&t.name, t.value, min, max)
                .map_err(|e| CoreError::InvalidCatalog(e.to_string()))?;
        }

        Ok(Self {
            thresholds,
            min,
            max,
        })
    }

    /// Return a copy of this set with `name` moved to `value`.
    ///
    /// Out-of-range values fail with [`CoreError::Validation`]; they are
    /// never clamped.
    pub fn with_value(&self, name: &str, value: f64) -> Result<Self, CoreError> {
        check_in_range(name, value, self.min, self.max)?;

        let mut next = self.clone();
        let threshold = next
            .thresholds
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| CoreError::Validation(format!("unknown threshold '{name}'")))?;
        threshold.value = value;
        Ok(next)
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn get(&self, name: &str) -> Option<&Threshold> {
        self.thresholds.iter().find(|t| t.name == name)
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }
}

/// Check that `min <= max` and both are finite.
pub fn validate_bounds(min: f64, max: f64) -> Result<(), CoreError> {
    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(CoreError::Validation(format!(
            "threshold range [{min}, {max}] is not a valid interval"
        )));
    }
    Ok(())
}

fn check_in_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), CoreError> {
    if !value.is_finite() || value < min || value > max {
        return Err(CoreError::Validation(format!(
            "threshold '{name}' value {value} outside permitted range [{min}, {max}]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn speed_limits() -> ThresholdSet {
        ThresholdSet::load(
            vec![
                Threshold::greater_than("speed_warning", 25.0),
                Threshold::greater_than("speed_critical", 35.0),
            ],
            0.0,
            70.0,
        )
        .expect("valid thresholds")
    }

    #[test]
    fn greater_than_is_strict() {
        let t = Threshold::greater_than("t", 10.0);
        assert!(!t.is_over(10.0));
        assert!(t.is_over(10.000_1));
        assert!(!t.is_over(9.0));
    }

    #[test]
    fn with_value_swaps_in_a_new_set() {
        let original = speed_limits();
        let adjusted = original
            .with_value("speed_warning", 30.0)
            .expect("in range");

        assert_eq!(original.get("speed_warning").map(|t| t.value), Some(25.0));
        assert_eq!(adjusted.get("speed_warning").map(|t| t.value), Some(30.0));
        assert_eq!(adjusted.get("speed_critical").map(|t| t.value), Some(35.0));
    }

    #[test]
    fn out_of_range_adjustment_fails_without_clamping() {
        let set = speed_limits();
        assert_matches!(set.with_value("speed_warning", 71.0), Err(CoreError::Validation(_)));
        assert_matches!(set.with_value("speed_warning", -1.0), Err(CoreError::Validation(_)));
        assert_matches!(
            set.with_value("speed_warning", f64::NAN),
            Err(CoreError::Validation(_))
        );
        assert_matches!(set.with_value("missing", 10.0), Err(CoreError::Validation(_)));
    }

    #[test]
    fn load_rejects_duplicates_and_out_of_range() {
        assert_matches!(
            ThresholdSet::load(
                vec![
                    Threshold::greater_than("a", 1.0),
                    Threshold::greater_than("a", 2.0)
                ],
                0.0,
                10.0
            ),
            Err(CoreError::InvalidCatalog(_))
        );
        assert_matches!(
            ThresholdSet::load(vec![Threshold::greater_than("a", 11.0)], 0.0, 10.0),
            Err(CoreError::InvalidCatalog(_))
        );
        assert_matches!(
            ThresholdSet::load(vec![], 10.0, 0.0),
            Err(CoreError::Validation(_))
        );
    }
}
