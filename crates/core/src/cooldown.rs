//! Alert debouncing.
//!
//! The evaluator only produces candidates on a real transition; the
//! [`Debouncer`] additionally suppresses candidates that repeat within a
//! cooldown window, which absorbs jitter around a zone boundary or a
//! threshold.

use std::collections::HashMap;
use std::time::Duration;

use crate::alert::{AlertEvent, AlertKind};
use crate::types::Timestamp;

/// Key under which the last admission time is recorded.
///
/// `kind` is `None` when the monitor collapses Entered/Left (or
/// Exceeded/Recovered) into a single notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub subject: String,
    pub kind: Option<AlertKind>,
}

/// Tracks the last admitted alert per subject (and kind) to suppress
/// repeats inside the cooldown window.
#[derive(Debug, Default)]
pub struct Debouncer {
    last_fired: HashMap<CooldownKey, Timestamp>,
    collapse_transitions: bool,
}

impl Debouncer {
    /// Create a debouncer keyed by `(subject, kind)`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a debouncer keyed by subject only, so an `Entered` and the
    /// following `Left` share one cooldown.
    pub fn collapsed() -> Self {
        Self {
            last_fired: HashMap::new(),
            collapse_transitions: true,
        }
    }

    fn key_for(&self, event: &AlertEvent) -> CooldownKey {
        CooldownKey {
            subject: event.subject_name.clone(),
            kind: (!self.collapse_transitions).then_some(event.kind),
        }
    }

    /// Decide whether `event` should be emitted at `now`, recording it if so.
    ///
    /// Admitted when no prior record exists for the key or when at least
    /// `cooldown` has elapsed since the last admission. A clock that went
    /// backwards counts as "not yet elapsed".
    pub fn admit(&mut self, event: &AlertEvent, now: Timestamp, cooldown: Duration) -> bool {
        let key = self.key_for(event);
        if let Some(last) = self.last_fired.get(&key) {
            let elapsed = now.signed_duration_since(*last);
            let within = match elapsed.to_std() {
                Ok(elapsed) => elapsed < cooldown,
                Err(_) => true,
            };
            if within {
                return false;
            }
        }
        self.last_fired.insert(key, now);
        true
    }

    /// When the key for `event` was last admitted.
    pub fn last_fired(&self, event: &AlertEvent) -> Option<Timestamp> {
        self.last_fired.get(&self.key_for(event)).copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinate, Observation};
    use chrono::{TimeZone, Utc};

    const COOLDOWN: Duration = Duration::from_secs(5);

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn event(kind: AlertKind, subject: &str) -> AlertEvent {
        let obs = Observation::position(Coordinate::new(0.0, 0.0), at(0));
        AlertEvent::new(kind, subject, obs, "test")
    }

    #[test]
    fn first_event_is_admitted() {
        let mut d = Debouncer::new();
        assert!(d.admit(&event(AlertKind::Entered, "home"), at(0), COOLDOWN));
    }

    #[test]
    fn repeat_inside_cooldown_is_suppressed_then_admitted() {
        let mut d = Debouncer::new();
        let e = event(AlertKind::AnomalyDetected, "magnetic");
        assert!(d.admit(&e, at(0), COOLDOWN));
        assert!(!d.admit(&e, at(3), COOLDOWN));
        assert!(d.admit(&e, at(6), COOLDOWN));
    }

    #[test]
    fn suppressed_event_does_not_extend_the_window() {
        let mut d = Debouncer::new();
        let e = event(AlertKind::AnomalyDetected, "magnetic");
        assert!(d.admit(&e, at(0), COOLDOWN));
        assert!(!d.admit(&e, at(4), COOLDOWN));
        assert!(d.admit(&e, at(5), COOLDOWN));
        assert_eq!(d.last_fired(&e), Some(at(5)));
    }

    #[test]
    fn left_is_not_suppressed_by_entered_cooldown() {
        let mut d = Debouncer::new();
        assert!(d.admit(&event(AlertKind::Entered, "home"), at(0), COOLDOWN));
        assert!(d.admit(&event(AlertKind::Left, "home"), at(1), COOLDOWN));
    }

    #[test]
    fn collapsed_mode_shares_one_window_per_subject() {
        let mut d = Debouncer::collapsed();
        assert!(d.admit(&event(AlertKind::Entered, "home"), at(0), COOLDOWN));
        assert!(!d.admit(&event(AlertKind::Left, "home"), at(1), COOLDOWN));
        assert!(d.admit(&event(AlertKind::Left, "work"), at(1), COOLDOWN));
    }

    #[test]
    fn subjects_are_independent() {
        let mut d = Debouncer::new();
        assert!(d.admit(&event(AlertKind::Entered, "home"), at(0), COOLDOWN));
        assert!(d.admit(&event(AlertKind::Entered, "work"), at(0), COOLDOWN));
    }

    #[test]
    fn clock_going_backwards_is_treated_as_within_cooldown() {
        let mut d = Debouncer::new();
        let e = event(AlertKind::Entered, "home");
        assert!(d.admit(&e, at(10), COOLDOWN));
        assert!(!d.admit(&e, at(2), COOLDOWN));
    }
}
