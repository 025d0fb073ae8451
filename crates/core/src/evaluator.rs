//! Membership state-transition function.
//!
//! Given one observation, the prior membership state and the active
//! [`Strategy`], decide the new membership of every subject (zone or
//! threshold) and produce a candidate [`AlertEvent`] for every subject
//! whose membership flipped. Re-evaluating an unchanged membership never
//! produces a candidate.
//!
//! Scalar strategies compare the moving-average filtered value, not the
//! raw sample, and report [`Membership::Unknown`] until the filter window
//! has filled (and, for anomaly detection, until a baseline is calibrated).
//!
//! A threshold monitor fed positions instead of scalars treats the ground
//! speed between consecutive fixes as its sample.

use std::collections::HashMap;

use crate::alert::{AlertEvent, AlertKind};
use crate::error::CoreError;
use crate::geo::speed_mps;
use crate::smoothing::MovingAverage;
use crate::threshold::ThresholdSet;
use crate::types::{Coordinate, Observation, Reading, Timestamp};
use crate::zone::ZoneCatalog;

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Membership of a single subject.
///
/// For zones `Inside` means "currently inside"; for thresholds it means
/// "currently over".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
    /// No meaningful comparison yet (filter warming up, no baseline).
    #[default]
    Unknown,
    Inside,
    Outside,
}

impl Membership {
    fn from_bool(inside: bool) -> Self {
        if inside {
            Self::Inside
        } else {
            Self::Outside
        }
    }

    pub fn is_inside(self) -> bool {
        self == Self::Inside
    }
}

/// Mapping from subject name to membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipState {
    entries: HashMap<String, Membership>,
}

impl MembershipState {
    pub fn get(&self, subject: &str) -> Option<Membership> {
        self.entries.get(subject).copied()
    }

    pub fn is_inside(&self, subject: &str) -> bool {
        self.get(subject).is_some_and(Membership::is_inside)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Membership)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, subject: &str, membership: Membership) {
        self.entries.insert(subject.to_string(), membership);
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// What a monitor evaluates its samples against.
///
/// Strategies are immutable; calibration and threshold adjustments return a
/// new value that the monitor swaps in whole.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Entry/exit of named geographic regions.
    LocationZone { catalog: ZoneCatalog },
    /// Filtered scalar above fixed limits (speed, noise level, ...).
    ScalarThreshold { thresholds: ThresholdSet },
    /// Filtered scalar deviating from a calibrated baseline by more than
    /// each limit (magnetic-field anomaly, shake magnitude, ...).
    AnomalyBaseline {
        thresholds: ThresholdSet,
        baseline: Option<f64>,
    },
}

impl Strategy {
    /// Membership every subject starts with when a monitor starts.
    pub fn initial_state(&self) -> MembershipState {
        let mut state = MembershipState::default();
        match self {
            Self::LocationZone { catalog } => {
                for zone in catalog.zones() {
                    state.insert(&zone.name, Membership::Outside);
                }
            }
            Self::ScalarThreshold { thresholds } | Self::AnomalyBaseline { thresholds, .. } => {
                for t in thresholds.thresholds() {
                    state.insert(&t.name, Membership::Unknown);
                }
            }
        }
        state
    }

    /// Names of every subject this strategy evaluates.
    pub fn subjects(&self) -> Vec<&str> {
        match self {
            Self::LocationZone { catalog } => {
                catalog.zones().iter().map(|z| z.name.as_str()).collect()
            }
            Self::ScalarThreshold { thresholds } | Self::AnomalyBaseline { thresholds, .. } => {
                thresholds
                    .thresholds()
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect()
            }
        }
    }

    /// Return a copy with `baseline` established.
    pub fn calibrate(&self, baseline: f64) -> Result<Self, CoreError> {
        match self {
            Self::AnomalyBaseline { thresholds, .. } => {
                if !baseline.is_finite() {
                    return Err(CoreError::Validation(format!(
                        "baseline must be finite, got {baseline}"
                    )));
                }
                Ok(Self::AnomalyBaseline {
                    thresholds: thresholds.clone(),
                    baseline: Some(baseline),
                })
            }
            _ => Err(CoreError::Validation(
                "only anomaly monitors can be calibrated".into(),
            )),
        }
    }

    /// Return a copy with threshold `name` moved to `value`.
    pub fn with_threshold(&self, name: &str, value: f64) -> Result<Self, CoreError> {
        match self {
            Self::ScalarThreshold { thresholds } => Ok(Self::ScalarThreshold {
                thresholds: thresholds.with_value(name, value)?,
            }),
            Self::AnomalyBaseline {
                thresholds,
                baseline,
            } => Ok(Self::AnomalyBaseline {
                thresholds: thresholds.with_value(name, value)?,
                baseline: *baseline,
            }),
            Self::LocationZone { .. } => Err(CoreError::Validation(
                "zone monitors have no adjustable thresholds".into(),
            )),
        }
    }

    /// Return a copy watching `catalog` instead.
    pub fn with_catalog(&self, catalog: ZoneCatalog) -> Result<Self, CoreError> {
        match self {
            Self::LocationZone { .. } => Ok(Self::LocationZone { catalog }),
            _ => Err(CoreError::InvalidCatalog(
                "only zone monitors accept a zone catalog".into(),
            )),
        }
    }

    pub fn is_location(&self) -> bool {
        matches!(self, Self::LocationZone { .. })
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Result of evaluating one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub state: MembershipState,
    pub events: Vec<AlertEvent>,
}

/// Evaluate `observation` against `strategy`.
///
/// `filter` is the moving-average window of the scalar stream; it is only
/// advanced for a valid scalar sample. Malformed samples are rejected with
/// [`CoreError::MalformedObservation`] and leave `filter` untouched.
pub fn evaluate(
    observation: &Observation,
    prior: &MembershipState,
    strategy: &Strategy,
    filter: &mut MovingAverage,
) -> Result<Evaluation, CoreError> {
    observation.validate()?;

    match (strategy, observation.reading) {
        (Strategy::LocationZone { catalog }, Reading::Position(point)) => {
            Ok(evaluate_zones(observation, point, prior, catalog))
        }
        (Strategy::ScalarThreshold { thresholds }, Reading::Scalar(value)) => {
            filter.push(value);
            Ok(evaluate_thresholds(
                observation,
                filter.settled_mean(),
                prior,
                thresholds,
            ))
        }
        (
            Strategy::AnomalyBaseline {
                thresholds,
                baseline,
            },
            Reading::Scalar(value),
        ) => {
            let Some(baseline) = *baseline else {
                return Ok(Evaluation {
                    state: strategy.initial_state(),
                    events: Vec::new(),
                });
            };
            filter.push(value);
            Ok(evaluate_anomaly(
                observation,
                filter.settled_mean(),
                baseline,
                prior,
                thresholds,
            ))
        }
        (Strategy::LocationZone { .. }, Reading::Scalar(_)) => Err(
            CoreError::MalformedObservation("zone monitor received a scalar reading".into()),
        ),
        (_, Reading::Position(_)) => Err(CoreError::MalformedObservation(
            "scalar monitor received a position reading".into(),
        )),
    }
}

fn evaluate_zones(
    observation: &Observation,
    point: Coordinate,
    prior: &MembershipState,
    catalog: &ZoneCatalog,
) -> Evaluation {
    let mut state = MembershipState::default();
    let mut events = Vec::new();

    for zone in catalog.zones() {
        let was_inside = prior.is_inside(&zone.name);
        let inside = zone.contains(point);
        state.insert(&zone.name, Membership::from_bool(inside));

        match (was_inside, inside) {
            (false, true) => events.push(AlertEvent::new(
                AlertKind::Entered,
                &zone.name,
                *observation,
                format!("Entered zone '{}'", zone.name),
            )),
            (true, false) => events.push(AlertEvent::new(
                AlertKind::Left,
                &zone.name,
                *observation,
                format!("Left zone '{}'", zone.name),
            )),
            _ => {}
        }
    }

    Evaluation { state, events }
}

fn evaluate_thresholds(
    observation: &Observation,
    filtered: Option<f64>,
    prior: &MembershipState,
    thresholds: &ThresholdSet,
) -> Evaluation {
    let mut state = MembershipState::default();
    let mut events = Vec::new();

    for t in thresholds.thresholds() {
        let before = prior.get(&t.name).unwrap_or_default();
        let Some(value) = filtered else {
            state.insert(&t.name, before);
            continue;
        };

        let now = Membership::from_bool(t.is_over(value));
        state.insert(&t.name, now);

        match (before, now) {
            (Membership::Unknown | Membership::Outside, Membership::Inside) => {
                events.push(AlertEvent::new(
                    AlertKind::ThresholdExceeded,
                    &t.name,
                    *observation,
                    format!("'{}' above {} (filtered {value:.2})", t.name, t.value),
                ));
            }
            (Membership::Inside, Membership::Outside) => {
                events.push(AlertEvent::new(
                    AlertKind::ThresholdRecovered,
                    &t.name,
                    *observation,
                    format!("'{}' back below {} (filtered {value:.2})", t.name, t.value),
                ));
            }
            _ => {}
        }
    }

    Evaluation { state, events }
}

fn evaluate_anomaly(
    observation: &Observation,
    filtered: Option<f64>,
    baseline: f64,
    prior: &MembershipState,
    thresholds: &ThresholdSet,
) -> Evaluation {
    let mut state = MembershipState::default();
    let mut events = Vec::new();

    for t in thresholds.thresholds() {
        let before = prior.get(&t.name).unwrap_or_default();
        let Some(value) = filtered else {
            state.insert(&t.name, before);
            continue;
        };

        let deviation = (value - baseline).abs();
        let now = Membership::from_bool(t.is_over(deviation));
        state.insert(&t.name, now);

        match (before, now) {
            (Membership::Unknown | Membership::Outside, Membership::Inside) => {
                events.push(AlertEvent::new(
                    AlertKind::AnomalyDetected,
                    &t.name,
                    *observation,
                    format!(
                        "'{}' deviates {deviation:.2} from baseline {baseline:.2} (limit {})",
                        t.name, t.value
                    ),
                ));
            }
            (Membership::Inside, Membership::Outside) => {
                events.push(AlertEvent::new(
                    AlertKind::ThresholdRecovered,
                    &t.name,
                    *observation,
                    format!("'{}' back within {} of baseline", t.name, t.value),
                ));
            }
            _ => {}
        }
    }

    Evaluation { state, events }
}

// ---------------------------------------------------------------------------
// EvaluatorState
// ---------------------------------------------------------------------------

/// Mutable evaluation state owned by exactly one monitor loop.
///
/// Bundles the membership map with the scalar filter so a single
/// [`apply`](EvaluatorState::apply) call is the only place either changes.
#[derive(Debug, Clone)]
pub struct EvaluatorState {
    membership: MembershipState,
    filter: MovingAverage,
    /// Last accepted fix of a threshold monitor deriving speed from positions.
    last_fix: Option<(Coordinate, Timestamp)>,
}

impl EvaluatorState {
    pub fn new(strategy: &Strategy, window: usize) -> Self {
        Self {
            membership: strategy.initial_state(),
            filter: MovingAverage::new(window),
            last_fix: None,
        }
    }

    /// Evaluate and commit. On error nothing is modified.
    pub fn apply(
        &mut self,
        observation: &Observation,
        strategy: &Strategy,
    ) -> Result<Vec<AlertEvent>, CoreError> {
        if let (Strategy::ScalarThreshold { .. }, Reading::Position(point)) =
            (strategy, observation.reading)
        {
            return self.apply_fix(observation, point, strategy);
        }
        let evaluation = evaluate(observation, &self.membership, strategy, &mut self.filter)?;
        self.membership = evaluation.state;
        Ok(evaluation.events)
    }

    /// Turn a position into the ground speed since the previous fix and
    /// evaluate that. The first fix only primes the state.
    fn apply_fix(
        &mut self,
        observation: &Observation,
        point: Coordinate,
        strategy: &Strategy,
    ) -> Result<Vec<AlertEvent>, CoreError> {
        observation.validate()?;
        let Some((previous, previous_at)) = self.last_fix else {
            self.last_fix = Some((point, observation.timestamp));
            return Ok(Vec::new());
        };

        let elapsed_secs =
            (observation.timestamp - previous_at).num_milliseconds() as f64 / 1000.0;
        let speed = speed_mps(previous, point, elapsed_secs).ok_or_else(|| {
            CoreError::MalformedObservation(format!(
                "fix at {} is not after the previous fix at {previous_at}",
                observation.timestamp
            ))
        })?;

        let derived = Observation::scalar(speed, observation.timestamp);
        let evaluation = evaluate(&derived, &self.membership, strategy, &mut self.filter)?;
        self.membership = evaluation.state;
        self.last_fix = Some((point, observation.timestamp));

        Ok(evaluation
            .events
            .into_iter()
            .map(|mut event| {
                event.observation = *observation;
                event
            })
            .collect())
    }

    pub fn membership(&self) -> &MembershipState {
        &self.membership
    }

    pub fn filtered_value(&self) -> Option<f64> {
        self.filter.mean()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
