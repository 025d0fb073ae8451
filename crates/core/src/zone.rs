//! Named geofence regions and the catalog that holds them.
//!
//! A [`ZoneCatalog`] is built in one go by [`ZoneCatalog::load`] and never
//! mutated afterwards. Updating the regions a monitor watches means loading
//! a fresh catalog and swapping it in whole, so an evaluation can never see
//! a half-applied change.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geo::{distance_meters, point_in_polygon};
use crate::types::Coordinate;

/// Geometry of a zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneShape {
    Circle {
        center: Coordinate,
        radius_meters: f64,
    },
    /// Implicitly closed ring; the first vertex need not be repeated.
    Polygon { vertices: Vec<Coordinate> },
}

/// A named region whose entry and exit are monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    #[serde(flatten)]
    pub shape: ZoneShape,
}

impl Zone {
    pub fn circle(name: impl Into<String>, center: Coordinate, radius_meters: f64) -> Self {
        Self {
            name: name.into(),
            shape: ZoneShape::Circle {
                center,
                radius_meters,
            },
        }
    }

    pub fn polygon(name: impl Into<String>, vertices: Vec<Coordinate>) -> Self {
        Self {
            name: name.into(),
            shape: ZoneShape::Polygon { vertices },
        }
    }

    /// Whether `point` lies inside this zone.
    pub fn contains(&self, point: Coordinate) -> bool {
        membership_test(self, point)
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidCatalog("zone name must not be empty".into()));
        }
        match &self.shape {
            ZoneShape::Circle {
                center,
                radius_meters,
            } => {
                center
                    .validate()
                    .map_err(|e| CoreError::InvalidCatalog(format!("zone '{}': {e}", self.name)))?;
                if !radius_meters.is_finite() || *radius_meters <= 0.0 {
                    return Err(CoreError::InvalidCatalog(format!(
                        "zone '{}': radius must be a positive number of metres, got {radius_meters}",
                        self.name
                    )));
                }
            }
            ZoneShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(CoreError::InvalidCatalog(format!(
                        "zone '{}': polygon needs at least 3 vertices, got {}",
                        self.name,
                        vertices.len()
                    )));
                }
                for v in vertices {
                    v.validate().map_err(|e| {
                        CoreError::InvalidCatalog(format!("zone '{}': {e}", self.name))
                    })?;
                }
            }
        }
        Ok(())
    }
}

/// Circle zones use great-circle distance to the centre (boundary counts as
/// inside); polygon zones delegate to ray casting.
pub fn membership_test(zone: &Zone, point: Coordinate) -> bool {
    match &zone.shape {
        ZoneShape::Circle {
            center,
            radius_meters,
        } => distance_meters(*center, point) <= *radius_meters,
        ZoneShape::Polygon { vertices } => point_in_polygon(point, vertices),
    }
}

// ---------------------------------------------------------------------------
// ZoneCatalog
// ---------------------------------------------------------------------------

/// Immutable, validated set of uniquely named zones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
}

impl ZoneCatalog {
    /// Validate and build a catalog.
    ///
    /// Fails with [`CoreError::InvalidCatalog`] on duplicate names or bad
    /// geometry. Nothing is partially applied on failure.
    pub fn load(zones: Vec<Zone>) -> Result<Self, CoreError> {
        let mut seen = HashSet::with_capacity(zones.len());
        for zone in &zones {
            zone.validate()?;
            if !seen.insert(zone.name.as_str()) {
                return Err(CoreError::InvalidCatalog(format!(
                    "duplicate zone name '{}'",
                    zone.name
                )));
            }
        }
        Ok(Self { zones })
    }

    /// Parse a JSON array of zones and validate it.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let zones: Vec<Zone> = serde_json::from_str(json)
            .map_err(|e| CoreError::InvalidCatalog(format!("unparseable zone list: {e}")))?;
        Self::load(zones)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn home() -> Zone {
        Zone::circle("home", Coordinate::new(48.8566, 2.3522), 100.0)
    }

    #[test]
    fn circle_boundary_counts_as_inside() {
        let zone = home();
        assert!(zone.contains(Coordinate::new(48.8566, 2.3522)));
        // ~100.08 m north: just outside.
        assert!(!zone.contains(Coordinate::new(48.8575, 2.3522)));
        // ~88.9 m north: inside.
        assert!(zone.contains(Coordinate::new(48.8574, 2.3522)));
    }

    #[test]
    fn circle_membership_is_monotonic_in_distance() {
        let zone = home();
        let mut was_inside = false;
        // Walk from 500 m north straight towards the centre.
        for step in (0..=50).rev() {
            let lat = 48.8566 + f64::from(step) * 0.0001 * 0.9;
            let inside = zone.contains(Coordinate::new(lat, 2.3522));
            assert!(
                !(was_inside && !inside),
                "membership flipped back to outside at step {step}"
            );
            was_inside = inside;
        }
        assert!(was_inside);
    }

    #[test]
    fn polygon_membership_delegates_to_ray_casting() {
        let zone = Zone::polygon(
            "square",
            vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(0.0, 10.0),
                Coordinate::new(10.0, 10.0),
                Coordinate::new(10.0, 0.0),
            ],
        );
        assert!(membership_test(&zone, Coordinate::new(5.0, 5.0)));
        assert!(!membership_test(&zone, Coordinate::new(20.0, 20.0)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = ZoneCatalog::load(vec![home(), home()]);
        assert_matches!(result, Err(CoreError::InvalidCatalog(msg)) if msg.contains("duplicate"));
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let bad_radius = Zone::circle("a", Coordinate::new(0.0, 0.0), 0.0);
        assert_matches!(
            ZoneCatalog::load(vec![bad_radius]),
            Err(CoreError::InvalidCatalog(_))
        );

        let bad_center = Zone::circle("b", Coordinate::new(95.0, 0.0), 10.0);
        assert_matches!(
            ZoneCatalog::load(vec![bad_center]),
            Err(CoreError::InvalidCatalog(_))
        );

        let thin = Zone::polygon("c", vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)]);
        assert_matches!(ZoneCatalog::load(vec![thin]), Err(CoreError::InvalidCatalog(_)));

        let unnamed = Zone::circle("  ", Coordinate::new(0.0, 0.0), 10.0);
        assert_matches!(
            ZoneCatalog::load(vec![unnamed]),
            Err(CoreError::InvalidCatalog(_))
        );
    }

    #[test]
    fn catalog_parses_tagged_json() {
        let catalog = ZoneCatalog::from_json(
            r#"[
                {"name": "work", "type": "circle",
                 "center": {"latitude": 45.0, "longitude": 5.0}, "radius_meters": 250.0},
                {"name": "commune", "type": "polygon",
                 "vertices": [{"latitude": 0.0, "longitude": 0.0},
                              {"latitude": 0.0, "longitude": 1.0},
                              {"latitude": 1.0, "longitude": 1.0}]}
            ]"#,
        )
        .expect("valid catalog json");

        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("work").is_some());
        assert_matches!(
            catalog.get("commune").map(|z| &z.shape),
            Some(ZoneShape::Polygon { vertices }) if vertices.len() == 3
        );
    }

    #[test]
    fn unparseable_json_is_an_invalid_catalog() {
        assert_matches!(
            ZoneCatalog::from_json("{not json"),
            Err(CoreError::InvalidCatalog(_))
        );
    }
}
