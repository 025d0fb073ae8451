//! Spherical geometry helpers.
//!
//! Pure functions with no state and no failure modes. Distances use the
//! Haversine formula on a sphere of mean Earth radius; polygon containment
//! uses ray casting on latitude/longitude treated as a flat plane, which is
//! adequate for the neighbourhood-sized regions the monitor deals with.

use crate::types::Coordinate;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in metres.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push `h` a hair above 1 for antipodal points.
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Average ground speed between two fixes in metres per second.
///
/// Returns `None` when the fixes are not strictly ordered in time.
pub fn speed_mps(a: Coordinate, b: Coordinate, elapsed_secs: f64) -> Option<f64> {
    if elapsed_secs.is_nan() || elapsed_secs <= 0.0 {
        return None;
    }
    Some(distance_meters(a, b) / elapsed_secs)
}

/// Ray-casting point-in-polygon test using the odd-even rule.
///
/// The vertex list is an implicitly closed ring: the last vertex connects
/// back to the first. Fewer than three vertices always yields `false`.
/// Points lying exactly on an edge may report either result.
pub fn point_in_polygon(p: Coordinate, vertices: &[Coordinate]) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    // x = longitude, y = latitude.
    let (px, py) = (p.longitude, p.latitude);
    let mut inside = false;
    let mut j = vertices.len() - 1;

    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].longitude, vertices[i].latitude);
        let (xj, yj) = (vertices[j].longitude, vertices[j].latitude);

        if (yi > py) != (yj > py) {
            let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}
