//! Spatial math for route lengths, endpoint matching and time windows.

use crate::models::LngLat;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Points closer than this are treated as the same place (~11 m).
pub const COORD_TOLERANCE_KM: f64 = 0.011;

/// Haversine distance in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Sum of great-circle legs along a coordinate chain.
pub fn polyline_length_km(points: &[LngLat]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].distance_km(&pair[1]))
        .sum()
}

/// Append `points` to `chain`, skipping the first point if it duplicates the tail.
pub fn extend_chain(chain: &mut Vec<LngLat>, points: &[LngLat]) {
    let mut iter = points.iter().copied().peekable();
    if let (Some(last), Some(first)) = (chain.last(), iter.peek()) {
        if last.close_to(first) {
            iter.next();
        }
    }
    chain.extend(iter);
}

/// Length of the intersection of two half-open intervals, zero if disjoint.
pub fn interval_overlap(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.1.min(b.1) - a.0.max(b.0)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        // Test known distance: approx 111km per degree of latitude
        let dist = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111.2).abs() < 1.0);
    }

    #[test]
    fn extend_chain_drops_shared_joint() {
        let mut chain = vec![LngLat(74.0, 34.0), LngLat(74.5, 34.1)];
        extend_chain(&mut chain, &[LngLat(74.5, 34.1), LngLat(75.0, 34.2)]);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn overlap_is_zero_for_touching_intervals() {
        assert_eq!(interval_overlap((0.0, 1.0), (1.0, 2.0)), 0.0);
        assert!((interval_overlap((0.0, 2.0), (1.0, 3.0)) - 1.0).abs() < 1e-9);
    }
}
