//! Geodesic helper functions for distance estimation.
//!
//! Provides the pure great-circle fallback used when no routing service is
//! configured or a routing lookup fails. Road distances are approximated by
//! scaling the great-circle distance with a fixed winding factor.

use crate::model::{GeoPoint, Leg};

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Ratio between typical road distance and great-circle distance.
pub const ROAD_WINDING_FACTOR: f64 = 1.3;

/// Great-circle distance between two coordinates in kilometres.
///
/// # Parameters
/// * `a` - first point
/// * `b` - second point
///
/// # Returns
/// Haversine distance in km, always >= 0.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Estimated drive time in minutes for a road distance.
///
/// # Parameters
/// * `distance_km` - road distance in km
/// * `avg_speed_kmh` - assumed average speed; guarded against zero
pub fn estimate_duration_min(distance_km: f64, avg_speed_kmh: f64) -> f64 {
    if avg_speed_kmh <= 0.0 {
        return 0.0;
    }
    distance_km / avg_speed_kmh * 60.0
}

/// Approximated driving leg between two points without a routing service.
///
/// Scales the great-circle distance by the road winding factor and derives a
/// duration from the assumed average speed.
pub fn fallback_leg(origin: GeoPoint, destination: GeoPoint, avg_speed_kmh: f64) -> Leg {
    let distance_km = haversine_km(origin, destination) * ROAD_WINDING_FACTOR;
    Leg {
        distance_km,
        duration_min: estimate_duration_min(distance_km, avg_speed_kmh),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_identical_points() {
        let p = GeoPoint::new(-36.8485, 174.7633);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn haversine_one_degree_on_equator() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        let d = haversine_km(a, b);
        // One degree of longitude on the equator is ~111.2 km.
        assert!((d - 111.195).abs() < 0.1, "got {}", d);
    }

    #[test]
    fn haversine_quarter_meridian() {
        let equator = GeoPoint::new(0.0, 0.0);
        let pole = GeoPoint::new(90.0, 0.0);
        let d = haversine_km(equator, pole);
        assert!((d - 10007.5).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = GeoPoint::new(-36.8485, 174.7633);
        let b = GeoPoint::new(-37.7870, 175.2793);
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn duration_estimate_guards_zero_speed() {
        assert_eq!(estimate_duration_min(10.0, 0.0), 0.0);
        assert!((estimate_duration_min(45.0, 45.0) - 60.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_leg_applies_winding_factor() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        let leg = fallback_leg(a, b, 45.0);
        assert!(leg.distance_km > haversine_km(a, b));
        assert!(leg.duration_min > 0.0);
    }
}
