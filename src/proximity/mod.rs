//! Proximity Evaluator
//!
//! Pure great-circle distance and zone classification. The only value that
//! drives the alarm is [`should_alarm`]; [`classify`] exists for display.

use crate::config::defaults::{CAUTION_ZONE_METERS, EARTH_RADIUS_KM, NEAR_ZONE_METERS};
use crate::types::{PositionSample, Zone};

/// Haversine distance between two fixes in metres.
///
/// Deterministic and symmetric; zero for identical coordinates.
pub fn distance_meters(a: &PositionSample, b: &PositionSample) -> f64 {
    haversine_meters(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Haversine distance between two coordinate pairs in metres.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards against h drifting past 1.0 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c * 1000.0
}

/// Presentational zone for a distance.
pub fn classify(distance_meters: f64) -> Zone {
    if distance_meters < NEAR_ZONE_METERS {
        Zone::Near
    } else if distance_meters < CAUTION_ZONE_METERS {
        Zone::Caution
    } else {
        Zone::Far
    }
}

/// Whether a distance is inside the alarm radius (strictly closer than `trigger_meters`).
pub fn should_alarm(distance_meters: f64, trigger_meters: f64) -> bool {
    distance_meters < trigger_meters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::ALARM_TRIGGER_METERS;

    fn at(lat: f64, lon: f64) -> PositionSample {
        PositionSample::new(lat, lon, 0)
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let p = at(51.5074, -0.1278);
        assert_eq!(distance_meters(&p, &p), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = at(10.0, 10.0);
        let b = at(-33.8688, 151.2093);
        let ab = distance_meters(&a, &b);
        let ba = distance_meters(&b, &a);
        assert!((ab - ba).abs() < 1e-6, "ab={ab} ba={ba}");
    }

    #[test]
    fn one_degree_of_longitude_on_the_equator() {
        let d = distance_meters(&at(0.0, 0.0), &at(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn half_a_hundredth_degree_of_latitude_is_under_a_kilometre() {
        let d = distance_meters(&at(10.0, 10.0), &at(10.005, 10.0));
        assert!(d > 500.0 && d < 600.0, "got {d}");
        assert!(should_alarm(d, ALARM_TRIGGER_METERS));
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let d = distance_meters(&at(0.0, 0.0), &at(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM * 1000.0).abs() < 1.0);
    }

    #[test]
    fn zone_boundaries() {
        assert_eq!(classify(0.0), Zone::Near);
        assert_eq!(classify(499.9), Zone::Near);
        assert_eq!(classify(500.0), Zone::Caution);
        assert_eq!(classify(999.9), Zone::Caution);
        assert_eq!(classify(1000.0), Zone::Far);
    }

    #[test]
    fn alarm_threshold_is_strict() {
        assert!(should_alarm(999.99, 1000.0));
        assert!(!should_alarm(1000.0, 1000.0));
    }
}
