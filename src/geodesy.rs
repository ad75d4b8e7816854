//! Small geodesy helpers shared by the GPS gate and the simulator.
//!
//! Everything uses a spherical earth; at walking scale the equirectangular
//! projection error is far below GPS noise.

use std::f64::consts::PI;

use crate::types::LocalPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Project `(lat, lon)` onto the plane tangent at `(origin_lat, origin_lon)`.
pub fn latlon_to_local(lat: f64, lon: f64, origin_lat: f64, origin_lon: f64) -> LocalPoint {
    let d_lat = (lat - origin_lat).to_radians();
    let d_lon = (lon - origin_lon).to_radians();
    LocalPoint {
        x: EARTH_RADIUS_M * origin_lat.to_radians().cos() * d_lon,
        y: EARTH_RADIUS_M * d_lat,
    }
}

/// Inverse of [`latlon_to_local`].
pub fn local_to_latlon(point: LocalPoint, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = point.y / EARTH_RADIUS_M;
    let d_lon = point.x / (EARTH_RADIUS_M * origin_lat.to_radians().cos());
    (origin_lat + d_lat.to_degrees(), origin_lon + d_lon.to_degrees())
}

pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial great-circle bearing from point 1 to point 2, degrees clockwise
/// from north in [0, 360).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let numerator = d_lon.sin() * lat2_rad.cos();
    let denominator =
        lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * d_lon.cos();
    normalize_degrees(numerator.atan2(denominator).to_degrees())
}

/// Wrap an angle in radians to (-π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}

/// Normalize an angle in degrees to [0, 360).
pub fn normalize_degrees(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_projection_roundtrip_near_origin() {
        let (lat0, lon0) = (47.6062, -122.3321);
        let p = latlon_to_local(47.6072, -122.3301, lat0, lon0);
        assert!(p.x > 0.0 && p.y > 0.0);
        let (lat, lon) = local_to_latlon(p, lat0, lon0);
        assert_abs_diff_eq!(lat, 47.6072, epsilon = 1e-9);
        assert_abs_diff_eq!(lon, -122.3301, epsilon = 1e-9);
    }

    #[test]
    fn test_haversine_matches_projection_at_short_range() {
        let (lat0, lon0) = (32.2, -110.9);
        let (lat1, lon1) = (32.2005, -110.9004);
        let planar = latlon_to_local(lat1, lon1, lat0, lon0);
        let d = haversine_distance(lat0, lon0, lat1, lon1);
        assert_abs_diff_eq!(d, planar.x.hypot(planar.y), epsilon = 0.05);
    }

    #[test]
    fn test_bearing_cardinals() {
        assert_abs_diff_eq!(initial_bearing_deg(0.0, 0.0, 1.0, 0.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(initial_bearing_deg(0.0, 0.0, 0.0, 1.0), 90.0, epsilon = 1e-6);
        assert_abs_diff_eq!(initial_bearing_deg(0.0, 0.0, -1.0, 0.0), 180.0, epsilon = 1e-6);
        assert_abs_diff_eq!(initial_bearing_deg(0.0, 0.0, 0.0, -1.0), 270.0, epsilon = 1e-6);
    }

    #[test]
    fn test_wrap_angle_range() {
        assert_abs_diff_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(-PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(wrap_angle(0.25), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_degrees() {
        assert_abs_diff_eq!(normalize_degrees(-90.0), 270.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_degrees(720.5), 0.5, epsilon = 1e-9);
        assert!(normalize_degrees(-1e-15) < 360.0);
    }
}
