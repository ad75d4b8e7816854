use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filters::kalman_1d::ScalarKalmanFilter;
use crate::geodesy::{haversine_distance, latlon_to_local};
use crate::types::{GatedFix, RawFix};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsGateConfig {
    pub max_accuracy_m: f64,
    pub max_speed_mps: f64,
    /// Fixes closer together than this may not jump more than `max_jump_m`
    pub min_jump_interval_ms: i64,
    pub max_jump_m: f64,

    // ── Lat/lon smoothing ──
    pub smoothing_p: f64,
    pub smoothing_q: f64,
    pub smoothing_r: f64,
}

impl Default for GpsGateConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 20.0,
            max_speed_mps: 10.0,
            min_jump_interval_ms: 1000,
            max_jump_m: 10.0,
            smoothing_p: 1.0,
            smoothing_q: 0.00001,
            smoothing_r: 0.001,
        }
    }
}

/// Why a fix was dropped. Never fatal: the session carries on without it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixRejection {
    #[error("non-finite coordinates")]
    InvalidCoordinates,

    #[error("accuracy {accuracy_m:.1} m exceeds {limit_m:.1} m")]
    PoorAccuracy { accuracy_m: f64, limit_m: f64 },

    #[error("reported speed {speed_mps:.1} m/s exceeds {limit_mps:.1} m/s")]
    ExcessiveSpeed { speed_mps: f64, limit_mps: f64 },

    #[error("jumped {distance_m:.1} m in {dt_ms} ms")]
    Jump { distance_m: f64, dt_ms: i64 },

    #[error("implied speed {speed_mps:.1} m/s from previous fix exceeds {limit_mps:.1} m/s")]
    ImpliedSpeed { speed_mps: f64, limit_mps: f64 },
}

#[derive(Clone, Debug)]
struct CoordinateSmoother {
    lat: ScalarKalmanFilter,
    lon: ScalarKalmanFilter,
}

/// Plausibility gate and lat/lon smoother for raw location fixes.
///
/// The first accepted fix anchors the local frame. Plausibility is judged
/// against the last accepted raw fix.
pub struct GpsGate {
    config: GpsGateConfig,
    smoother: Option<CoordinateSmoother>,
    origin: Option<(f64, f64)>,
    last_valid: Option<RawFix>,
    accepted: u64,
    rejected: u64,
}

impl GpsGate {
    pub fn new(config: GpsGateConfig) -> Self {
        Self {
            config,
            smoother: None,
            origin: None,
            last_valid: None,
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn accept(&mut self, fix: &RawFix) -> Result<GatedFix, FixRejection> {
        if let Err(reason) = self.validate(fix) {
            self.rejected += 1;
            log::debug!("GPS fix rejected: {reason}");
            return Err(reason);
        }

        let (p, q, r) = (self.config.smoothing_p, self.config.smoothing_q, self.config.smoothing_r);
        let smoother = self.smoother.get_or_insert_with(|| CoordinateSmoother {
            lat: ScalarKalmanFilter::new(fix.lat, p, q, r),
            lon: ScalarKalmanFilter::new(fix.lon, p, q, r),
        });
        let lat = smoother.lat.filter(fix.lat);
        let lon = smoother.lon.filter(fix.lon);

        let (origin_lat, origin_lon) = *self.origin.get_or_insert_with(|| {
            log::info!("Local frame anchored at ({lat:.6}, {lon:.6})");
            (lat, lon)
        });

        self.last_valid = Some(fix.clone());
        self.accepted += 1;

        Ok(GatedFix {
            lat,
            lon,
            position: latlon_to_local(lat, lon, origin_lat, origin_lon),
            accuracy_m: fix.accuracy_m as f64,
            speed_mps: fix.speed_mps as f64,
            bearing_deg: fix.bearing_deg as f64,
            timestamp_ms: fix.timestamp_ms,
        })
    }

    fn validate(&self, fix: &RawFix) -> Result<(), FixRejection> {
        if !fix.lat.is_finite() || !fix.lon.is_finite() {
            return Err(FixRejection::InvalidCoordinates);
        }
        let accuracy = fix.accuracy_m as f64;
        if accuracy > self.config.max_accuracy_m {
            return Err(FixRejection::PoorAccuracy {
                accuracy_m: accuracy,
                limit_m: self.config.max_accuracy_m,
            });
        }
        let speed = fix.speed_mps as f64;
        if speed > self.config.max_speed_mps {
            return Err(FixRejection::ExcessiveSpeed {
                speed_mps: speed,
                limit_mps: self.config.max_speed_mps,
            });
        }

        let Some(prev) = &self.last_valid else {
            return Ok(());
        };
        let distance = haversine_distance(prev.lat, prev.lon, fix.lat, fix.lon);
        let dt_ms = fix.timestamp_ms - prev.timestamp_ms;
        if dt_ms < self.config.min_jump_interval_ms && distance > self.config.max_jump_m {
            return Err(FixRejection::Jump { distance_m: distance, dt_ms });
        }
        let implied_speed = if dt_ms > 0 {
            distance / (dt_ms as f64 / 1000.0)
        } else if distance > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        if implied_speed > self.config.max_speed_mps {
            return Err(FixRejection::ImpliedSpeed {
                speed_mps: implied_speed,
                limit_mps: self.config.max_speed_mps,
            });
        }
        Ok(())
    }

    /// Origin of the local frame, once a fix has been accepted.
    pub fn origin(&self) -> Option<(f64, f64)> {
        self.origin
    }

    pub fn last_valid_fix(&self) -> Option<&RawFix> {
        self.last_valid.as_ref()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Full reset: plausibility memory, smoothing filters and the local frame
    /// origin all start over with the next fix.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl Default for GpsGate {
    fn default() -> Self {
        Self::new(GpsGateConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const LAT0: f64 = 32.2;
    const LON0: f64 = -110.9;

    fn fix(lat: f64, lon: f64, accuracy: f32, speed: f32, ts: i64) -> RawFix {
        RawFix {
            lat,
            lon,
            altitude: 700.0,
            accuracy_m: accuracy,
            speed_mps: speed,
            bearing_deg: 0.0,
            timestamp_ms: ts,
            satellites: 9,
        }
    }

    /// Latitude offset for `meters` north of LAT0.
    fn north(meters: f64) -> f64 {
        LAT0 + (meters / crate::geodesy::EARTH_RADIUS_M).to_degrees()
    }

    #[test]
    fn test_first_fix_is_origin() {
        let mut gate = GpsGate::default();
        let gated = gate.accept(&fix(LAT0, LON0, 5.0, 0.0, 0)).unwrap();
        assert_abs_diff_eq!(gated.position.x, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(gated.position.y, 0.0, epsilon = 1e-9);
        assert_eq!(gate.origin(), Some((LAT0, LON0)));
    }

    #[test]
    fn test_rejects_poor_accuracy_and_speed() {
        let mut gate = GpsGate::default();
        assert!(matches!(
            gate.accept(&fix(LAT0, LON0, 25.0, 0.0, 0)),
            Err(FixRejection::PoorAccuracy { .. })
        ));
        assert!(matches!(
            gate.accept(&fix(LAT0, LON0, 5.0, 12.0, 0)),
            Err(FixRejection::ExcessiveSpeed { .. })
        ));
        assert_eq!(gate.rejected_count(), 2);
        assert!(gate.origin().is_none());
    }

    #[test]
    fn test_rejects_jump_within_one_second() {
        let mut gate = GpsGate::default();
        gate.accept(&fix(LAT0, LON0, 5.0, 0.0, 0)).unwrap();
        let result = gate.accept(&fix(north(15.0), LON0, 5.0, 1.0, 500));
        assert!(matches!(result, Err(FixRejection::Jump { .. })));
    }

    #[test]
    fn test_rejects_implausible_implied_speed() {
        let mut gate = GpsGate::default();
        gate.accept(&fix(LAT0, LON0, 5.0, 0.0, 0)).unwrap();
        let result = gate.accept(&fix(north(50.0), LON0, 5.0, 1.0, 2000));
        assert!(matches!(result, Err(FixRejection::ImpliedSpeed { .. })));
    }

    #[test]
    fn test_walking_pace_accepted_and_smoothed() {
        let mut gate = GpsGate::default();
        gate.accept(&fix(LAT0, LON0, 5.0, 0.0, 0)).unwrap();
        let gated = gate.accept(&fix(north(1.4), LON0, 5.0, 1.4, 1000)).unwrap();
        // Smoothed toward the new fix but not all the way
        assert!(gated.position.y > 0.0);
        assert!(gated.position.y <= 1.4);
        assert_eq!(gate.accepted_count(), 2);
    }

    #[test]
    fn test_reset_reanchors_frame() {
        let mut gate = GpsGate::default();
        gate.accept(&fix(LAT0, LON0, 5.0, 0.0, 0)).unwrap();
        gate.reset();
        assert!(gate.last_valid_fix().is_none());
        assert!(gate.origin().is_none());

        // A far-away fix would fail plausibility without the reset
        let gated = gate.accept(&fix(LAT0 + 1.0, LON0, 5.0, 0.0, 100)).unwrap();
        assert_abs_diff_eq!(gated.position.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejection_message() {
        let r = FixRejection::PoorAccuracy { accuracy_m: 25.0, limit_m: 20.0 };
        assert_eq!(r.to_string(), "accuracy 25.0 m exceeds 20.0 m");
    }
}
