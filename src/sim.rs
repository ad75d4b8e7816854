// sim.rs — Deterministic walk simulator
//
// Produces raw sensor streams for a flat-held phone carried along a list of
// legs, plus optional GPS fixes along the true path. Used by scenario tests
// and the synth_walk binary.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::geodesy::{local_to_latlon, normalize_degrees, wrap_angle};
use crate::session_log::SessionLog;
use crate::types::{LocalPoint, RawFix, SensorSample, Vec3};

const GRAVITY: f64 = 9.81;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    pub rate_hz: f64,
    pub cadence_hz: f64,
    /// Vertical acceleration swing while walking (m/s²)
    pub bounce_amplitude: f64,
    /// True distance covered per step (m)
    pub step_length_m: f64,
    pub turn_rate_deg_s: f64,
    pub field_horizontal_ut: f64,
    pub field_vertical_ut: f64,

    // ── GPS ──
    pub gps_interval_ms: Option<i64>,
    pub gps_accuracy_m: f32,
    pub origin_lat: f64,
    pub origin_lon: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            rate_hz: 50.0,
            cadence_hz: 2.0,
            bounce_amplitude: 2.5,
            step_length_m: 0.75,
            turn_rate_deg_s: 90.0,
            field_horizontal_ut: 20.0,
            field_vertical_ut: 40.0,
            gps_interval_ms: None,
            gps_accuracy_m: 4.0,
            origin_lat: 32.2226,
            origin_lon: -110.9747,
        }
    }
}

/// One straight segment; turns between legs are generated in place.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WalkLeg {
    pub heading_deg: f64,
    pub duration_s: f64,
    pub walking: bool,
}

impl WalkLeg {
    pub fn walk(heading_deg: f64, duration_s: f64) -> Self {
        Self { heading_deg, duration_s, walking: true }
    }

    pub fn pause(heading_deg: f64, duration_s: f64) -> Self {
        Self { heading_deg, duration_s, walking: false }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SimulatedWalk {
    pub samples: Vec<SensorSample>,
    pub fixes: Vec<RawFix>,
    /// True position at every sample
    pub truth: Vec<LocalPoint>,
}

impl SimulatedWalk {
    /// Interleave samples and fixes by timestamp.
    pub fn to_session_log(&self) -> SessionLog {
        let mut log = SessionLog::default();
        let mut fixes = self.fixes.iter().peekable();
        for sample in &self.samples {
            while let Some(fix) = fixes.next_if(|f| f.timestamp_ms <= sample.timestamp_ms) {
                log.push_fix(fix.clone());
            }
            log.push_sample(sample.clone());
        }
        for fix in fixes {
            log.push_fix(fix.clone());
        }
        log
    }

    pub fn end_point(&self) -> LocalPoint {
        self.truth.last().copied().unwrap_or_default()
    }
}

pub struct WalkSimulator {
    config: SimConfig,
    // Running state
    t: f64,
    heading: f64,
    position: LocalPoint,
    walking_time: f64,
    next_fix_ms: i64,
}

impl WalkSimulator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            t: 0.0,
            heading: 0.0,
            position: LocalPoint::ORIGIN,
            walking_time: 0.0,
            next_fix_ms: 0,
        }
    }

    pub fn run(&mut self, legs: &[WalkLeg]) -> SimulatedWalk {
        let mut out = SimulatedWalk::default();
        if let Some(first) = legs.first() {
            self.heading = first.heading_deg.to_radians();
        }
        for leg in legs {
            self.turn_to(leg.heading_deg.to_radians(), &mut out);
            let n = (leg.duration_s * self.config.rate_hz).round() as usize;
            for _ in 0..n {
                self.emit(leg.walking, 0.0, &mut out);
            }
        }
        out
    }

    fn turn_to(&mut self, target: f64, out: &mut SimulatedWalk) {
        let remaining = wrap_angle(target - self.heading);
        if remaining.abs() < 1e-9 {
            return;
        }
        let rate = self.config.turn_rate_deg_s.to_radians().copysign(remaining);
        let n = (remaining.abs() / rate.abs() * self.config.rate_hz).ceil() as usize;
        let per_sample = remaining / n as f64;
        let rate = per_sample * self.config.rate_hz;
        for _ in 0..n {
            self.heading = wrap_angle(self.heading + per_sample);
            self.emit(false, rate, out);
        }
        self.heading = target;
    }

    fn emit(&mut self, walking: bool, yaw_rate: f64, out: &mut SimulatedWalk) {
        let dt = 1.0 / self.config.rate_hz;
        let vertical = if walking {
            let phase = 2.0 * PI * self.config.cadence_hz * self.walking_time;
            self.walking_time += dt;
            GRAVITY + self.config.bounce_amplitude * phase.sin()
        } else {
            GRAVITY
        };

        let timestamp_ms = (self.t * 1000.0).round() as i64;
        out.samples.push(SensorSample {
            accel: Vec3::new(0.0, 0.0, vertical),
            gyro: Vec3::new(0.0, 0.0, yaw_rate),
            mag: self.field_in_device_frame(),
            timestamp_ms,
        });

        if walking {
            let speed = self.config.step_length_m * self.config.cadence_hz;
            self.position.x += speed * dt * self.heading.sin();
            self.position.y += speed * dt * self.heading.cos();
        }
        out.truth.push(self.position);

        if let Some(interval) = self.config.gps_interval_ms {
            if timestamp_ms >= self.next_fix_ms {
                out.fixes.push(self.fix_at(timestamp_ms, walking));
                self.next_fix_ms = timestamp_ms + interval;
            }
        }

        self.t += dt;
    }

    /// Geomagnetic field seen by a flat device whose top points at `heading`.
    fn field_in_device_frame(&self) -> Vec3 {
        let h = self.config.field_horizontal_ut;
        Vec3::new(-h * self.heading.sin(), h * self.heading.cos(), -self.config.field_vertical_ut)
    }

    fn fix_at(&self, timestamp_ms: i64, walking: bool) -> RawFix {
        let (lat, lon) = local_to_latlon(self.position, self.config.origin_lat, self.config.origin_lon);
        let speed = if walking { self.config.step_length_m * self.config.cadence_hz } else { 0.0 };
        RawFix {
            lat,
            lon,
            altitude: 0.0,
            accuracy_m: self.config.gps_accuracy_m,
            speed_mps: speed as f32,
            bearing_deg: normalize_degrees(self.heading.to_degrees()) as f32,
            timestamp_ms,
            satellites: 9,
        }
    }
}

impl Default for WalkSimulator {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

/// Legs for a `width` × `length` rectangle walked clockwise from the origin,
/// starting north.
pub fn rectangle_legs(width_m: f64, length_m: f64, speed_mps: f64) -> Vec<WalkLeg> {
    vec![
        WalkLeg::walk(0.0, length_m / speed_mps),
        WalkLeg::walk(90.0, width_m / speed_mps),
        WalkLeg::walk(180.0, length_m / speed_mps),
        WalkLeg::walk(270.0, width_m / speed_mps),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor_fusion::{FusionConfig, MeasurementSession};
    use approx::assert_abs_diff_eq;

    fn replay(walk: &SimulatedWalk, config: FusionConfig) -> MeasurementSession {
        let mut session = MeasurementSession::new(config);
        session.start();
        walk.to_session_log().replay(&mut session, |_| {});
        session
    }

    #[test]
    fn test_simulated_north_walk() {
        let walk = WalkSimulator::default().run(&[WalkLeg::walk(0.0, 10.0)]);
        assert_eq!(walk.samples.len(), 500);

        let session = replay(&walk, FusionConfig::default());
        let steps = session.step_count();
        assert!((18..=21).contains(&steps), "counted {steps} steps");

        let p = session.dead_reckoned_position();
        assert!(p.y > 10.0);
        assert!(p.x.abs() < 0.5);
        assert!(session.heading_deg() < 2.0 || session.heading_deg() > 358.0);
    }

    #[test]
    fn test_standing_still_counts_no_steps() {
        let walk = WalkSimulator::default().run(&[WalkLeg::pause(45.0, 5.0)]);
        let session = replay(&walk, FusionConfig::default());
        assert_eq!(session.step_count(), 0);
        assert_abs_diff_eq!(session.heading_deg(), 45.0, epsilon = 0.5);
    }

    #[test]
    fn test_turn_is_tracked() {
        let walk = WalkSimulator::default().run(&[WalkLeg::walk(0.0, 5.0), WalkLeg::walk(90.0, 5.0)]);
        let turning = walk.samples.iter().filter(|s| s.gyro.z > 0.0).count();
        assert_eq!(turning, 50);

        let session = replay(&walk, FusionConfig::default());
        assert!((session.heading_deg() - 90.0).abs() < 3.0);
        let p = session.dead_reckoned_position();
        assert!(p.x > 2.0 && p.y > 2.0);
    }

    #[test]
    fn test_simulated_rectangle_closes() {
        let walk = WalkSimulator::default().run(&rectangle_legs(10.0, 15.0, 1.5));
        assert_abs_diff_eq!(walk.end_point().x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(walk.end_point().y, 0.0, epsilon = 1e-6);

        let session = replay(&walk, FusionConfig::default());
        let result = session.finish();
        assert!(result.closed);
        assert!(result.trajectory.len() <= 8);
        assert!((64..=68).contains(&result.step_count), "counted {} steps", result.step_count);

        // The model strides about 0.82 m against 0.75 m walked, so the 150 m²
        // rectangle measures roughly 182 m²
        let per_step = result.path_length_m / result.step_count as f64;
        assert!((0.78..0.86).contains(&per_step), "{per_step} m per step");
        assert!((170.0..195.0).contains(&result.area_m2), "area {}", result.area_m2);
    }

    #[test]
    fn test_gps_fixes_follow_truth() {
        let config = SimConfig { gps_interval_ms: Some(1000), ..Default::default() };
        let walk = WalkSimulator::new(config).run(&[WalkLeg::walk(90.0, 10.0)]);
        assert_eq!(walk.fixes.len(), 10);
        assert!(walk.fixes.windows(2).all(|w| w[1].lon > w[0].lon));

        let session = replay(&walk, FusionConfig { use_gps: true, ..Default::default() });
        assert!(session.gps_available());
        let gps = session.last_fix().unwrap();
        assert!(gps.position.x > 10.0);
    }

    #[test]
    fn test_session_log_interleaves_by_time() {
        let config = SimConfig { gps_interval_ms: Some(500), ..Default::default() };
        let walk = WalkSimulator::new(config).run(&[WalkLeg::walk(0.0, 2.0)]);
        let log = walk.to_session_log();
        assert_eq!(log.readings.len(), walk.samples.len() + walk.fixes.len());
        assert!(log.readings[0].fix.is_some());
        assert!(log.readings[1].sample.is_some());
    }
}
