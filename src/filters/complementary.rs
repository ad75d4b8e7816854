use serde::{Deserialize, Serialize};

use crate::geodesy::{normalize_degrees, wrap_angle};
use crate::types::Vec3;

/// Anything that turns filtered IMU samples into a compass heading.
///
/// Headings are degrees clockwise from north in [0, 360).
pub trait HeadingEstimator {
    /// Feed one filtered sample and return the updated heading in degrees.
    fn update(&mut self, accel: &Vec3, mag: &Vec3, gyro: &Vec3, timestamp_ms: i64) -> f64;

    /// Soft-correct the gyro heading toward a GPS course. Returns whether the
    /// correction was applied.
    fn calibrate_with_gps(&mut self, bearing_deg: f64) -> bool;

    fn heading_deg(&self) -> f64;

    fn is_magnetically_disturbed(&self) -> bool;

    fn reset(&mut self);
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplementaryHeadingConfig {
    /// Sum of per-axis magnetometer deltas that flags a disturbance
    pub disturbance_threshold: f64,
    /// Fraction of the mag/gyro difference folded into the gyro heading per sample
    pub drift_correction: f64,
    /// Gyro weight in the output blend
    pub alpha: f64,
    /// Gyro weight while the magnetometer is disturbed
    pub alpha_disturbed: f64,
    /// GPS corrections at or above this angle (rad) are rejected
    pub gps_max_correction: f64,
    pub gps_correction_gain: f64,
}

impl Default for ComplementaryHeadingConfig {
    fn default() -> Self {
        Self {
            disturbance_threshold: 5.0,
            drift_correction: 0.01,
            alpha: 0.98,
            alpha_disturbed: 0.99,
            gps_max_correction: std::f64::consts::FRAC_PI_4,
            gps_correction_gain: 0.3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplementaryHeadingState {
    pub heading_deg: f64,
    pub gyro_heading_deg: f64,
    pub mag_heading_deg: Option<f64>,
    pub magnetically_disturbed: bool,
}

/// Complementary filter: gyro integration for short-term rotation, the
/// tilt-compensated magnetometer for long-term north.
pub struct ComplementaryHeading {
    config: ComplementaryHeadingConfig,

    // Integrated gyro heading, rad in (-π, π]
    gyro_integration: f64,
    heading: f64,
    last_mag_heading: Option<f64>,

    last_mag: Option<Vec3>,
    last_timestamp_ms: Option<i64>,
    disturbed: bool,
    seeded: bool,
}

impl ComplementaryHeading {
    pub fn new(config: ComplementaryHeadingConfig) -> Self {
        Self {
            config,
            gyro_integration: 0.0,
            heading: 0.0,
            last_mag_heading: None,
            last_mag: None,
            last_timestamp_ms: None,
            disturbed: false,
            seeded: false,
        }
    }

    pub fn get_state(&self) -> ComplementaryHeadingState {
        ComplementaryHeadingState {
            heading_deg: self.heading_deg(),
            gyro_heading_deg: normalize_degrees(self.gyro_integration.to_degrees()),
            mag_heading_deg: self.last_mag_heading.map(|h| normalize_degrees(h.to_degrees())),
            magnetically_disturbed: self.disturbed,
        }
    }

    fn detect_disturbance(&mut self, mag: &Vec3) -> bool {
        let disturbed = match self.last_mag {
            Some(prev) => (mag - prev).abs().sum() > self.config.disturbance_threshold,
            None => false,
        };
        self.last_mag = Some(*mag);
        disturbed
    }
}

impl Default for ComplementaryHeading {
    fn default() -> Self {
        Self::new(ComplementaryHeadingConfig::default())
    }
}

impl HeadingEstimator for ComplementaryHeading {
    fn update(&mut self, accel: &Vec3, mag: &Vec3, gyro: &Vec3, timestamp_ms: i64) -> f64 {
        self.disturbed = self.detect_disturbance(mag);

        let mag_heading = tilt_compensated_heading(accel, mag);
        self.last_mag_heading = mag_heading;

        let dt = match self.last_timestamp_ms {
            Some(prev) => ((timestamp_ms - prev) as f64 / 1000.0).max(0.0),
            None => 0.0,
        };
        self.last_timestamp_ms = Some(timestamp_ms);

        // Start the gyro integration at magnetic north instead of at zero
        if !self.seeded {
            if let Some(m) = mag_heading {
                self.gyro_integration = m;
                self.seeded = true;
            }
        }

        self.gyro_integration = wrap_angle(self.gyro_integration + gyro.z * dt);

        self.heading = match mag_heading {
            Some(m) => {
                if !self.disturbed {
                    let diff = wrap_angle(m - self.gyro_integration);
                    self.gyro_integration =
                        wrap_angle(self.gyro_integration + self.config.drift_correction * diff);
                }
                let alpha = if self.disturbed {
                    self.config.alpha_disturbed
                } else {
                    self.config.alpha
                };
                // Blend on the circle so 359° and 1° average to 0°, not 180°
                self.gyro_integration + (1.0 - alpha) * wrap_angle(m - self.gyro_integration)
            }
            None => self.gyro_integration,
        };

        self.heading_deg()
    }

    fn calibrate_with_gps(&mut self, bearing_deg: f64) -> bool {
        let diff = wrap_angle(bearing_deg.to_radians() - self.gyro_integration);
        if diff.abs() >= self.config.gps_max_correction {
            log::debug!(
                "GPS heading correction rejected: {:.1}° off gyro heading",
                diff.to_degrees()
            );
            return false;
        }
        self.gyro_integration = wrap_angle(self.gyro_integration + self.config.gps_correction_gain * diff);
        true
    }

    fn heading_deg(&self) -> f64 {
        normalize_degrees(self.heading.to_degrees())
    }

    fn is_magnetically_disturbed(&self) -> bool {
        self.disturbed
    }

    fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

/// Tilt-compensated magnetic heading in radians (0 = north, clockwise).
///
/// Builds the device-to-world rotation from gravity and the geomagnetic
/// field: east = mag × gravity, north = gravity × east, heading =
/// atan2(east.y, north.y). Returns `None` when the device is in free fall or
/// the field is parallel to gravity, where the east axis is undefined.
pub fn tilt_compensated_heading(accel: &Vec3, mag: &Vec3) -> Option<f64> {
    const MIN_EAST_NORM: f64 = 0.1;

    let accel_norm = accel.norm();
    let east = mag.cross(accel);
    let east_norm = east.norm();
    if east_norm < MIN_EAST_NORM || accel_norm == 0.0 {
        return None;
    }
    let east = east / east_norm;
    let up = accel / accel_norm;
    let north = up.cross(&east);
    Some(east.y.atan2(north.y))
}
