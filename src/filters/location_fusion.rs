/// 5-State Location Fusion Filter
///
/// State Vector (5D):
/// [0-1]: Position (x east, y north) in the session's local frame (meters)
/// [2-3]: Velocity (vx, vy) (m/s)
/// [4]:   Heading (rad, 0 = north, clockwise)
///
/// Dead-reckoning steps drive the prediction; gated GPS fixes correct it.
/// Every correction is an independent scalar Kalman update on one diagonal
/// entry of the covariance, so the off-diagonal terms stay zero.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::geodesy::wrap_angle;
use crate::types::{
    FusionCovariance, FusionStateVec, LocalPoint, IDX_HEADING, IDX_VX, IDX_VY, IDX_X, IDX_Y,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationFusionConfig {
    pub process_noise: f64,
    /// Position noise used when a fix reports no accuracy (m²)
    pub default_gps_noise: f64,
    /// Per-step dead-reckoning position noise (m)
    pub pdr_noise: f64,
    pub heading_noise: f64,
    pub gps_timeout_secs: f64,
    /// Fraction of the GPS position residual folded into velocity
    pub residual_velocity_gain: f64,
    /// Velocity blend weight of the newest step rate
    pub step_velocity_weight: f64,
    pub min_velocity_speed: f64,
    pub min_heading_speed: f64,
    /// Initial covariance diagonal [x, y, vx, vy, heading]
    pub initial_covariance: [f64; 5],
}

impl Default for LocationFusionConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            default_gps_noise: 5.0,
            pdr_noise: 0.5,
            heading_noise: 0.1,
            gps_timeout_secs: 10.0,
            residual_velocity_gain: 0.1,
            step_velocity_weight: 0.2,
            min_velocity_speed: 0.5,
            min_heading_speed: 1.0,
            initial_covariance: [10.0, 10.0, 1.0, 1.0, 0.5],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationFusionState {
    pub position: (f64, f64),
    pub velocity: (f64, f64),
    pub heading_deg: f64,
    pub accuracy: (f64, f64),
    pub has_gps_fix: bool,
    pub gps_updates: u64,
    pub pdr_updates: u64,
}

pub struct LocationFusionFilter {
    config: LocationFusionConfig,

    /// State vector [5D]
    state: FusionStateVec,

    /// Covariance matrix [5x5], diagonal
    covariance: FusionCovariance,

    has_gps_fix: bool,
    /// Seconds of dead reckoning since the last GPS correction
    time_since_gps: f64,

    gps_updates: u64,
    pdr_updates: u64,
}

impl LocationFusionFilter {
    pub fn new(config: LocationFusionConfig) -> Self {
        let covariance = Self::initial_covariance(&config);
        Self {
            config,
            state: FusionStateVec::zeros(),
            covariance,
            has_gps_fix: false,
            time_since_gps: 0.0,
            gps_updates: 0,
            pdr_updates: 0,
        }
    }

    fn initial_covariance(config: &LocationFusionConfig) -> FusionCovariance {
        FusionCovariance::from_diagonal(&FusionStateVec::from(config.initial_covariance))
    }

    /// Advance by one step of `step_length` meters toward `heading_deg`, `dt`
    /// seconds after the previous step.
    ///
    /// Returns true when this update made the GPS fix stale.
    pub fn update_with_pdr(&mut self, step_length: f64, heading_deg: f64, dt: f64) -> bool {
        let heading = heading_deg.to_radians();
        let dx = step_length * heading.sin();
        let dy = step_length * heading.cos();

        self.state[IDX_X] += self.state[IDX_VX] * dt + dx;
        self.state[IDX_Y] += self.state[IDX_VY] * dt + dy;

        if dt > 0.0 {
            let w = self.config.step_velocity_weight;
            self.state[IDX_VX] = (1.0 - w) * self.state[IDX_VX] + w * (dx / dt);
            self.state[IDX_VY] = (1.0 - w) * self.state[IDX_VY] + w * (dy / dt);
        }
        self.state[IDX_HEADING] = heading.rem_euclid(2.0 * PI);

        let q = self.config.process_noise;
        let pos_growth = q + self.config.pdr_noise * self.config.pdr_noise;
        self.covariance[(IDX_X, IDX_X)] += pos_growth;
        self.covariance[(IDX_Y, IDX_Y)] += pos_growth;
        self.covariance[(IDX_VX, IDX_VX)] += 2.0 * q;
        self.covariance[(IDX_VY, IDX_VY)] += 2.0 * q;
        self.covariance[(IDX_HEADING, IDX_HEADING)] += self.config.heading_noise;

        self.pdr_updates += 1;
        self.time_since_gps += dt.max(0.0);
        if self.has_gps_fix && self.time_since_gps > self.config.gps_timeout_secs {
            log::info!("GPS stale after {:.1}s, dead reckoning only", self.time_since_gps);
            self.has_gps_fix = false;
            return true;
        }
        false
    }

    /// Correct with a GPS position `(x, y)` in the local frame.
    ///
    /// `accuracy` is the reported 1-sigma radius in meters, `speed` m/s and
    /// `bearing` degrees clockwise from north.
    pub fn update_with_gps(&mut self, x: f64, y: f64, accuracy: f64, speed: f64, bearing: f64) {
        self.has_gps_fix = true;
        self.time_since_gps = 0.0;
        self.gps_updates += 1;

        let noise = if accuracy > 0.0 {
            accuracy * accuracy
        } else {
            self.config.default_gps_noise
        };

        self.correct_position(x, y, noise);
        if speed > self.config.min_velocity_speed {
            self.correct_velocity(speed, bearing, noise);
        }
    }

    fn correct_position(&mut self, x: f64, y: f64, noise: f64) {
        let gain_v = self.config.residual_velocity_gain;
        for (pos, vel, measured) in [(IDX_X, IDX_VX, x), (IDX_Y, IDX_VY, y)] {
            let k = self.covariance[(pos, pos)] / (self.covariance[(pos, pos)] + noise);
            let residual = measured - self.state[pos];
            self.state[pos] += k * residual;
            self.state[vel] += gain_v * k * residual;
            self.covariance[(pos, pos)] *= 1.0 - k;
        }
    }

    fn correct_velocity(&mut self, speed: f64, bearing_deg: f64, noise: f64) {
        let bearing = bearing_deg.to_radians();
        let gps_vx = speed * bearing.sin();
        let gps_vy = speed * bearing.cos();
        let velocity_noise = noise * 0.1;

        for (idx, measured) in [(IDX_VX, gps_vx), (IDX_VY, gps_vy)] {
            let k = self.covariance[(idx, idx)] / (self.covariance[(idx, idx)] + velocity_noise);
            self.state[idx] += k * (measured - self.state[idx]);
            self.covariance[(idx, idx)] *= 1.0 - k;
        }

        if speed > self.config.min_heading_speed {
            let target = gps_vx.atan2(gps_vy);
            let p = self.covariance[(IDX_HEADING, IDX_HEADING)];
            let kh = p / (p + self.config.heading_noise);
            let residual = wrap_angle(target - self.state[IDX_HEADING]);
            self.state[IDX_HEADING] = (self.state[IDX_HEADING] + kh * residual).rem_euclid(2.0 * PI);
            self.covariance[(IDX_HEADING, IDX_HEADING)] *= 1.0 - kh;
        }
    }

    pub fn position(&self) -> LocalPoint {
        LocalPoint::new(self.state[IDX_X], self.state[IDX_Y])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[IDX_VX], self.state[IDX_VY])
    }

    pub fn heading_deg(&self) -> f64 {
        self.state[IDX_HEADING].to_degrees()
    }

    /// 1-sigma position uncertainty per axis (m).
    pub fn accuracy(&self) -> (f64, f64) {
        (
            self.covariance[(IDX_X, IDX_X)].sqrt(),
            self.covariance[(IDX_Y, IDX_Y)].sqrt(),
        )
    }

    pub fn has_gps_fix(&self) -> bool {
        self.has_gps_fix
    }

    pub fn state_vector(&self) -> &FusionStateVec {
        &self.state
    }

    pub fn covariance(&self) -> &FusionCovariance {
        &self.covariance
    }

    pub fn get_state(&self) -> LocationFusionState {
        let p = self.position();
        LocationFusionState {
            position: (p.x, p.y),
            velocity: self.velocity(),
            heading_deg: self.heading_deg(),
            accuracy: self.accuracy(),
            has_gps_fix: self.has_gps_fix,
            gps_updates: self.gps_updates,
            pdr_updates: self.pdr_updates,
        }
    }

    pub fn reset(&mut self) {
        self.state = FusionStateVec::zeros();
        self.covariance = Self::initial_covariance(&self.config);
        self.has_gps_fix = false;
        self.time_since_gps = 0.0;
        self.gps_updates = 0;
        self.pdr_updates = 0;
    }
}

impl Default for LocationFusionFilter {
    fn default() -> Self {
        Self::new(LocationFusionConfig::default())
    }
}
