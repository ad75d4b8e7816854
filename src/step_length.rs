use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{PdrError, PdrResult};

const STEP_TIME_WINDOW: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepLengthConfig {
    pub user_height_m: f64,
    /// Step length as a fraction of body height
    pub stride_ratio: f64,
    pub default_step_length_m: f64,
    pub min_step_length_m: f64,
    pub max_step_length_m: f64,
    /// Acceleration magnitude treated as a neutral step (m/s²)
    pub nominal_accel: f64,
    pub nominal_cadence_hz: f64,
    /// Largest change per step, as a fraction of the previous step length
    pub max_relative_change: f64,
}

impl Default for StepLengthConfig {
    fn default() -> Self {
        Self {
            user_height_m: 1.7,
            stride_ratio: 0.41,
            default_step_length_m: 0.7,
            min_step_length_m: 0.4,
            max_step_length_m: 1.0,
            nominal_accel: 10.0,
            nominal_cadence_hz: 2.0,
            max_relative_change: 0.15,
        }
    }
}

/// Per-step length from height, step impact and cadence.
pub struct StepLengthEstimator {
    config: StepLengthConfig,
    recent_step_times: VecDeque<i64>,
    last_step_length: f64,
    /// Last output before the calibration factor and final clamp
    last_uncalibrated: f64,
    calibration_factor: Option<f64>,
}

impl StepLengthEstimator {
    pub const MIN_USER_HEIGHT_M: f64 = 0.5;
    pub const MAX_USER_HEIGHT_M: f64 = 2.5;

    pub fn new(config: StepLengthConfig) -> Self {
        let mut config = config;
        config.user_height_m = clamp_height(config.user_height_m);
        let last_step_length = config.default_step_length_m;
        Self {
            config,
            recent_step_times: VecDeque::with_capacity(STEP_TIME_WINDOW + 1),
            last_step_length,
            last_uncalibrated: last_step_length,
            calibration_factor: None,
        }
    }

    /// Estimate the length of the step taken at `timestamp_ms`.
    pub fn estimate(&mut self, accel_magnitude: f64, timestamp_ms: i64) -> f64 {
        self.recent_step_times.push_back(timestamp_ms);
        if self.recent_step_times.len() > STEP_TIME_WINDOW {
            self.recent_step_times.pop_front();
        }

        let base = self.config.user_height_m * self.config.stride_ratio;
        let accel_factor = (accel_magnitude / self.config.nominal_accel).clamp(0.8, 1.2);
        let freq_factor = self.frequency_factor();

        let mut length = self.smooth(base * accel_factor * freq_factor);
        self.last_uncalibrated = length;
        if let Some(factor) = self.calibration_factor {
            length *= factor;
        }
        self.last_step_length =
            length.clamp(self.config.min_step_length_m, self.config.max_step_length_m);
        self.last_step_length
    }

    /// Cadence over the trailing step times, 0 until two steps are known.
    pub fn cadence_hz(&self) -> f64 {
        let (Some(first), Some(last)) = (self.recent_step_times.front(), self.recent_step_times.back())
        else {
            return 0.0;
        };
        let span = last - first;
        if span <= 0 {
            return 0.0;
        }
        (self.recent_step_times.len() - 1) as f64 * 1000.0 / span as f64
    }

    fn frequency_factor(&self) -> f64 {
        let f = self.cadence_hz();
        let nominal = self.config.nominal_cadence_hz;
        if f <= 0.0 {
            1.0
        } else if f < nominal {
            0.85 + 0.15 * (f / nominal)
        } else if f < nominal * 1.5 {
            1.0 + 0.2 * ((f - nominal) / nominal)
        } else {
            // Running: strides stop growing with cadence
            1.2 - 0.1 * ((f - nominal * 1.5) / nominal)
        }
    }

    fn smooth(&self, candidate: f64) -> f64 {
        let max_change = self.last_step_length * self.config.max_relative_change;
        let delta = candidate - self.last_step_length;
        if delta.abs() > max_change {
            self.last_step_length + max_change.copysign(delta)
        } else {
            candidate
        }
    }

    /// Fit the calibration factor to a walked distance.
    ///
    /// Returns the new factor, clamped to [0.7, 1.3].
    pub fn calibrate(&mut self, actual_distance_m: f64, step_count: u32) -> PdrResult<f64> {
        if step_count == 0 {
            return Err(PdrError::InvalidParameters(
                "step length calibration needs at least one step".into(),
            ));
        }
        if !(actual_distance_m > 0.0) {
            return Err(PdrError::InvalidParameters(format!(
                "calibration distance must be positive, got {actual_distance_m}"
            )));
        }
        let measured = actual_distance_m / step_count as f64;
        let factor = (measured / self.last_uncalibrated).clamp(0.7, 1.3);
        log::info!(
            "Step length calibrated: {:.3} m/step measured, factor {:.3}",
            measured, factor
        );
        self.calibration_factor = Some(factor);
        Ok(factor)
    }

    pub fn set_user_height(&mut self, height_m: f64) {
        let clamped = clamp_height(height_m);
        if clamped != height_m {
            log::warn!("User height {height_m} m clamped to {clamped} m");
        }
        self.config.user_height_m = clamped;
    }

    pub fn user_height(&self) -> f64 {
        self.config.user_height_m
    }

    pub fn last_step_length(&self) -> f64 {
        self.last_step_length
    }

    pub fn calibration_factor(&self) -> Option<f64> {
        self.calibration_factor
    }

    /// Forget step history and output smoothing. Height and calibration are
    /// user settings and survive a reset.
    pub fn reset(&mut self) {
        self.recent_step_times.clear();
        self.last_step_length = self.config.default_step_length_m;
        self.last_uncalibrated = self.last_step_length;
    }
}

impl Default for StepLengthEstimator {
    fn default() -> Self {
        Self::new(StepLengthConfig::default())
    }
}

fn clamp_height(height_m: f64) -> f64 {
    if height_m.is_nan() {
        return StepLengthConfig::default().user_height_m;
    }
    height_m.clamp(StepLengthEstimator::MIN_USER_HEIGHT_M, StepLengthEstimator::MAX_USER_HEIGHT_M)
}
