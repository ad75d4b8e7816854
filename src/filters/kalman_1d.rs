use serde::{Deserialize, Serialize};

/// Single-state Kalman filter with a random-walk process model.
///
/// A smaller `q` relative to `r` smooths harder and responds slower. NaN
/// measurements are not guarded and propagate into the estimate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalarKalmanFilter {
    x: f64,
    p: f64,
    q: f64,
    r: f64,
}

impl ScalarKalmanFilter {
    /// Default process noise for IMU axes
    pub const IMU_Q: f64 = 0.01;
    /// Default measurement noise for IMU axes
    pub const IMU_R: f64 = 0.1;

    pub fn new(initial_state: f64, initial_covariance: f64, q: f64, r: f64) -> Self {
        Self { x: initial_state, p: initial_covariance, q, r }
    }

    /// Filter tuned for one IMU axis, starting from zero with unit covariance.
    pub fn imu_axis() -> Self {
        Self::new(0.0, 1.0, Self::IMU_Q, Self::IMU_R)
    }

    /// Predict then correct with `measurement`; returns the new estimate.
    pub fn filter(&mut self, measurement: f64) -> f64 {
        let p_pred = self.p + self.q;
        let k = p_pred / (p_pred + self.r);
        self.x += k * (measurement - self.x);
        self.p = (1.0 - k) * p_pred;
        self.x
    }

    pub fn estimate(&self) -> f64 {
        self.x
    }

    pub fn covariance(&self) -> f64 {
        self.p
    }

    /// Restart from a new state and covariance, keeping the noise tuning.
    pub fn reset(&mut self, initial_state: f64, initial_covariance: f64) {
        self.x = initial_state;
        self.p = initial_covariance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constant_input_converges_monotonically() {
        let mut kf = ScalarKalmanFilter::imu_axis();
        let mut prev_err = f64::INFINITY;
        for _ in 0..200 {
            let est = kf.filter(5.0);
            let err = (5.0 - est).abs();
            assert!(err <= prev_err);
            prev_err = err;
        }
        assert_abs_diff_eq!(kf.estimate(), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_covariance_strictly_decreasing_without_process_noise() {
        let mut kf = ScalarKalmanFilter::new(0.0, 1.0, 0.0, 0.1);
        let mut prev_p = kf.covariance();
        for _ in 0..50 {
            kf.filter(1.0);
            let p = kf.covariance();
            assert!(p >= 0.0);
            assert!(p < prev_p);
            prev_p = p;
        }
    }

    #[test]
    fn test_first_step_gain() {
        // p' = 1.01, k = 1.01 / 1.11
        let mut kf = ScalarKalmanFilter::imu_axis();
        let est = kf.filter(1.0);
        assert_abs_diff_eq!(est, 1.01 / 1.11, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_propagates() {
        let mut kf = ScalarKalmanFilter::imu_axis();
        assert!(kf.filter(f64::NAN).is_nan());
    }
}
