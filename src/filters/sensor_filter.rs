use crate::filters::kalman_1d::ScalarKalmanFilter;
use crate::types::Vec3;

/// Three independent per-axis Kalman filters for one sensor.
#[derive(Clone, Debug)]
struct AxisFilters {
    x: ScalarKalmanFilter,
    y: ScalarKalmanFilter,
    z: ScalarKalmanFilter,
}

impl AxisFilters {
    fn new(q: f64, r: f64) -> Self {
        Self {
            x: ScalarKalmanFilter::new(0.0, 1.0, q, r),
            y: ScalarKalmanFilter::new(0.0, 1.0, q, r),
            z: ScalarKalmanFilter::new(0.0, 1.0, q, r),
        }
    }

    fn filter(&mut self, v: &Vec3) -> Vec3 {
        Vec3::new(self.x.filter(v.x), self.y.filter(v.y), self.z.filter(v.z))
    }
}

/// Noise filtering for the accelerometer, gyroscope and magnetometer.
///
/// Nine scalar filters in total, no cross-axis coupling.
#[derive(Clone, Debug)]
pub struct SensorFilterBank {
    accel: AxisFilters,
    gyro: AxisFilters,
    mag: AxisFilters,
    q: f64,
    r: f64,
}

impl SensorFilterBank {
    pub fn new(q: f64, r: f64) -> Self {
        Self {
            accel: AxisFilters::new(q, r),
            gyro: AxisFilters::new(q, r),
            mag: AxisFilters::new(q, r),
            q,
            r,
        }
    }

    pub fn filter_accel(&mut self, v: &Vec3) -> Vec3 {
        self.accel.filter(v)
    }

    pub fn filter_gyro(&mut self, v: &Vec3) -> Vec3 {
        self.gyro.filter(v)
    }

    pub fn filter_mag(&mut self, v: &Vec3) -> Vec3 {
        self.mag.filter(v)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.q, self.r);
    }
}

impl Default for SensorFilterBank {
    fn default() -> Self {
        Self::new(ScalarKalmanFilter::IMU_Q, ScalarKalmanFilter::IMU_R)
    }
}
