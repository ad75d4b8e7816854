pub mod linalg;

pub use linalg::*;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// One instantaneous 3-axis reading (m/s², rad/s or µT).
pub type Vec3 = Vector3<f64>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub accel: Vec3,
    pub gyro: Vec3,
    pub mag: Vec3,
    pub timestamp_ms: i64,
}

/// Raw location fix as delivered by the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub altitude: f64,
    pub accuracy_m: f32,
    #[serde(default)]
    pub speed_mps: f32,
    #[serde(default)]
    pub bearing_deg: f32,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub satellites: i32,
}

/// Local tangent-plane point: x east, y north, both in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalPoint {
    pub x: f64,
    pub y: f64,
}

impl LocalPoint {
    pub const ORIGIN: LocalPoint = LocalPoint { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &LocalPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalkingState {
    #[default]
    Still,
    Walking,
    Running,
}

/// A fix that passed the plausibility gate, smoothed and projected into the
/// session's local frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatedFix {
    pub lat: f64,
    pub lon: f64,
    pub position: LocalPoint,
    pub accuracy_m: f64,
    pub speed_mps: f64,
    pub bearing_deg: f64,
    pub timestamp_ms: i64,
}
