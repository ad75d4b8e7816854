//! Pedestrian dead-reckoning area measurement.
//!
//! Raw accelerometer, gyroscope and magnetometer samples drive a step
//! detector, a step-length model and a heading estimator. Steps extend a
//! local trajectory which, once the walker returns to the start, is
//! simplified into a polygon whose area is reported. Location fixes are
//! optional and fused in a small Kalman filter when enabled.

pub mod error;
pub mod filters;
pub mod geodesy;
pub mod gps_gate;
pub mod sensor_fusion;
pub mod session_log;
pub mod sim;
pub mod step_detector;
pub mod step_length;
pub mod trajectory;
pub mod types;
pub mod worker;

pub use error::{PdrError, PdrResult};
pub use sensor_fusion::{FusionConfig, FusionEvent, FusionSnapshot, MeasurementResult, MeasurementSession};
pub use worker::SessionWorker;
