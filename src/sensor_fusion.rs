// sensor_fusion.rs — Pure computation layer for one measurement session
//
// Everything in this module is independent of:
//   - threads and channels (see worker.rs)
//   - file I/O (see session_log.rs)
//   - any platform sensor or location API
//
// It takes sensor samples and location fixes in, produces state estimates and
// events out. That keeps it unit-testable with recorded or simulated data.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{PdrError, PdrResult};
use crate::filters::complementary::{ComplementaryHeading, ComplementaryHeadingConfig, HeadingEstimator};
use crate::filters::location_fusion::{LocationFusionConfig, LocationFusionFilter};
use crate::filters::sensor_filter::SensorFilterBank;
use crate::gps_gate::{FixRejection, GpsGate, GpsGateConfig};
use crate::step_detector::{PeakBand, StepDetector, StepDetectorConfig, StepEvent};
use crate::step_length::{StepLengthConfig, StepLengthEstimator};
use crate::trajectory::{polygon_area, Trajectory, TrajectoryConfig, TrajectoryOptimizer};
use crate::types::{GatedFix, LocalPoint, RawFix, SensorSample, WalkingState};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── IMU noise filtering ──
    pub imu_q: f64,
    pub imu_r: f64,

    // ── Step detection ──
    pub peak_min: f64,
    pub peak_max: f64,
    pub min_step_interval_ms: i64,
    pub max_step_interval_ms: i64,
    pub step_threshold_base: f64,
    pub initial_step_threshold: f64,

    // ── Walking state ──
    pub state_window: usize,
    pub still_stddev: f64,
    pub running_stddev: f64,
    pub running_frequency_hz: f64,

    // ── Step length ──
    pub user_height_m: f64,
    pub stride_ratio: f64,
    pub default_step_length_m: f64,
    pub min_step_length_m: f64,
    pub max_step_length_m: f64,

    // ── Heading ──
    pub mag_disturbance_threshold: f64,
    pub gyro_drift_correction: f64,
    pub heading_alpha: f64,
    pub heading_alpha_disturbed: f64,
    pub gps_heading_max_correction_deg: f64,
    pub gps_heading_gain: f64,
    pub gps_heading_min_speed: f64,

    // ── GPS gating ──
    pub gps_max_accuracy_m: f64,
    pub gps_max_speed_mps: f64,
    pub gps_min_jump_interval_ms: i64,
    pub gps_max_jump_m: f64,
    pub gps_smoothing_q: f64,
    pub gps_smoothing_r: f64,

    // ── Location fusion ──
    pub fusion_process_noise: f64,
    pub fusion_default_gps_noise: f64,
    pub fusion_pdr_noise: f64,
    pub fusion_heading_noise: f64,
    pub gps_timeout_secs: f64,

    // ── Trajectory ──
    pub min_point_spacing_m: f64,
    pub spacing_after_points: usize,
    pub rdp_epsilon_m: f64,
    pub max_trajectory_points: usize,
    pub closure_threshold_m: f64,

    // ── Feature flags ──
    pub use_gps: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            imu_q: 0.01,
            imu_r: 0.1,
            peak_min: PeakBand::RELAXED.min,
            peak_max: PeakBand::RELAXED.max,
            min_step_interval_ms: 200,
            max_step_interval_ms: 2000,
            step_threshold_base: 1.7,
            initial_step_threshold: 2.0,
            state_window: 50,
            still_stddev: 0.5,
            running_stddev: 5.0,
            running_frequency_hz: 2.5,
            user_height_m: 1.7,
            stride_ratio: 0.41,
            default_step_length_m: 0.7,
            min_step_length_m: 0.4,
            max_step_length_m: 1.0,
            mag_disturbance_threshold: 5.0,
            gyro_drift_correction: 0.01,
            heading_alpha: 0.98,
            heading_alpha_disturbed: 0.99,
            gps_heading_max_correction_deg: 45.0,
            gps_heading_gain: 0.3,
            gps_heading_min_speed: 0.5,
            gps_max_accuracy_m: 20.0,
            gps_max_speed_mps: 10.0,
            gps_min_jump_interval_ms: 1000,
            gps_max_jump_m: 10.0,
            gps_smoothing_q: 0.00001,
            gps_smoothing_r: 0.001,
            fusion_process_noise: 0.01,
            fusion_default_gps_noise: 5.0,
            fusion_pdr_noise: 0.5,
            fusion_heading_noise: 0.1,
            gps_timeout_secs: 10.0,
            min_point_spacing_m: 0.3,
            spacing_after_points: 10,
            rdp_epsilon_m: 0.5,
            max_trajectory_points: 1000,
            closure_threshold_m: 2.0,
            use_gps: false,
        }
    }
}

impl FusionConfig {
    /// Load a JSON config; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> PdrResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: FusionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PdrResult<()> {
        let positive = [
            ("imu_q", self.imu_q),
            ("imu_r", self.imu_r),
            ("gps_smoothing_r", self.gps_smoothing_r),
            ("fusion_default_gps_noise", self.fusion_default_gps_noise),
            ("fusion_heading_noise", self.fusion_heading_noise),
            ("stride_ratio", self.stride_ratio),
            ("rdp_epsilon_m", self.rdp_epsilon_m),
            ("closure_threshold_m", self.closure_threshold_m),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(PdrError::InvalidConfig(format!("{name} must be positive, got {value}")));
            }
        }
        if self.peak_min >= self.peak_max {
            return Err(PdrError::InvalidConfig(format!(
                "peak band [{}, {}) is empty",
                self.peak_min, self.peak_max
            )));
        }
        if self.min_step_interval_ms <= 0 || self.min_step_interval_ms > self.max_step_interval_ms {
            return Err(PdrError::InvalidConfig(format!(
                "step interval window [{}, {}] ms is invalid",
                self.min_step_interval_ms, self.max_step_interval_ms
            )));
        }
        if self.min_step_length_m > self.max_step_length_m {
            return Err(PdrError::InvalidConfig("min_step_length_m exceeds max_step_length_m".into()));
        }
        if !(0.0..=1.0).contains(&self.heading_alpha) || !(0.0..=1.0).contains(&self.heading_alpha_disturbed) {
            return Err(PdrError::InvalidConfig("heading blend weights must be in [0, 1]".into()));
        }
        if self.max_trajectory_points < 3 {
            return Err(PdrError::InvalidConfig("max_trajectory_points must be at least 3".into()));
        }
        Ok(())
    }

    pub fn peak_band(&self) -> PeakBand {
        PeakBand { min: self.peak_min, max: self.peak_max }
    }

    pub fn set_peak_band(&mut self, band: PeakBand) {
        self.peak_min = band.min;
        self.peak_max = band.max;
    }

    fn step_detector_config(&self) -> StepDetectorConfig {
        StepDetectorConfig {
            peak_band: self.peak_band(),
            min_step_interval_ms: self.min_step_interval_ms,
            max_step_interval_ms: self.max_step_interval_ms,
            threshold_base: self.step_threshold_base,
            initial_threshold: self.initial_step_threshold,
            state_window: self.state_window,
            still_stddev: self.still_stddev,
            running_stddev: self.running_stddev,
            running_frequency_hz: self.running_frequency_hz,
            ..Default::default()
        }
    }

    fn step_length_config(&self) -> StepLengthConfig {
        StepLengthConfig {
            user_height_m: self.user_height_m,
            stride_ratio: self.stride_ratio,
            default_step_length_m: self.default_step_length_m,
            min_step_length_m: self.min_step_length_m,
            max_step_length_m: self.max_step_length_m,
            ..Default::default()
        }
    }

    fn heading_config(&self) -> ComplementaryHeadingConfig {
        ComplementaryHeadingConfig {
            disturbance_threshold: self.mag_disturbance_threshold,
            drift_correction: self.gyro_drift_correction,
            alpha: self.heading_alpha,
            alpha_disturbed: self.heading_alpha_disturbed,
            gps_max_correction: self.gps_heading_max_correction_deg.to_radians(),
            gps_correction_gain: self.gps_heading_gain,
        }
    }

    fn gps_gate_config(&self) -> GpsGateConfig {
        GpsGateConfig {
            max_accuracy_m: self.gps_max_accuracy_m,
            max_speed_mps: self.gps_max_speed_mps,
            min_jump_interval_ms: self.gps_min_jump_interval_ms,
            max_jump_m: self.gps_max_jump_m,
            smoothing_q: self.gps_smoothing_q,
            smoothing_r: self.gps_smoothing_r,
            ..Default::default()
        }
    }

    fn location_fusion_config(&self) -> LocationFusionConfig {
        LocationFusionConfig {
            process_noise: self.fusion_process_noise,
            default_gps_noise: self.fusion_default_gps_noise,
            pdr_noise: self.fusion_pdr_noise,
            heading_noise: self.fusion_heading_noise,
            gps_timeout_secs: self.gps_timeout_secs,
            ..Default::default()
        }
    }

    fn trajectory_config(&self) -> TrajectoryConfig {
        TrajectoryConfig {
            min_point_spacing_m: self.min_point_spacing_m,
            spacing_after: self.spacing_after_points,
            rdp_epsilon_m: self.rdp_epsilon_m,
            max_points: self.max_trajectory_points,
        }
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    StepDetected { count: u32, step_length_m: f64, heading_deg: f64, timestamp_ms: i64 },
    WalkingStateChanged(WalkingState),
    GpsAccepted { position: LocalPoint, accuracy_m: f64 },
    GpsRejected(FixRejection),
    GpsStale,
    HeadingCalibrated { bearing_deg: f64 },
    TrajectoryExtended { point: LocalPoint, len: usize },
    TrajectoryClosed { gap_m: f64 },
}

// ─── Fusion output snapshot ──────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FusionSnapshot {
    pub step_count: u32,
    pub heading_deg: f64,
    pub step_length_m: f64,
    pub walking_state: WalkingState,
    pub magnetically_disturbed: bool,
    pub dead_reckoned: LocalPoint,
    pub fused_position: LocalPoint,
    pub fused_velocity: (f64, f64),
    pub fused_heading_deg: f64,
    pub fused_accuracy: (f64, f64),
    pub use_gps: bool,
    pub gps_available: bool,
    pub last_fix: Option<GatedFix>,
    pub trajectory_points: usize,
    pub path_length_m: f64,
    pub is_closed: bool,
    pub area_m2: f64,
}

/// Outcome of a finished session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub name: String,
    pub generated_at: String,
    pub area_m2: f64,
    pub closed: bool,
    pub step_count: u32,
    pub path_length_m: f64,
    pub raw_points: usize,
    pub trajectory: Vec<LocalPoint>,
}

impl MeasurementResult {
    pub fn save_json(&self, path: &Path) -> PdrResult<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

// ─── The measurement session ─────────────────────────────────────────────────

/// Owns every estimator for one measurement. Feed it samples and fixes from
/// a single thread (or through `worker::SessionWorker`).
pub struct MeasurementSession {
    config: FusionConfig,

    // Signal processing
    filters: SensorFilterBank,
    step_detector: StepDetector,
    heading: Box<dyn HeadingEstimator + Send>,
    step_length: StepLengthEstimator,

    // Position estimation
    gps_gate: GpsGate,
    fusion: LocationFusionFilter,
    dead_reckoned: LocalPoint,

    // Trajectory
    trajectory: Trajectory,
    optimizer: TrajectoryOptimizer,
    closed: bool,

    // Session bookkeeping
    use_gps: bool,
    step_count: u32,
    last_step_ms: Option<i64>,
    last_heading_deg: f64,
    last_fix: Option<GatedFix>,
}

impl MeasurementSession {
    pub fn new(config: FusionConfig) -> Self {
        let heading = Box::new(ComplementaryHeading::new(config.heading_config()));
        Self::with_heading_estimator(config, heading)
    }

    pub fn with_heading_estimator(config: FusionConfig, heading: Box<dyn HeadingEstimator + Send>) -> Self {
        let mut trajectory = Trajectory::new(&config.trajectory_config());
        trajectory.reset(LocalPoint::ORIGIN);
        Self {
            filters: SensorFilterBank::new(config.imu_q, config.imu_r),
            step_detector: StepDetector::new(config.step_detector_config()),
            heading,
            step_length: StepLengthEstimator::new(config.step_length_config()),
            gps_gate: GpsGate::new(config.gps_gate_config()),
            fusion: LocationFusionFilter::new(config.location_fusion_config()),
            dead_reckoned: LocalPoint::ORIGIN,
            trajectory,
            optimizer: TrajectoryOptimizer::new(&config.trajectory_config()),
            closed: false,
            use_gps: config.use_gps,
            step_count: 0,
            last_step_ms: None,
            last_heading_deg: 0.0,
            last_fix: None,
            config,
        }
    }

    /// Begin a fresh measurement at the origin. User height, step-length
    /// calibration and the GPS flag carry over.
    pub fn start(&mut self) {
        self.reset();
        log::info!("Measurement started (gps {})", if self.use_gps { "on" } else { "off" });
    }

    pub fn reset(&mut self) {
        self.filters.reset();
        self.step_detector.reset();
        self.heading.reset();
        self.step_length.reset();
        self.gps_gate.reset();
        self.fusion.reset();
        self.dead_reckoned = LocalPoint::ORIGIN;
        self.trajectory.reset(LocalPoint::ORIGIN);
        self.closed = false;
        self.step_count = 0;
        self.last_step_ms = None;
        self.last_heading_deg = 0.0;
        self.last_fix = None;
    }

    // ── Inputs ──

    pub fn feed_sensor(&mut self, sample: &SensorSample) -> Vec<FusionEvent> {
        let accel = self.filters.filter_accel(&sample.accel);
        let gyro = self.filters.filter_gyro(&sample.gyro);
        let mag = self.filters.filter_mag(&sample.mag);
        let ts = sample.timestamp_ms;

        self.last_heading_deg = self.heading.update(&accel, &mag, &gyro, ts);

        let mut events = Vec::new();
        for step_event in self.step_detector.process(&accel, ts) {
            match step_event {
                StepEvent::Step { timestamp_ms, .. } => {
                    let length = self.step_length.estimate(accel.norm(), timestamp_ms);
                    let heading = self.last_heading_deg;
                    events.extend(self.record_step(length, heading, timestamp_ms));
                }
                StepEvent::WalkingStateChanged(state) => {
                    events.push(FusionEvent::WalkingStateChanged(state));
                }
            }
        }
        events
    }

    /// Advance dead reckoning by one step. Hosts with their own step counter
    /// can call this directly instead of feeding raw samples.
    pub fn record_step(&mut self, step_length: f64, heading_deg: f64, timestamp_ms: i64) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        self.step_count += 1;
        let dt = self
            .last_step_ms
            .map_or(0.0, |prev| ((timestamp_ms - prev) as f64 / 1000.0).max(0.0));
        self.last_step_ms = Some(timestamp_ms);

        let heading = heading_deg.to_radians();
        self.dead_reckoned.x += step_length * heading.sin();
        self.dead_reckoned.y += step_length * heading.cos();

        let went_stale = self.fusion.update_with_pdr(step_length, heading_deg, dt);

        events.push(FusionEvent::StepDetected {
            count: self.step_count,
            step_length_m: step_length,
            heading_deg,
            timestamp_ms,
        });
        if went_stale {
            events.push(FusionEvent::GpsStale);
        }

        let point = if self.use_gps { self.fusion.position() } else { self.dead_reckoned };
        self.extend_trajectory(point, &mut events);
        events
    }

    pub fn feed_fix(&mut self, fix: &RawFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        let gated = match self.gps_gate.accept(fix) {
            Ok(gated) => gated,
            Err(reason) => {
                events.push(FusionEvent::GpsRejected(reason));
                return events;
            }
        };

        events.push(FusionEvent::GpsAccepted {
            position: gated.position,
            accuracy_m: gated.accuracy_m,
        });

        if self.use_gps {
            self.fusion.update_with_gps(
                gated.position.x,
                gated.position.y,
                gated.accuracy_m,
                gated.speed_mps,
                gated.bearing_deg,
            );
            if gated.speed_mps > self.config.gps_heading_min_speed
                && self.heading.calibrate_with_gps(gated.bearing_deg)
            {
                events.push(FusionEvent::HeadingCalibrated { bearing_deg: gated.bearing_deg });
            }
        }

        self.last_fix = Some(gated);
        events
    }

    fn extend_trajectory(&mut self, point: LocalPoint, events: &mut Vec<FusionEvent>) {
        if self.trajectory.push(point) {
            events.push(FusionEvent::TrajectoryExtended { point, len: self.trajectory.len() });
        }

        let closed = self.is_closed();
        if closed && !self.closed {
            let gap_m = match (self.trajectory.first(), self.trajectory.last()) {
                (Some(first), Some(last)) => first.distance_to(last),
                _ => 0.0,
            };
            log::info!(
                "Trajectory closed: {:.2} m from start after {:.1} m",
                gap_m,
                self.trajectory.path_length()
            );
            events.push(FusionEvent::TrajectoryClosed { gap_m });
        }
        self.closed = closed;
    }

    // ── Runtime configuration ──

    pub fn set_use_gps(&mut self, enabled: bool) {
        self.use_gps = enabled;
        self.config.use_gps = enabled;
    }

    pub fn set_user_height(&mut self, height_m: f64) {
        self.step_length.set_user_height(height_m);
        self.config.user_height_m = self.step_length.user_height();
    }

    pub fn set_peak_band(&mut self, band: PeakBand) {
        self.step_detector.set_peak_band(band);
        self.config.set_peak_band(band);
    }

    pub fn calibrate_step_length(&mut self, actual_distance_m: f64, step_count: u32) -> PdrResult<f64> {
        self.step_length.calibrate(actual_distance_m, step_count)
    }

    pub fn calibrate_heading_with_gps(&mut self, bearing_deg: f64) -> bool {
        self.heading.calibrate_with_gps(bearing_deg)
    }

    // ── Queries ──

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn heading_deg(&self) -> f64 {
        self.last_heading_deg
    }

    pub fn step_length(&self) -> f64 {
        self.step_length.last_step_length()
    }

    pub fn walking_state(&self) -> WalkingState {
        self.step_detector.walking_state()
    }

    pub fn dead_reckoned_position(&self) -> LocalPoint {
        self.dead_reckoned
    }

    pub fn fused_position(&self) -> LocalPoint {
        self.fusion.position()
    }

    pub fn fused_velocity(&self) -> (f64, f64) {
        self.fusion.velocity()
    }

    pub fn fused_heading_deg(&self) -> f64 {
        self.fusion.heading_deg()
    }

    pub fn fused_accuracy(&self) -> (f64, f64) {
        self.fusion.accuracy()
    }

    /// Whether GPS is currently contributing: enabled and not stale.
    pub fn gps_available(&self) -> bool {
        self.use_gps && self.fusion.has_gps_fix()
    }

    pub fn last_fix(&self) -> Option<&GatedFix> {
        self.last_fix.as_ref()
    }

    pub fn trajectory(&self) -> &[LocalPoint] {
        self.trajectory.points()
    }

    pub fn simplified_trajectory(&self) -> Vec<LocalPoint> {
        self.optimizer.simplify(self.trajectory.points())
    }

    /// The walk has returned near its start after covering some ground.
    /// `snapshot`, `current_area` and `finish` all use this one rule.
    pub fn is_closed(&self) -> bool {
        let threshold = self.config.closure_threshold_m;
        self.trajectory.is_enclosed(threshold) && self.trajectory.path_length() >= 2.0 * threshold
    }

    /// Area enclosed by the simplified loop, 0 while the walk is open.
    pub fn current_area(&self) -> f64 {
        self.closed_polygon().map_or(0.0, |polygon| polygon_area(&polygon))
    }

    fn closed_polygon(&self) -> Option<Vec<LocalPoint>> {
        if !self.is_closed() {
            return None;
        }
        let simplified = self.simplified_trajectory();
        Some(self.optimizer.close_if_needed(&simplified, self.config.closure_threshold_m))
    }

    pub fn snapshot(&self) -> FusionSnapshot {
        FusionSnapshot {
            step_count: self.step_count,
            heading_deg: self.last_heading_deg,
            step_length_m: self.step_length(),
            walking_state: self.walking_state(),
            magnetically_disturbed: self.heading.is_magnetically_disturbed(),
            dead_reckoned: self.dead_reckoned,
            fused_position: self.fused_position(),
            fused_velocity: self.fused_velocity(),
            fused_heading_deg: self.fused_heading_deg(),
            fused_accuracy: self.fused_accuracy(),
            use_gps: self.use_gps,
            gps_available: self.gps_available(),
            last_fix: self.last_fix.clone(),
            trajectory_points: self.trajectory.len(),
            path_length_m: self.trajectory.path_length(),
            is_closed: self.is_closed(),
            area_m2: self.current_area(),
        }
    }

    /// Simplify, close the loop if the walk is closed, and compute the area.
    /// An open walk reports its simplified polyline and zero area.
    pub fn finish(&self) -> MeasurementResult {
        let (polygon, closed) = match self.closed_polygon() {
            Some(polygon) => (polygon, true),
            None => (self.simplified_trajectory(), false),
        };
        let area_m2 = if closed { polygon_area(&polygon) } else { 0.0 };
        let now = Utc::now();

        log::info!(
            "Measurement finished: {} steps, {} → {} points, area {:.2} m² ({})",
            self.step_count,
            self.trajectory.len(),
            polygon.len(),
            area_m2,
            if closed { "closed" } else { "open" }
        );

        MeasurementResult {
            name: format!("Measurement {}", now.format("%Y%m%d_%H%M%S")),
            generated_at: now.to_rfc3339(),
            area_m2,
            closed,
            step_count: self.step_count,
            path_length_m: self.trajectory.path_length(),
            raw_points: self.trajectory.len(),
            trajectory: polygon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;
    use approx::assert_abs_diff_eq;

    fn walk_leg(session: &mut MeasurementSession, heading_deg: f64, steps: usize, ts: &mut i64) {
        for _ in 0..steps {
            *ts += 500;
            session.record_step(0.5, heading_deg, *ts);
        }
    }

    fn rectangle_session(use_gps: bool) -> MeasurementSession {
        let mut session = MeasurementSession::new(FusionConfig { use_gps, ..Default::default() });
        session.start();
        let mut ts = 0;
        walk_leg(&mut session, 0.0, 40, &mut ts);
        walk_leg(&mut session, 90.0, 20, &mut ts);
        walk_leg(&mut session, 180.0, 40, &mut ts);
        walk_leg(&mut session, 270.0, 20, &mut ts);
        session
    }

    #[test]
    fn test_rectangle_walk_area() {
        let session = rectangle_session(false);
        assert_eq!(session.step_count(), 120);
        assert!(session.is_closed());

        let simplified = session.simplified_trajectory();
        assert_eq!(simplified.len(), 5);
        for corner in [(0.0, 20.0), (10.0, 20.0), (10.0, 0.0)] {
            assert!(simplified.iter().any(|p| p.distance_to(&LocalPoint::new(corner.0, corner.1)) < 1e-6));
        }

        let result = session.finish();
        assert!(result.closed);
        assert!(result.trajectory.len() <= 6);
        assert!((result.area_m2 - 200.0).abs() / 200.0 < 0.05, "area {}", result.area_m2);
        assert_abs_diff_eq!(result.path_length_m, 60.0, epsilon = 1e-6);
    }

    #[test]
    fn test_open_walk_is_not_closed() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let mut ts = 0;
        walk_leg(&mut session, 0.0, 20, &mut ts);
        walk_leg(&mut session, 90.0, 20, &mut ts);
        assert!(!session.is_closed());
        let result = session.finish();
        assert!(!result.closed);
        assert_eq!(result.trajectory.len(), 3);
    }

    #[test]
    fn test_closure_event_emitted_once() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let mut ts = 0;
        let mut closed_events = 0;
        for (heading, steps) in [(0.0, 20), (90.0, 20), (180.0, 20), (270.0, 20)] {
            for _ in 0..steps {
                ts += 500;
                closed_events += session
                    .record_step(0.5, heading, ts)
                    .iter()
                    .filter(|e| matches!(e, FusionEvent::TrajectoryClosed { .. }))
                    .count();
            }
        }
        assert_eq!(closed_events, 1);
    }

    #[test]
    fn test_short_wiggle_is_not_a_loop() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let mut ts = 0;
        walk_leg(&mut session, 0.0, 3, &mut ts);
        walk_leg(&mut session, 180.0, 3, &mut ts);
        assert!(!session.is_closed());
        assert!(!session.snapshot().is_closed);

        let result = session.finish();
        assert!(!result.closed);
        assert_eq!(result.area_m2, 0.0);
    }

    #[test]
    fn test_finish_agrees_with_is_closed_near_threshold() {
        // Ends 1.98 m from the start after only 2.8 m of walking
        let mut session = MeasurementSession::new(FusionConfig::default());
        for (i, heading) in [0.0, 0.0, 90.0, 90.0].into_iter().enumerate() {
            session.record_step(0.7, heading, (i as i64 + 1) * 500);
        }
        let gap = session.trajectory()[0].distance_to(&session.dead_reckoned_position());
        assert!(gap < session.config().closure_threshold_m);
        assert_abs_diff_eq!(session.snapshot().path_length_m, 2.8, epsilon = 1e-9);

        let result = session.finish();
        assert_eq!(result.closed, session.is_closed());
        assert!(!result.closed);
        assert_eq!(result.area_m2, 0.0);
        assert_eq!(session.current_area(), 0.0);
        assert_ne!(result.trajectory.last(), result.trajectory.first());
    }

    #[test]
    fn test_closed_status_consistent_across_queries() {
        let session = rectangle_session(false);
        let snap = session.snapshot();
        let result = session.finish();
        assert!(session.is_closed() && snap.is_closed && result.closed);
        assert_abs_diff_eq!(snap.area_m2, result.area_m2, epsilon = 1e-9);
        assert_eq!(result.trajectory.first(), result.trajectory.last());
    }

    #[test]
    fn test_record_step_moves_dead_reckoning() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let events = session.record_step(0.7, 90.0, 1000);
        assert!(matches!(events[0], FusionEvent::StepDetected { count: 1, .. }));
        assert!(events.iter().any(|e| matches!(e, FusionEvent::TrajectoryExtended { len: 2, .. })));
        let p = session.dead_reckoned_position();
        assert_abs_diff_eq!(p.x, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(session.fused_position().x, 0.7, epsilon = 1e-12);
    }

    fn fix_at(lat: f64, lon: f64, ts: i64) -> RawFix {
        RawFix {
            lat,
            lon,
            altitude: 0.0,
            accuracy_m: 3.0,
            speed_mps: 1.2,
            bearing_deg: 0.0,
            timestamp_ms: ts,
            satellites: 10,
        }
    }

    #[test]
    fn test_gps_ignored_for_position_when_disabled() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let events = session.feed_fix(&fix_at(32.2, -110.9, 0));
        assert!(matches!(events[0], FusionEvent::GpsAccepted { .. }));
        assert!(!session.gps_available());
        assert!(session.last_fix().is_some());
        assert_abs_diff_eq!(session.fused_accuracy().0, 10.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_gps_fused_when_enabled() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        session.set_use_gps(true);
        session.feed_fix(&fix_at(32.2, -110.9, 0));
        assert!(session.gps_available());
        assert!(session.fused_accuracy().0 < 10.0_f64.sqrt());

        // Ten seconds of steps without a fix makes GPS stale
        let mut stale = false;
        for i in 1..=25 {
            stale |= session
                .record_step(0.6, 0.0, i * 500)
                .contains(&FusionEvent::GpsStale);
        }
        assert!(stale);
        assert!(!session.gps_available());
    }

    #[test]
    fn test_gps_mode_trajectory_follows_fused_position() {
        let (lat0, lon0) = (32.2, -110.9);
        let mut with_fix = MeasurementSession::new(FusionConfig { use_gps: true, ..Default::default() });
        let mut without_fix = MeasurementSession::new(FusionConfig { use_gps: true, ..Default::default() });
        for session in [&mut with_fix, &mut without_fix] {
            session.feed_fix(&fix_at(lat0, lon0, 0));
            for i in 1..=4 {
                session.record_step(0.6, 0.0, i * 500);
                assert_eq!(session.trajectory().last(), Some(&session.fused_position()));
            }
        }

        // Accurate fix 6 m east of the walked line
        let north = with_fix.fused_position().y;
        let (lat, lon) = crate::geodesy::local_to_latlon(LocalPoint::new(6.0, north), lat0, lon0);
        let mut east = fix_at(lat, lon, 2200);
        east.accuracy_m = 0.5;
        east.speed_mps = 0.0;
        let events = with_fix.feed_fix(&east);
        let Some(FusionEvent::GpsAccepted { position: gated, .. }) = events.first().cloned() else {
            panic!("fix should be accepted: {events:?}");
        };
        assert!(gated.x > 2.0);

        with_fix.record_step(0.6, 0.0, 2500);
        without_fix.record_step(0.6, 0.0, 2500);
        let pulled = *with_fix.trajectory().last().unwrap();
        let unpulled = *without_fix.trajectory().last().unwrap();
        assert_eq!(pulled, with_fix.fused_position());
        assert!(pulled.x > unpulled.x + 0.8 * gated.x, "{pulled:?} vs {unpulled:?}");
        assert!(pulled.distance_to(&gated) < unpulled.distance_to(&gated));

        // Dead reckoning ignores the fix
        assert_eq!(with_fix.dead_reckoned_position(), without_fix.dead_reckoned_position());
    }

    #[test]
    fn test_rejected_fix_reported() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let mut bad = fix_at(32.2, -110.9, 0);
        bad.accuracy_m = 50.0;
        let events = session.feed_fix(&bad);
        assert!(matches!(events[0], FusionEvent::GpsRejected(FixRejection::PoorAccuracy { .. })));
        assert!(session.last_fix().is_none());
    }

    #[test]
    fn test_feed_sensor_updates_heading() {
        let mut session = MeasurementSession::new(FusionConfig::default());
        let sample = |ts| SensorSample {
            accel: Vec3::new(0.0, 0.0, 9.81),
            gyro: Vec3::zeros(),
            // Flat device facing east
            mag: Vec3::new(-20.0, 0.0, -40.0),
            timestamp_ms: ts,
        };
        for i in 0..200 {
            session.feed_sensor(&sample(i * 20));
        }
        assert_abs_diff_eq!(session.heading_deg(), 90.0, epsilon = 0.5);
        assert_eq!(session.step_count(), 0);
    }

    #[test]
    fn test_reset_keeps_user_settings() {
        let mut session = rectangle_session(false);
        session.set_user_height(1.9);
        session.set_use_gps(true);
        session.reset();
        assert_eq!(session.step_count(), 0);
        assert_eq!(session.trajectory(), &[LocalPoint::ORIGIN]);
        assert_eq!(session.config().user_height_m, 1.9);
        assert!(session.config().use_gps);
    }

    #[test]
    fn test_config_validation() {
        assert!(FusionConfig::default().validate().is_ok());
        let bad_band = FusionConfig { peak_min: 20.0, peak_max: 10.0, ..Default::default() };
        assert!(matches!(bad_band.validate(), Err(PdrError::InvalidConfig(_))));
        let bad_noise = FusionConfig { imu_r: 0.0, ..Default::default() };
        assert!(bad_noise.validate().is_err());
    }

    #[test]
    fn test_config_partial_json() {
        let config: FusionConfig =
            serde_json::from_str(r#"{ "peak_min": 11.0, "peak_max": 19.6, "use_gps": true }"#).unwrap();
        assert_eq!(config.peak_band(), PeakBand::STRICT);
        assert!(config.use_gps);
        assert_eq!(config.closure_threshold_m, 2.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let session = rectangle_session(false);
        let snap = session.snapshot();
        assert_eq!(snap.step_count, 120);
        assert!(snap.is_closed);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"walking_state\":\"Still\""));
    }
}
