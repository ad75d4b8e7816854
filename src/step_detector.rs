// step_detector.rs — Peak/valley step counting on the acceleration magnitude
//
// Two decoupled tracks run on every detected peak:
//   - acceptance: is this peak a step (interval window + adaptive threshold)?
//   - sensitivity: does this peak feed the adaptive threshold buffer?
//
// A walking-state classifier runs alongside on the trailing magnitudes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::{Vec3, WalkingState};

const DIFF_BUFFER_SIZE: usize = 5;

/// Magnitude band (m/s²) a local maximum must fall in to count as a peak.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeakBand {
    pub min: f64,
    pub max: f64,
}

impl PeakBand {
    /// Wide band, tolerant of soft-soled walking and pocket carry
    pub const RELAXED: PeakBand = PeakBand { min: 9.5, max: 20.0 };
    /// Narrow band for hand-held devices with a stiffer gait signal
    pub const STRICT: PeakBand = PeakBand { min: 11.0, max: 19.6 };

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v < self.max
    }
}

impl Default for PeakBand {
    fn default() -> Self {
        Self::RELAXED
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDetectorConfig {
    pub peak_band: PeakBand,
    pub min_step_interval_ms: i64,
    pub max_step_interval_ms: i64,
    /// Minimum peak-valley difference that feeds the threshold buffer
    pub threshold_base: f64,
    pub initial_threshold: f64,

    // ── Walking state ──
    pub state_window: usize,
    pub state_min_samples: usize,
    pub state_update_interval_ms: i64,
    pub still_stddev: f64,
    pub running_stddev: f64,
    pub running_frequency_hz: f64,
}

impl Default for StepDetectorConfig {
    fn default() -> Self {
        Self {
            peak_band: PeakBand::default(),
            min_step_interval_ms: 200,
            max_step_interval_ms: 2000,
            threshold_base: 1.7,
            initial_threshold: 2.0,
            state_window: 50,
            state_min_samples: 10,
            state_update_interval_ms: 1000,
            still_stddev: 0.5,
            running_stddev: 5.0,
            running_frequency_hz: 2.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StepEvent {
    Step { count: u32, timestamp_ms: i64, peak_valley: f64 },
    WalkingStateChanged(WalkingState),
}

pub struct StepDetector {
    config: StepDetectorConfig,

    // Trend tracking
    previous_value: Option<f64>,
    rising: bool,
    rising_streak: u32,
    last_rising_streak: u32,
    current_peak: f64,
    current_valley: f64,

    // Peak timing: `last_peak_ms` is the last peak either track recorded
    last_peak_ms: Option<i64>,
    prev_peak_ms: Option<i64>,

    // Adaptive threshold
    active_threshold: f64,
    diff_buffer: VecDeque<f64>,

    step_count: u32,

    // Walking state
    recent_magnitudes: VecDeque<f64>,
    walking_state: WalkingState,
    last_state_update_ms: Option<i64>,
    last_acceleration: Option<Vec3>,
}

impl StepDetector {
    pub fn new(config: StepDetectorConfig) -> Self {
        let active_threshold = config.initial_threshold;
        let window = config.state_window;
        Self {
            config,
            previous_value: None,
            rising: false,
            rising_streak: 0,
            last_rising_streak: 0,
            current_peak: 0.0,
            current_valley: 0.0,
            last_peak_ms: None,
            prev_peak_ms: None,
            active_threshold,
            diff_buffer: VecDeque::with_capacity(DIFF_BUFFER_SIZE),
            step_count: 0,
            recent_magnitudes: VecDeque::with_capacity(window + 1),
            walking_state: WalkingState::Still,
            last_state_update_ms: None,
            last_acceleration: None,
        }
    }

    /// Feed one filtered accelerometer sample.
    pub fn process(&mut self, accel: &Vec3, timestamp_ms: i64) -> Vec<StepEvent> {
        self.last_acceleration = Some(*accel);
        self.process_magnitude(accel.norm(), timestamp_ms)
    }

    /// Feed one acceleration magnitude (m/s²).
    pub fn process_magnitude(&mut self, magnitude: f64, timestamp_ms: i64) -> Vec<StepEvent> {
        let mut events = Vec::new();

        self.recent_magnitudes.push_back(magnitude);
        if self.recent_magnitudes.len() > self.config.state_window {
            self.recent_magnitudes.pop_front();
        }
        if let Some(state) = self.classify_walking_state(timestamp_ms) {
            events.push(StepEvent::WalkingStateChanged(state));
        }

        let Some(previous) = self.previous_value.replace(magnitude) else {
            return events;
        };

        if self.identify_peak(magnitude, previous) {
            self.prev_peak_ms = self.last_peak_ms;
            let diff = self.current_peak - self.current_valley;
            let interval = self.last_peak_ms.map(|t| timestamp_ms - t);
            let past_min_interval = interval.map_or(true, |dt| dt >= self.config.min_step_interval_ms);

            let accepted = matches!(interval, Some(dt)
                if dt >= self.config.min_step_interval_ms && dt <= self.config.max_step_interval_ms)
                && diff >= self.active_threshold;
            if accepted {
                self.last_peak_ms = Some(timestamp_ms);
                self.step_count += 1;
                events.push(StepEvent::Step {
                    count: self.step_count,
                    timestamp_ms,
                    peak_valley: diff,
                });
            }

            if past_min_interval && diff >= self.config.threshold_base {
                self.last_peak_ms = Some(timestamp_ms);
                self.active_threshold = self.update_threshold(diff);
            }
        }

        events
    }

    /// Returns true when `previous` is a peak inside the band.
    fn identify_peak(&mut self, value: f64, previous: f64) -> bool {
        let was_rising = self.rising;
        if value >= previous {
            self.rising = true;
            self.rising_streak += 1;
        } else {
            self.last_rising_streak = self.rising_streak;
            self.rising_streak = 0;
            self.rising = false;
        }

        if was_rising && !self.rising {
            if self.last_rising_streak >= 2 && self.config.peak_band.contains(previous) {
                self.current_peak = previous;
                return true;
            }
        } else if !was_rising && self.rising {
            self.current_valley = previous;
        }
        false
    }

    /// Push `diff` into the rolling buffer and return the threshold to use
    /// from now on. The threshold only moves once the buffer is full.
    fn update_threshold(&mut self, diff: f64) -> f64 {
        if self.diff_buffer.len() < DIFF_BUFFER_SIZE {
            self.diff_buffer.push_back(diff);
            return self.active_threshold;
        }
        let mean = self.diff_buffer.iter().sum::<f64>() / DIFF_BUFFER_SIZE as f64;
        self.diff_buffer.pop_front();
        self.diff_buffer.push_back(diff);
        threshold_for_mean(mean)
    }

    fn classify_walking_state(&mut self, timestamp_ms: i64) -> Option<WalkingState> {
        if self.recent_magnitudes.len() < self.config.state_min_samples {
            return None;
        }
        if let Some(last) = self.last_state_update_ms {
            if timestamp_ms - last < self.config.state_update_interval_ms {
                return None;
            }
        }
        self.last_state_update_ms = Some(timestamp_ms);

        let stddev = std_dev(&self.recent_magnitudes);
        let frequency = self.step_frequency_hz();
        let state = if stddev < self.config.still_stddev {
            WalkingState::Still
        } else if frequency > self.config.running_frequency_hz || stddev > self.config.running_stddev {
            WalkingState::Running
        } else {
            WalkingState::Walking
        };

        if state != self.walking_state {
            log::debug!(
                "Walking state {:?} -> {:?} (stddev {:.2}, {:.2} Hz)",
                self.walking_state, state, stddev, frequency
            );
            self.walking_state = state;
            Some(state)
        } else {
            None
        }
    }

    /// Instantaneous cadence from the last two recorded peaks, 0 if unknown.
    pub fn step_frequency_hz(&self) -> f64 {
        match (self.prev_peak_ms, self.last_peak_ms) {
            (Some(prev), Some(last)) if last > prev => 1000.0 / (last - prev) as f64,
            _ => 0.0,
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn walking_state(&self) -> WalkingState {
        self.walking_state
    }

    pub fn active_threshold(&self) -> f64 {
        self.active_threshold
    }

    pub fn last_acceleration(&self) -> Option<Vec3> {
        self.last_acceleration
    }

    pub fn set_peak_band(&mut self, band: PeakBand) {
        self.config.peak_band = band;
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(StepDetectorConfig::default())
    }
}

fn threshold_for_mean(mean: f64) -> f64 {
    if mean >= 8.0 {
        4.3
    } else if mean >= 7.0 {
        3.3
    } else if mean >= 4.0 {
        2.3
    } else if mean >= 3.0 {
        2.0
    } else {
        1.7
    }
}

fn std_dev(values: &VecDeque<f64>) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const RATE_HZ: f64 = 50.0;

    fn feed_sine(det: &mut StepDetector, cadence_hz: f64, amplitude: f64, seconds: f64) -> Vec<StepEvent> {
        let n = (seconds * RATE_HZ) as i64;
        let mut events = Vec::new();
        for i in 0..n {
            let t = i as f64 / RATE_HZ;
            let mag = 9.81 + amplitude * (2.0 * PI * cadence_hz * t).sin();
            events.extend(det.process_magnitude(mag, (t * 1000.0).round() as i64));
        }
        events
    }

    fn step_times(events: &[StepEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                StepEvent::Step { timestamp_ms, .. } => Some(*timestamp_ms),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_two_hz_walk_counts_twenty_steps() {
        let mut det = StepDetector::default();
        let events = feed_sine(&mut det, 2.0, 2.5, 10.0);
        let count = det.step_count();
        assert!((19..=21).contains(&count), "counted {count} steps");

        let times = step_times(&events);
        assert_eq!(times.len() as u32, count);
        for w in times.windows(2) {
            let dt = w[1] - w[0];
            assert!((200..=2000).contains(&dt), "step interval {dt} ms");
        }
    }

    #[test]
    fn test_step_counts_are_sequential() {
        let mut det = StepDetector::default();
        let events = feed_sine(&mut det, 2.0, 2.5, 5.0);
        let counts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                StepEvent::Step { count, .. } => Some(*count),
                _ => None,
            })
            .collect();
        let expected: Vec<u32> = (1..=counts.len() as u32).collect();
        assert_eq!(counts, expected);
    }

    #[test]
    fn test_peaks_outside_band_are_ignored() {
        let mut det = StepDetector::default();
        // Peaks around 9.3, below the relaxed band
        let n = 500;
        for i in 0..n {
            let t = i as f64 / RATE_HZ;
            let mag = 8.3 + 1.0 * (2.0 * PI * 2.0 * t).sin();
            det.process_magnitude(mag, (t * 1000.0) as i64);
        }
        assert_eq!(det.step_count(), 0);
    }

    #[test]
    fn test_strict_band_rejects_soft_peaks() {
        let mut det = StepDetector::new(StepDetectorConfig {
            peak_band: PeakBand::STRICT,
            ..Default::default()
        });
        // Peaks at ~10.8, inside the relaxed band but below the strict one
        feed_sine(&mut det, 2.0, 1.0, 10.0);
        assert_eq!(det.step_count(), 0);
    }

    #[test]
    fn test_fast_peaks_never_closer_than_min_interval() {
        let mut det = StepDetector::default();
        // 6 Hz: peaks ~167 ms apart, so only every other one can count
        let events = feed_sine(&mut det, 6.0, 2.5, 5.0);
        let times = step_times(&events);
        assert!(!times.is_empty());
        assert!(times.len() < 30);
        for w in times.windows(2) {
            assert!(w[1] - w[0] >= 200);
        }
    }

    #[test]
    fn test_threshold_adapts_after_buffer_fills() {
        let mut det = StepDetector::default();
        assert_eq!(det.active_threshold(), 2.0);
        // Peak-valley difference ~10 drives the mean past 8
        feed_sine(&mut det, 2.0, 5.0, 6.0);
        assert_eq!(det.active_threshold(), 4.3);
    }

    #[test]
    fn test_threshold_table() {
        assert_eq!(threshold_for_mean(9.0), 4.3);
        assert_eq!(threshold_for_mean(7.5), 3.3);
        assert_eq!(threshold_for_mean(4.0), 2.3);
        assert_eq!(threshold_for_mean(3.2), 2.0);
        assert_eq!(threshold_for_mean(1.0), 1.7);
    }

    #[test]
    fn test_walking_state_transitions() {
        let mut det = StepDetector::default();
        let events = feed_sine(&mut det, 2.0, 2.5, 4.0);
        assert!(events.contains(&StepEvent::WalkingStateChanged(WalkingState::Walking)));
        assert_eq!(det.walking_state(), WalkingState::Walking);

        let start = 4000;
        let mut still_events = Vec::new();
        for i in 0..150 {
            still_events.extend(det.process_magnitude(9.81, start + i * 20));
        }
        assert!(still_events.contains(&StepEvent::WalkingStateChanged(WalkingState::Still)));
    }

    #[test]
    fn test_high_variance_is_running() {
        let mut det = StepDetector::default();
        feed_sine(&mut det, 2.0, 8.0, 3.0);
        assert_eq!(det.walking_state(), WalkingState::Running);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut det = StepDetector::default();
        feed_sine(&mut det, 2.0, 5.0, 6.0);
        assert!(det.step_count() > 0);
        det.reset();
        assert_eq!(det.step_count(), 0);
        assert_eq!(det.active_threshold(), 2.0);
        assert_eq!(det.walking_state(), WalkingState::Still);
        assert_eq!(det.step_frequency_hz(), 0.0);
    }
}
