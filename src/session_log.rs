//! Recorded sessions for replay.
//!
//! A log is `{ "readings": [ { "sample": ..., "fix": ... }, ... ] }` in
//! timestamp order, stored as plain JSON or gzip-compressed JSON when the
//! path ends in `.gz`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::PdrResult;
use crate::sensor_fusion::{FusionEvent, MeasurementSession};
use crate::types::{RawFix, SensorSample};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<SensorSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<RawFix>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
    pub readings: Vec<Reading>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub samples: u64,
    pub fixes: u64,
    pub events: u64,
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

impl SessionLog {
    pub fn load(path: &Path) -> PdrResult<Self> {
        let file = File::open(path)?;
        if is_gzip(path) {
            let reader = BufReader::new(GzDecoder::new(file));
            Ok(serde_json::from_reader(reader)?)
        } else {
            let reader = BufReader::new(file);
            Ok(serde_json::from_reader(reader)?)
        }
    }

    pub fn save(&self, path: &Path) -> PdrResult<()> {
        let file = File::create(path)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn push_sample(&mut self, sample: SensorSample) {
        self.readings.push(Reading { sample: Some(sample), fix: None });
    }

    pub fn push_fix(&mut self, fix: RawFix) {
        self.readings.push(Reading { sample: None, fix: Some(fix) });
    }

    /// Feed every reading into `session` in log order. A reading carrying
    /// both feeds the sample first.
    pub fn replay<F>(&self, session: &mut MeasurementSession, mut on_event: F) -> ReplayStats
    where
        F: FnMut(&FusionEvent),
    {
        let mut stats = ReplayStats::default();
        for reading in &self.readings {
            if let Some(sample) = &reading.sample {
                stats.samples += 1;
                for event in session.feed_sensor(sample) {
                    stats.events += 1;
                    on_event(&event);
                }
            }
            if let Some(fix) = &reading.fix {
                stats.fixes += 1;
                for event in session.feed_fix(fix) {
                    stats.events += 1;
                    on_event(&event);
                }
            }
        }
        stats
    }
}
