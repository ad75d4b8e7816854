use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use pdr_tracker_rs::sensor_fusion::{FusionConfig, FusionEvent, MeasurementSession};
use pdr_tracker_rs::session_log::SessionLog;
use pdr_tracker_rs::step_detector::PeakBand;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PeakBandArg {
    Relaxed,
    Strict,
}

impl From<PeakBandArg> for PeakBand {
    fn from(arg: PeakBandArg) -> Self {
        match arg {
            PeakBandArg::Relaxed => PeakBand::RELAXED,
            PeakBandArg::Strict => PeakBand::STRICT,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "pdr_tracker")]
#[command(about = "Replay a recorded walk and measure the enclosed area", long_about = None)]
struct Args {
    /// Session log (*.json or *.json.gz)
    #[arg(long)]
    log: PathBuf,

    /// JSON config file; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Fuse location fixes into the trajectory
    #[arg(long)]
    use_gps: bool,

    /// Walker height in meters
    #[arg(long)]
    height: Option<f64>,

    /// Accepted acceleration band for step peaks
    #[arg(long, value_enum)]
    peak_band: Option<PeakBandArg>,

    /// Write the measurement result here as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FusionConfig::default(),
    };
    if args.use_gps {
        config.use_gps = true;
    }
    if let Some(height) = args.height {
        config.user_height_m = height;
    }
    if let Some(band) = args.peak_band {
        config.set_peak_band(band.into());
    }
    config.validate()?;

    let recorded = SessionLog::load(&args.log).with_context(|| format!("loading log {}", args.log.display()))?;
    log::info!("Replaying {} readings from {}", recorded.readings.len(), args.log.display());

    let mut session = MeasurementSession::new(config);
    session.start();
    let stats = recorded.replay(&mut session, |event| match event {
        FusionEvent::WalkingStateChanged(state) => log::info!("Walking state: {state:?}"),
        FusionEvent::GpsRejected(reason) => log::debug!("Fix rejected: {reason}"),
        FusionEvent::GpsStale => log::warn!("Location fixes went stale"),
        FusionEvent::TrajectoryClosed { gap_m } => log::info!("Trajectory closed ({gap_m:.2} m gap)"),
        _ => {}
    });
    log::info!(
        "Replayed {} samples and {} fixes ({} events)",
        stats.samples,
        stats.fixes,
        stats.events
    );

    let result = session.finish();
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(path) = &args.output {
        result.save_json(path)?;
        log::info!("Saved measurement to {}", path.display());
    }
    Ok(())
}
