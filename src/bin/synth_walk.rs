use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;

use pdr_tracker_rs::sim::{rectangle_legs, SimConfig, WalkSimulator};

#[derive(Parser, Debug)]
#[command(name = "synth_walk")]
#[command(about = "Generate a simulated rectangle walk as a session log", long_about = None)]
struct Args {
    /// East-west side (m)
    #[arg(long, default_value = "10.0")]
    width: f64,

    /// North-south side (m)
    #[arg(long, default_value = "15.0")]
    length: f64,

    /// Steps per second
    #[arg(long, default_value = "2.0")]
    cadence: f64,

    /// Sensor rate (Hz)
    #[arg(long, default_value = "50.0")]
    rate: f64,

    /// Emit a location fix every second
    #[arg(long, default_value_t = false)]
    gps: bool,

    /// Output path; `.gz` compresses
    #[arg(long, default_value = "synth_walk.json.gz")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.width <= 0.0 || args.length <= 0.0 || args.cadence <= 0.0 || args.rate <= 0.0 {
        bail!("width, length, cadence and rate must be positive");
    }

    let config = SimConfig {
        rate_hz: args.rate,
        cadence_hz: args.cadence,
        gps_interval_ms: args.gps.then_some(1000),
        ..Default::default()
    };
    let speed = config.step_length_m * config.cadence_hz;
    let walk = WalkSimulator::new(config).run(&rectangle_legs(args.width, args.length, speed));

    let mut session_log = walk.to_session_log();
    session_log.recorded_at = Some(Utc::now().to_rfc3339());
    session_log.save(&args.output)?;

    log::info!(
        "Wrote {} samples and {} fixes ({:.1} m² rectangle) to {}",
        walk.samples.len(),
        walk.fixes.len(),
        args.width * args.length,
        args.output.display()
    );
    Ok(())
}
