// worker.rs — Serialized session worker
//
// Sensor samples and location fixes usually arrive on different host threads.
// The worker owns the MeasurementSession on one thread and funnels both
// streams through a single ordered command channel, so the estimators never
// need locks.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{PdrError, PdrResult};
use crate::sensor_fusion::{FusionConfig, FusionEvent, FusionSnapshot, MeasurementResult, MeasurementSession};
use crate::types::{RawFix, SensorSample};

const COMMAND_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Sample(SensorSample),
    Fix(RawFix),
    SetUseGps(bool),
    SetUserHeight(f64),
    CalibrateStepLength { distance_m: f64, steps: u32, reply: Sender<PdrResult<f64>> },
    Snapshot(Sender<FusionSnapshot>),
    Finish(Sender<MeasurementResult>),
    Reset,
    Shutdown,
}

pub struct SessionWorker {
    commands: Sender<Command>,
    events: Receiver<FusionEvent>,
    handle: Option<JoinHandle<u64>>,
}

impl SessionWorker {
    /// Start a worker thread running a fresh session.
    pub fn spawn(config: FusionConfig) -> PdrResult<Self> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = channel::bounded::<Command>(COMMAND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = channel::unbounded::<FusionEvent>();

        let handle = thread::Builder::new()
            .name("pdr-session".into())
            .spawn(move || run_session(config, cmd_rx, event_tx))?;

        Ok(Self { commands: cmd_tx, events: event_rx, handle: Some(handle) })
    }

    /// Blocks while the command queue is full; samples are never dropped.
    pub fn push_sample(&self, sample: SensorSample) -> PdrResult<()> {
        self.send(Command::Sample(sample))
    }

    pub fn push_fix(&self, fix: RawFix) -> PdrResult<()> {
        self.send(Command::Fix(fix))
    }

    pub fn set_use_gps(&self, enabled: bool) -> PdrResult<()> {
        self.send(Command::SetUseGps(enabled))
    }

    pub fn set_user_height(&self, height_m: f64) -> PdrResult<()> {
        self.send(Command::SetUserHeight(height_m))
    }

    pub fn calibrate_step_length(&self, distance_m: f64, steps: u32) -> PdrResult<f64> {
        let (reply, rx) = channel::bounded(1);
        self.send(Command::CalibrateStepLength { distance_m, steps, reply })?;
        rx.recv().map_err(|_| PdrError::WorkerStopped)?
    }

    /// State after every command queued so far has been applied.
    pub fn snapshot(&self) -> PdrResult<FusionSnapshot> {
        let (reply, rx) = channel::bounded(1);
        self.send(Command::Snapshot(reply))?;
        rx.recv().map_err(|_| PdrError::WorkerStopped)
    }

    pub fn finish(&self) -> PdrResult<MeasurementResult> {
        let (reply, rx) = channel::bounded(1);
        self.send(Command::Finish(reply))?;
        rx.recv().map_err(|_| PdrError::WorkerStopped)
    }

    pub fn reset(&self) -> PdrResult<()> {
        self.send(Command::Reset)
    }

    /// Event stream produced by the session.
    pub fn events(&self) -> &Receiver<FusionEvent> {
        &self.events
    }

    pub fn drain_events(&self) -> Vec<FusionEvent> {
        self.events.try_iter().collect()
    }

    /// Stop the worker and wait for it. Returns the number of inputs processed.
    pub fn shutdown(mut self) -> PdrResult<u64> {
        self.stop()
    }

    fn stop(&mut self) -> PdrResult<u64> {
        let Some(handle) = self.handle.take() else {
            return Err(PdrError::WorkerStopped);
        };
        // The thread may already be gone; joining still reports how it ended
        let _ = self.commands.send(Command::Shutdown);
        handle.join().map_err(|_| PdrError::WorkerStopped)
    }

    fn send(&self, command: Command) -> PdrResult<()> {
        self.commands.send(command).map_err(|_| PdrError::WorkerStopped)
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}

fn run_session(config: FusionConfig, commands: Receiver<Command>, events: Sender<FusionEvent>) -> u64 {
    let mut session = MeasurementSession::new(config);
    session.start();
    let mut processed = 0u64;

    let forward = |batch: Vec<FusionEvent>| {
        for event in batch {
            // Nobody listening is fine; estimation carries on
            let _ = events.send(event);
        }
    };

    for command in commands.iter() {
        match command {
            Command::Sample(sample) => {
                processed += 1;
                forward(session.feed_sensor(&sample));
            }
            Command::Fix(fix) => {
                processed += 1;
                forward(session.feed_fix(&fix));
            }
            Command::SetUseGps(enabled) => session.set_use_gps(enabled),
            Command::SetUserHeight(height) => session.set_user_height(height),
            Command::CalibrateStepLength { distance_m, steps, reply } => {
                let _ = reply.send(session.calibrate_step_length(distance_m, steps));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(session.snapshot());
            }
            Command::Finish(reply) => {
                let _ = reply.send(session.finish());
            }
            Command::Reset => session.start(),
            Command::Shutdown => break,
        }
    }

    log::debug!("Session worker exiting after {processed} inputs");
    processed
}
