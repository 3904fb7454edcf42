//! Runs autonomous sessions on the configured hardware and keeps their logs.
//!
//! Without the `raspberry-pi` feature the rover is simulated: a scripted
//! range sensor that walks up to an obstacle every few ticks, a recording
//! drive and servo head, and a blank camera. The `raspberry-pi` build talks to
//! the real drivers and captures from `/dev/video0`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fieldbot_hal::{DriveActuator, RangeSensor, ServoScanner};
use fieldbot_memory::RunHistory;
use fieldbot_runtime::{
    AutonomousLoop, GeminiBackend, ObstacleScanPlanner, OfflineBackend, Rover, VisionBackend,
    VisionLabeler,
};
use fieldbot_types::{Cancellation, FieldError, Run};
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::config::Config;

/// Cancellation flag of the session in progress, shared with the Ctrl-C
/// handler.
#[derive(Debug, Clone, Default)]
pub struct ActiveSession(Arc<Mutex<Option<Cancellation>>>);

impl ActiveSession {
    fn lock(&self) -> MutexGuard<'_, Option<Cancellation>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) -> Cancellation {
        let cancel = Cancellation::new();
        *self.lock() = Some(cancel.clone());
        cancel
    }

    fn end(&self) {
        self.lock().take();
    }

    /// Cancel the running session.  Returns `false` when none is running.
    pub fn interrupt(&self) -> bool {
        match self.lock().take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}

pub struct SessionRunner {
    config: Config,
    runtime: Runtime,
    vision: VisionLabeler,
    history: RunHistory,
    active: ActiveSession,
}

impl SessionRunner {
    pub fn new(config: Config, runtime: Runtime) -> Self {
        let backend: Box<dyn VisionBackend> = if config.vision.api_key.is_empty() {
            warn!("no vision API key configured; frames will be labelled offline");
            Box::new(OfflineBackend)
        } else {
            Box::new(GeminiBackend::new(config.vision.clone()))
        };
        let vision = VisionLabeler::new(backend, config.vision.clone());
        Self {
            config,
            runtime,
            vision,
            history: RunHistory::new(),
            active: ActiveSession::default(),
        }
    }

    pub fn active(&self) -> ActiveSession {
        self.active.clone()
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Drive one session until Ctrl-C, then return its run.
    pub fn run_session(&self) -> Result<Run, FieldError> {
        let rover = build_rover(&self.config)?;
        let session = AutonomousLoop::new(
            self.config.autonomy.clone(),
            self.config.sweep.clone(),
            ObstacleScanPlanner::new(self.config.planner.clone()),
        );
        let cancel = self.active.begin();
        let run = self
            .runtime
            .block_on(session.run(rover, &self.vision, &self.history, &cancel));
        self.active.end();
        info!(run = %run.id, entries = run.entries.len(), "session finished");
        Ok(run)
    }

    /// Put a free-form question to the farming assistant.
    pub fn ask(&self, question: &str) -> String {
        self.runtime.block_on(self.vision.ask(question))
    }
}

#[cfg(not(feature = "raspberry-pi"))]
fn build_rover(config: &Config) -> Result<Rover, FieldError> {
    use fieldbot_hal::sim::{RangeStep, RecordingMotor, ScriptedRangeDriver, SimCamera, SimServo};

    const APPROACH_MM: [f32; 9] = [1200.0, 1000.0, 800.0, 600.0, 420.0, 260.0, 140.0, 900.0, 1200.0];
    const LAPS: usize = 500;

    let script = std::iter::repeat_n(APPROACH_MM, LAPS).flatten().map(RangeStep::Mm);
    let range = ScriptedRangeDriver::new(script).then_repeat(RangeStep::Mm(1200.0));
    Ok(Rover {
        sensor: RangeSensor::open(Box::new(range), config.range.clone()),
        servo: ServoScanner::open(Box::new(SimServo::new())),
        drive: DriveActuator::new(Box::new(RecordingMotor::new("drive_base")), config.drive.clone()),
        camera: Box::new(SimCamera::new()),
    })
}

#[cfg(feature = "raspberry-pi")]
fn build_rover(config: &Config) -> Result<Rover, FieldError> {
    use fieldbot_hal::rpi::{PulseServoDriver, PwmMotorDriver, Vl53l1xDriver};
    use fieldbot_hal::v4l2::V4lCamera;

    Ok(Rover {
        sensor: RangeSensor::open(Box::new(Vl53l1xDriver::open()?), config.range.clone()),
        servo: ServoScanner::open(Box::new(PulseServoDriver::open()?)),
        drive: DriveActuator::new(Box::new(PwmMotorDriver::open()?), config.drive.clone()),
        camera: Box::new(V4lCamera::open(0, 640, 480)?),
    })
}
