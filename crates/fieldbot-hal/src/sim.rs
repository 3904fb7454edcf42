//! In-process simulated drivers for CI/CD testing without physical hardware.
//!
//! Every stub records the commands it receives in a shared log so tests can
//! assert on exactly what the rover would have done.  The range driver plays
//! back a script of readings and faults.
//!
//! # Example
//!
//! ```rust
//! use fieldbot_hal::sim::{RangeStep, RecordingMotor, ScriptedRangeDriver};
//! use fieldbot_hal::{DriveActuator, DriveConfig, RangeSensor, RangeSensorConfig};
//!
//! let range = ScriptedRangeDriver::new([RangeStep::Mm(420.0), RangeStep::Fault]);
//! let sensor = RangeSensor::open(Box::new(range), RangeSensorConfig::default());
//!
//! let motor = RecordingMotor::new("drive_base");
//! let log = motor.log();
//! let drive = DriveActuator::new(Box::new(motor), DriveConfig::default());
//! assert!(log.modes().is_empty());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fieldbot_types::{DriveMode, DutyCycle, FieldError, ServoAxis};

use crate::camera::{Camera, CameraFrame};
use crate::drive::MotorDriver;
use crate::range::RangeDriver;
use crate::servo::ServoDriver;

// ────────────────────────────────────────────────────────────────────────────
// Shared command log
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable, thread-safe append-only log shared between a stub and a test.
#[derive(Debug)]
pub struct CommandLog<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for CommandLog<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for CommandLog<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> CommandLog<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().push(item);
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<T> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted range driver
// ────────────────────────────────────────────────────────────────────────────

/// One scripted outcome of [`RangeDriver::read_mm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeStep {
    /// A raw reading in millimetres (may be out of range on purpose).
    Mm(f32),
    /// No measurement ready yet.
    NotReady,
    /// The bus transaction fails.
    Fault,
}

/// Counters shared between a [`ScriptedRangeDriver`] and a test.
#[derive(Debug, Clone, Default)]
pub struct RangeCounters {
    reads: Arc<AtomicUsize>,
    reinits: Arc<AtomicUsize>,
}

impl RangeCounters {
    /// Number of `read_mm` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `reinitialize` calls so far.
    pub fn reinits(&self) -> usize {
        self.reinits.load(Ordering::SeqCst)
    }
}

/// A range driver that plays back a fixed script, then repeats a fallback
/// step (default [`RangeStep::NotReady`]) once the script is exhausted.
pub struct ScriptedRangeDriver {
    id: String,
    script: VecDeque<RangeStep>,
    fallback: RangeStep,
    reinit_fails: bool,
    counters: RangeCounters,
}

impl ScriptedRangeDriver {
    pub fn new(script: impl IntoIterator<Item = RangeStep>) -> Self {
        Self {
            id: "sim_range".to_string(),
            script: script.into_iter().collect(),
            fallback: RangeStep::NotReady,
            reinit_fails: false,
            counters: RangeCounters::default(),
        }
    }

    /// Step returned forever after the script runs out.
    pub fn then_repeat(mut self, step: RangeStep) -> Self {
        self.fallback = step;
        self
    }

    /// Make every [`RangeDriver::reinitialize`] call fail.
    pub fn with_failing_reinit(mut self) -> Self {
        self.reinit_fails = true;
        self
    }

    pub fn counters(&self) -> RangeCounters {
        self.counters.clone()
    }
}

impl RangeDriver for ScriptedRangeDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn read_mm(&mut self) -> Result<Option<f32>, FieldError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or(self.fallback) {
            RangeStep::Mm(mm) => Ok(Some(mm)),
            RangeStep::NotReady => Ok(None),
            RangeStep::Fault => Err(FieldError::hardware(&self.id, "scripted bus fault")),
        }
    }

    fn reinitialize(&mut self) -> Result<(), FieldError> {
        self.counters.reinits.fetch_add(1, Ordering::SeqCst);
        if self.reinit_fails {
            Err(FieldError::hardware(&self.id, "scripted reinit failure"))
        } else {
            Ok(())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated servo
// ────────────────────────────────────────────────────────────────────────────

/// A pan/tilt head that records every commanded angle.
#[derive(Default)]
pub struct SimServo {
    log: CommandLog<(ServoAxis, u8)>,
    failing: bool,
}

impl SimServo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every command with a hardware fault.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn log(&self) -> CommandLog<(ServoAxis, u8)> {
        self.log.clone()
    }
}

impl ServoDriver for SimServo {
    fn set_angle(&mut self, axis: ServoAxis, degrees: u8) -> Result<(), FieldError> {
        if self.failing {
            return Err(FieldError::hardware("sim_servo", "scripted pulse failure"));
        }
        self.log.push((axis, degrees));
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording motor
// ────────────────────────────────────────────────────────────────────────────

/// One command received by a [`RecordingMotor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCommand {
    pub mode: DriveMode,
    pub duty: DutyCycle,
}

/// Log handle of a [`RecordingMotor`].
pub type MotorLog = CommandLog<DriveCommand>;

impl MotorLog {
    /// Just the modes, in command order.
    pub fn modes(&self) -> Vec<DriveMode> {
        self.entries().into_iter().map(|c| c.mode).collect()
    }

    /// How many times `mode` was commanded.
    pub fn count(&self, mode: DriveMode) -> usize {
        self.entries().iter().filter(|c| c.mode == mode).count()
    }
}

/// A drive base that records every command and never moves.
pub struct RecordingMotor {
    id: String,
    log: MotorLog,
    failing: bool,
}

impl RecordingMotor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            log: MotorLog::default(),
            failing: false,
        }
    }

    /// Reject every command with a hardware fault.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn log(&self) -> MotorLog {
        self.log.clone()
    }
}

impl MotorDriver for RecordingMotor {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, mode: DriveMode, duty: DutyCycle) -> Result<(), FieldError> {
        if self.failing {
            return Err(FieldError::hardware(&self.id, "scripted PWM failure"));
        }
        self.log.push(DriveCommand { mode, duty });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub camera
// ────────────────────────────────────────────────────────────────────────────

/// Smallest well-formed JPEG marker pair (SOI + EOI).
const BLANK_JPEG: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xD9];

/// A simulated camera that returns a blank JPEG on every capture and counts
/// the captures.
#[derive(Default)]
pub struct SimCamera {
    captures: Arc<AtomicUsize>,
}

impl SimCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared capture counter.
    pub fn captures(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.captures)
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        "sim_camera"
    }

    fn capture(&mut self) -> Result<CameraFrame, FieldError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        CameraFrame::jpeg(self.id(), 0, 0, BLANK_JPEG.to_vec())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
