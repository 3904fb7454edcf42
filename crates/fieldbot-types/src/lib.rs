//! `fieldbot-types` – shared data model for the fieldbot workspace.
//!
//! Every crate in the workspace speaks in these types: range readings and
//! scan maps produced by the sensor, the pan/tilt [`ServoState`], the named
//! [`DriveMode`] motions, the per-tick [`RunLogEntry`] records and the global
//! [`FieldError`] type.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Distance
// ─────────────────────────────────────────────────────────────────────────────

/// A valid range measurement in millimetres.
///
/// Construction through [`Distance::from_mm`] rejects non-finite and
/// non-positive values, so a `Distance` in hand is always a usable sample.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Distance(f32);

impl Distance {
    /// Wrap `mm`, returning `None` for values the sensor cannot legitimately
    /// report (`<= 0`, NaN, infinite).
    pub fn from_mm(mm: f32) -> Option<Self> {
        if mm.is_finite() && mm > 0.0 {
            Some(Self(mm))
        } else {
            None
        }
    }

    /// The measurement in millimetres.
    pub fn mm(self) -> f32 {
        self.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} mm", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scan data
// ─────────────────────────────────────────────────────────────────────────────

/// One range sample taken at a pan angle.  `distance` is `None` when the
/// sample failed or the sensor was not ready.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanReading {
    pub angle: u8,
    pub distance: Option<Distance>,
}

/// Ordered angle → distance map built by one scan pass.
///
/// Keys are unique and iteration order is insertion (scan) order.  Recording
/// an angle that is already present replaces its distance in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMap {
    readings: Vec<ScanReading>,
}

impl ScanMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sample taken at `angle`.
    pub fn record(&mut self, angle: u8, distance: Option<Distance>) {
        match self.readings.iter_mut().find(|r| r.angle == angle) {
            Some(existing) => existing.distance = distance,
            None => self.readings.push(ScanReading { angle, distance }),
        }
    }

    /// Distance recorded at `angle`, if the angle was scanned.
    pub fn get(&self, angle: u8) -> Option<Option<Distance>> {
        self.readings
            .iter()
            .find(|r| r.angle == angle)
            .map(|r| r.distance)
    }

    /// All readings, valid or not, in scan order.
    pub fn readings(&self) -> &[ScanReading] {
        &self.readings
    }

    /// Only the readings that carry a distance, in scan order.
    pub fn valid(&self) -> impl Iterator<Item = (u8, Distance)> + '_ {
        self.readings
            .iter()
            .filter_map(|r| r.distance.map(|d| (r.angle, d)))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl FromIterator<(u8, Option<f32>)> for ScanMap {
    fn from_iter<I: IntoIterator<Item = (u8, Option<f32>)>>(iter: I) -> Self {
        let mut map = ScanMap::new();
        for (angle, mm) in iter {
            map.record(angle, mm.and_then(Distance::from_mm));
        }
        map
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Servo state
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound of the horizontal (pan) sweep, in degrees.
pub const HORIZONTAL_MAX_DEG: u8 = 80;

/// Upper bound of the vertical (tilt) sweep, in degrees.
pub const VERTICAL_MAX_DEG: u8 = 30;

/// Which servo of the pan/tilt head a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServoAxis {
    Horizontal,
    Vertical,
}

/// Direction the pan sweep is currently travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SweepDirection {
    /// Increasing angle (+1).
    #[default]
    Up,
    /// Decreasing angle (-1).
    Down,
}

impl SweepDirection {
    /// `+1` or `-1`.
    pub fn sign(self) -> i16 {
        match self {
            SweepDirection::Up => 1,
            SweepDirection::Down => -1,
        }
    }
}

/// Pan/tilt head position plus the direction of the pan sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServoState {
    /// Pan angle, always within `[0, HORIZONTAL_MAX_DEG]`.
    pub horizontal: u8,
    /// Tilt angle, always within `[0, VERTICAL_MAX_DEG]`.
    pub vertical: u8,
    pub direction: SweepDirection,
}

impl ServoState {
    /// `true` when the pan angle sits on either bound of the sweep.
    pub fn at_horizontal_extreme(&self) -> bool {
        self.horizontal == 0 || self.horizontal == HORIZONTAL_MAX_DEG
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Drive
// ─────────────────────────────────────────────────────────────────────────────

/// PWM duty cycle as a percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct DutyCycle(f32);

impl DutyCycle {
    /// Clamp `percent` into `[0, 100]`.  NaN is treated as 0.
    pub fn new(percent: f32) -> Self {
        if percent.is_nan() {
            Self(0.0)
        } else {
            Self(percent.clamp(0.0, 100.0))
        }
    }

    pub fn percent(self) -> f32 {
        self.0
    }

    /// Duty as a fraction in `[0, 1]`.
    pub fn fraction(self) -> f32 {
        self.0 / 100.0
    }
}

/// The named open-loop motions the drive base understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveMode {
    Forward,
    Reverse,
    TurnLeft,
    TurnRight,
    UTurn,
    Stop,
}

impl DriveMode {
    /// Turn-class modes run for a fixed duration and then stop by themselves.
    pub fn is_timed(self) -> bool {
        matches!(self, DriveMode::TurnLeft | DriveMode::TurnRight | DriveMode::UTurn)
    }

    /// Signed `(left, right)` wheel duty fractions for this mode.
    ///
    /// Positive drives a wheel forward, negative in reverse.  Turns spin the
    /// wheels against each other; a U-turn is a long right spin.
    pub fn wheel_duty(self, duty: DutyCycle) -> (f32, f32) {
        let d = duty.fraction();
        match self {
            DriveMode::Forward => (d, d),
            DriveMode::Reverse => (-d, -d),
            DriveMode::TurnLeft => (-d, d),
            DriveMode::TurnRight | DriveMode::UTurn => (d, -d),
            DriveMode::Stop => (0.0, 0.0),
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveMode::Forward => "forward",
            DriveMode::Reverse => "reverse",
            DriveMode::TurnLeft => "turn_left",
            DriveMode::TurnRight => "turn_right",
            DriveMode::UTurn => "u_turn",
            DriveMode::Stop => "stop",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor health
// ─────────────────────────────────────────────────────────────────────────────

/// Rolling fault state of the range sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorHealth {
    pub consecutive_failures: u32,
    /// Once set, the sensor is bypassed for the rest of the session.
    pub disabled: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Run log
// ─────────────────────────────────────────────────────────────────────────────

/// One observation recorded per autonomous tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub label: String,
    pub horizontal_angle: u8,
    pub vertical_angle: u8,
    pub distance_mm: Option<f32>,
}

/// The ordered log of one autonomous session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<RunLogEntry>,
}

impl Run {
    /// Seal `entries` into a run that started at `started_at` and ends now.
    pub fn new(started_at: DateTime<Utc>, entries: Vec<RunLogEntry>) -> Self {
        Self::with_id(Uuid::new_v4(), started_at, entries)
    }

    /// Like [`Run::new`] for an id chosen when the session began.
    pub fn with_id(id: Uuid, started_at: DateTime<Utc>, entries: Vec<RunLogEntry>) -> Self {
        Self {
            id,
            started_at,
            finished_at: Utc::now(),
            entries,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation
// ─────────────────────────────────────────────────────────────────────────────

/// Shared cooperative cancellation flag.
///
/// Cloning is cheap and every clone observes the same flag.  Loops poll
/// [`Cancellation::is_cancelled`] at the top of each iteration.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.  Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type for driver and component failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Sensor disabled: {0}")]
    SensorDisabled(String),

    #[error("Servo actor is not running")]
    ServoUnavailable,

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl FieldError {
    /// Shorthand for [`FieldError::HardwareFault`].
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        FieldError::HardwareFault {
            component: component.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_rejects_non_positive_and_non_finite() {
        assert!(Distance::from_mm(0.0).is_none());
        assert!(Distance::from_mm(-5.0).is_none());
        assert!(Distance::from_mm(f32::NAN).is_none());
        assert!(Distance::from_mm(f32::INFINITY).is_none());
        assert!((Distance::from_mm(120.5).unwrap().mm() - 120.5).abs() < f32::EPSILON);
    }

    #[test]
    fn scan_map_keeps_insertion_order_and_unique_keys() {
        let mut map = ScanMap::new();
        map.record(20, Distance::from_mm(300.0));
        map.record(0, None);
        map.record(10, Distance::from_mm(100.0));
        map.record(0, Distance::from_mm(50.0));

        let angles: Vec<u8> = map.readings().iter().map(|r| r.angle).collect();
        assert_eq!(angles, vec![20, 0, 10]);
        assert_eq!(map.get(0), Some(Distance::from_mm(50.0)));
        assert_eq!(map.get(30), None);
    }

    #[test]
    fn scan_map_valid_skips_missing_samples() {
        let map: ScanMap = [(0, Some(400.0)), (10, None), (20, Some(-1.0)), (30, Some(90.0))]
            .into_iter()
            .collect();
        let valid: Vec<u8> = map.valid().map(|(a, _)| a).collect();
        assert_eq!(valid, vec![0, 30]);
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn wheel_duty_matches_differential_drive() {
        let duty = DutyCycle::new(50.0);
        assert_eq!(DriveMode::Forward.wheel_duty(duty), (0.5, 0.5));
        assert_eq!(DriveMode::Reverse.wheel_duty(duty), (-0.5, -0.5));
        assert_eq!(DriveMode::TurnLeft.wheel_duty(duty), (-0.5, 0.5));
        assert_eq!(DriveMode::TurnRight.wheel_duty(duty), (0.5, -0.5));
        assert_eq!(DriveMode::UTurn.wheel_duty(duty), (0.5, -0.5));
        assert_eq!(DriveMode::Stop.wheel_duty(duty), (0.0, 0.0));
    }

    #[test]
    fn only_turn_class_modes_are_timed() {
        assert!(DriveMode::TurnLeft.is_timed());
        assert!(DriveMode::TurnRight.is_timed());
        assert!(DriveMode::UTurn.is_timed());
        assert!(!DriveMode::Forward.is_timed());
        assert!(!DriveMode::Reverse.is_timed());
        assert!(!DriveMode::Stop.is_timed());
    }

    #[test]
    fn duty_cycle_is_clamped() {
        assert_eq!(DutyCycle::new(150.0).percent(), 100.0);
        assert_eq!(DutyCycle::new(-3.0).percent(), 0.0);
        assert_eq!(DutyCycle::new(f32::NAN).percent(), 0.0);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let flag = Cancellation::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn run_log_entry_serializes_missing_distance_as_null() {
        let entry = RunLogEntry {
            timestamp: Utc::now(),
            label: "pest".to_string(),
            horizontal_angle: 40,
            vertical_angle: 0,
            distance_mm: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"distance_mm\":null"));
    }

    #[test]
    fn field_error_display() {
        let err = FieldError::hardware("vl53l1x", "i2c nack");
        assert!(err.to_string().contains("vl53l1x"));
        assert!(err.to_string().contains("i2c nack"));
    }
}
