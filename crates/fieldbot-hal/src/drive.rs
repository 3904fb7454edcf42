//! [`DriveActuator`] – named open-loop motions for the differential drive.
//!
//! There is no wheel feedback: a motion is a duty cycle applied to both
//! H-bridges.  Turn-class motions ([`DriveMode::is_timed`]) hold for a fixed
//! duration and then stop on their own; the caller is blocked for the whole
//! maneuver.  A new command always supersedes the previous one.

use std::time::Duration;

use fieldbot_types::{DriveMode, DutyCycle, FieldError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// PWM output stage of the drive base.
pub trait MotorDriver: Send {
    /// Stable identifier, e.g. `"drive_base"`.
    fn id(&self) -> &str;

    /// Switch the outputs to `mode` at `duty`.  Takes effect immediately.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if the PWM outputs cannot be set.
    fn apply(&mut self, mode: DriveMode, duty: DutyCycle) -> Result<(), FieldError>;
}

/// Duty cycles and maneuver timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Normal duty cycle, percent.
    pub duty_cycle: f32,
    /// Reduced duty used when driving without a working range sensor.
    pub cautious_duty_cycle: f32,
    pub turn_duration_ms: u64,
    pub u_turn_duration_ms: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            duty_cycle: 15.0,
            cautious_duty_cycle: 10.0,
            turn_duration_ms: 2000,
            u_turn_duration_ms: 3000,
        }
    }
}

impl DriveConfig {
    pub fn duty(&self) -> DutyCycle {
        DutyCycle::new(self.duty_cycle)
    }

    pub fn cautious_duty(&self) -> DutyCycle {
        DutyCycle::new(self.cautious_duty_cycle)
    }

    /// Default duration of a timed `mode`, or `None` for continuous modes.
    pub fn duration_for(&self, mode: DriveMode) -> Option<Duration> {
        match mode {
            DriveMode::TurnLeft | DriveMode::TurnRight => {
                Some(Duration::from_millis(self.turn_duration_ms))
            }
            DriveMode::UTurn => Some(Duration::from_millis(self.u_turn_duration_ms)),
            _ => None,
        }
    }
}

/// Issues named motions to a [`MotorDriver`].
pub struct DriveActuator {
    driver: Box<dyn MotorDriver>,
    config: DriveConfig,
    current: DriveMode,
    duty: DutyCycle,
}

impl DriveActuator {
    pub fn new(driver: Box<dyn MotorDriver>, config: DriveConfig) -> Self {
        Self {
            driver,
            config,
            current: DriveMode::Stop,
            duty: DutyCycle::new(0.0),
        }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// The mode most recently applied to the outputs.
    pub fn current(&self) -> DriveMode {
        self.current
    }

    /// Duty cycle of the mode most recently applied.
    pub fn current_duty(&self) -> DutyCycle {
        self.duty
    }

    /// Apply `mode` at `duty`.
    ///
    /// For turn-class modes this waits `duration` (or the configured default
    /// when `None`) and then stops.  `duration` is ignored for continuous
    /// modes.
    ///
    /// # Errors
    ///
    /// Propagates the driver's [`FieldError`]; a failed maneuver leaves the
    /// outputs in whatever state the driver reached.
    pub async fn drive(
        &mut self,
        mode: DriveMode,
        duty: DutyCycle,
        duration: Option<Duration>,
    ) -> Result<(), FieldError> {
        self.apply(mode, duty)?;
        if mode.is_timed() {
            if let Some(hold) = duration.or_else(|| self.config.duration_for(mode)) {
                tokio::time::sleep(hold).await;
            }
            self.apply(DriveMode::Stop, DutyCycle::new(0.0))?;
        }
        Ok(())
    }

    pub async fn forward(&mut self, duty: DutyCycle) -> Result<(), FieldError> {
        self.drive(DriveMode::Forward, duty, None).await
    }

    pub async fn reverse(&mut self, duty: DutyCycle) -> Result<(), FieldError> {
        self.drive(DriveMode::Reverse, duty, None).await
    }

    pub async fn turn_left(&mut self, duty: DutyCycle) -> Result<(), FieldError> {
        self.drive(DriveMode::TurnLeft, duty, None).await
    }

    pub async fn turn_right(&mut self, duty: DutyCycle) -> Result<(), FieldError> {
        self.drive(DriveMode::TurnRight, duty, None).await
    }

    pub async fn u_turn(&mut self, duty: DutyCycle) -> Result<(), FieldError> {
        self.drive(DriveMode::UTurn, duty, None).await
    }

    /// Cut both outputs immediately.
    pub fn stop(&mut self) -> Result<(), FieldError> {
        self.apply(DriveMode::Stop, DutyCycle::new(0.0))
    }

    fn apply(&mut self, mode: DriveMode, duty: DutyCycle) -> Result<(), FieldError> {
        info!(driver = self.driver.id(), %mode, duty = duty.percent(), "drive command");
        self.driver.apply(mode, duty)?;
        self.current = mode;
        self.duty = duty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RecordingMotor;
    use tokio::time::Instant;

    fn within(elapsed: Duration, expected_ms: u64) -> bool {
        let expected = Duration::from_millis(expected_ms);
        elapsed >= expected && elapsed < expected + Duration::from_millis(5)
    }

    fn actuator() -> (DriveActuator, crate::sim::MotorLog) {
        let motor = RecordingMotor::new("drive_base");
        let log = motor.log();
        (DriveActuator::new(Box::new(motor), DriveConfig::default()), log)
    }

    #[tokio::test(start_paused = true)]
    async fn turn_blocks_for_duration_then_stops() {
        let (mut drive, log) = actuator();
        let start = Instant::now();
        drive.turn_left(DutyCycle::new(15.0)).await.unwrap();
        assert!(within(start.elapsed(), 2000));
        assert_eq!(log.modes(), vec![DriveMode::TurnLeft, DriveMode::Stop]);
        assert_eq!(drive.current(), DriveMode::Stop);
    }

    #[tokio::test(start_paused = true)]
    async fn u_turn_uses_its_own_duration() {
        let (mut drive, _log) = actuator();
        let start = Instant::now();
        drive.u_turn(DutyCycle::new(15.0)).await.unwrap();
        assert!(within(start.elapsed(), 3000));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_duration_overrides_default() {
        let (mut drive, _log) = actuator();
        let start = Instant::now();
        drive
            .drive(DriveMode::TurnRight, DutyCycle::new(20.0), Some(Duration::from_millis(750)))
            .await
            .unwrap();
        assert!(within(start.elapsed(), 750));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_modes_return_immediately_and_keep_running() {
        let (mut drive, log) = actuator();
        let start = Instant::now();
        drive
            .drive(DriveMode::Forward, DutyCycle::new(15.0), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(drive.current(), DriveMode::Forward);
        assert_eq!(log.modes(), vec![DriveMode::Forward]);
    }

    #[tokio::test]
    async fn driver_fault_is_propagated() {
        let motor = RecordingMotor::new("drive_base").failing();
        let mut drive = DriveActuator::new(Box::new(motor), DriveConfig::default());
        let result = drive.forward(DutyCycle::new(15.0)).await;
        assert!(matches!(result, Err(FieldError::HardwareFault { .. })));
        assert_eq!(drive.current(), DriveMode::Stop);
    }

    #[test]
    fn config_durations() {
        let cfg = DriveConfig::default();
        assert_eq!(cfg.duration_for(DriveMode::TurnLeft), Some(Duration::from_secs(2)));
        assert_eq!(cfg.duration_for(DriveMode::UTurn), Some(Duration::from_secs(3)));
        assert_eq!(cfg.duration_for(DriveMode::Reverse), None);
        assert!(cfg.cautious_duty() < cfg.duty());
    }
}
