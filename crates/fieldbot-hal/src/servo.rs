//! [`ServoScanner`] – the pan/tilt sweep of the range sensor head.
//!
//! The pan axis bounces between `0` and [`HORIZONTAL_MAX_DEG`] one degree per
//! step.  Each time it lands on a bound the tilt axis performs a full
//! `0 → VERTICAL_MAX_DEG → 0` sweep before the step returns, so no tilt
//! displacement is ever carried into the pan sweep.
//!
//! The state transition itself is the pure function [`advance`]; the scanner
//! applies it and pushes the resulting angles to a [`ServoDriver`].

use fieldbot_types::{FieldError, HORIZONTAL_MAX_DEG, ServoAxis, ServoState, SweepDirection, VERTICAL_MAX_DEG};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Pulse width for 0°, in microseconds.
const SERVO_MIN_PULSE_US: u32 = 500;
/// Pulse width for 180°, in microseconds.
const SERVO_MAX_PULSE_US: u32 = 2500;

/// Convert an angle in `[0, 180]` degrees to a hobby-servo pulse width.
pub fn angle_to_pulse_us(degrees: u8) -> u32 {
    let degrees = u32::from(degrees.min(180));
    SERVO_MIN_PULSE_US + degrees * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / 180
}

/// Pulse widths that walk a servo from `from_us` to `to_us` in `step_us`
/// increments, both ends included.  The last width is always `to_us`.
pub fn pulse_ramp(from_us: u32, to_us: u32, step_us: u32) -> impl Iterator<Item = u32> {
    let step = step_us.max(1);
    let mut next = Some(from_us);
    std::iter::from_fn(move || {
        let current = next?;
        next = match current.cmp(&to_us) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Less => Some(current.saturating_add(step).min(to_us)),
            std::cmp::Ordering::Greater => Some(current.saturating_sub(step).max(to_us)),
        };
        Some(current)
    })
}

/// A two-axis servo output.
pub trait ServoDriver: Send {
    /// Move `axis` to the absolute `degrees`, blocking until settled.
    ///
    /// May sleep the calling thread; the servo actor calls it from a
    /// blocking task.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if the pulse cannot be written.
    fn set_angle(&mut self, axis: ServoAxis, degrees: u8) -> Result<(), FieldError>;

    /// Stop driving pulses on both axes.
    fn release(&mut self) -> Result<(), FieldError> {
        Ok(())
    }
}

/// Timing of the background sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Period of one pan step.
    pub period_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { period_ms: 50 }
    }
}

/// Compute the next sweep state.
///
/// Moves the pan angle one degree in the sweep direction, clamping at the
/// bounds and flipping the direction exactly when a bound is reached.  The
/// returned flag is `true` when the new pan angle is `0` or
/// [`HORIZONTAL_MAX_DEG`]; in that case the tilt angle is reported as `0`,
/// which is where the nested tilt sweep leaves it.
pub fn advance(state: ServoState) -> (ServoState, bool) {
    let max = i16::from(HORIZONTAL_MAX_DEG);
    let mut horizontal = i16::from(state.horizontal) + state.direction.sign();
    let mut direction = state.direction;
    if horizontal >= max {
        horizontal = max;
        direction = SweepDirection::Down;
    } else if horizontal <= 0 {
        horizontal = 0;
        direction = SweepDirection::Up;
    }

    let mut next = ServoState {
        horizontal: horizontal as u8,
        vertical: state.vertical,
        direction,
    };
    let at_extreme = next.at_horizontal_extreme();
    if at_extreme {
        next.vertical = 0;
    }
    (next, at_extreme)
}

/// Owner of the pan/tilt head and its [`ServoState`].
pub struct ServoScanner {
    driver: Box<dyn ServoDriver>,
    state: ServoState,
}

impl ServoScanner {
    /// Take ownership of `driver` and home both axes to 0°.
    pub fn open(driver: Box<dyn ServoDriver>) -> Self {
        let mut scanner = Self {
            driver,
            state: ServoState::default(),
        };
        scanner.write(ServoAxis::Horizontal, 0);
        scanner.write(ServoAxis::Vertical, 0);
        scanner
    }

    pub fn state(&self) -> ServoState {
        self.state
    }

    /// Advance the pan sweep by one degree.
    ///
    /// At an extreme the tilt axis is swept `0 → 30 → 0` synchronously before
    /// returning; otherwise the current tilt angle is re-asserted unchanged.
    pub fn step(&mut self) -> (ServoState, bool) {
        let (next, at_extreme) = advance(self.state);
        self.state.horizontal = next.horizontal;
        self.state.direction = next.direction;
        self.write(ServoAxis::Horizontal, next.horizontal);

        if at_extreme {
            debug!(horizontal = next.horizontal, "pan extreme reached; sweeping tilt");
            for v in (0..=VERTICAL_MAX_DEG).chain((0..VERTICAL_MAX_DEG).rev()) {
                self.state.vertical = v;
                self.write(ServoAxis::Vertical, v);
            }
        } else {
            self.write(ServoAxis::Vertical, self.state.vertical);
        }
        (self.state, at_extreme)
    }

    /// Point the pan axis at `degrees` (clamped to the sweep range) without
    /// changing the tilt angle or the sweep direction.
    pub fn set_horizontal(&mut self, degrees: u8) -> ServoState {
        let degrees = degrees.min(HORIZONTAL_MAX_DEG);
        self.state.horizontal = degrees;
        self.write(ServoAxis::Horizontal, degrees);
        self.state
    }

    /// Stop driving both servos.
    pub fn close(mut self) {
        if let Err(e) = self.driver.release() {
            warn!(error = %e, "servo release failed");
        }
    }

    // Servo commands carry no feedback; a failed write is logged and the
    // sweep carries on from the commanded state.
    fn write(&mut self, axis: ServoAxis, degrees: u8) {
        if let Err(e) = self.driver.set_angle(axis, degrees) {
            warn!(?axis, degrees, error = %e, "servo command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimServo;

    #[test]
    fn pulse_ramp_walks_to_the_target_in_steps() {
        assert_eq!(pulse_ramp(500, 560, 20).collect::<Vec<_>>(), vec![500, 520, 540, 560]);
        assert_eq!(pulse_ramp(560, 500, 20).collect::<Vec<_>>(), vec![560, 540, 520, 500]);
        assert_eq!(pulse_ramp(500, 511, 20).collect::<Vec<_>>(), vec![500, 511]);
        assert_eq!(pulse_ramp(700, 700, 20).collect::<Vec<_>>(), vec![700]);
    }

    #[test]
    fn pulse_mapping_covers_full_range() {
        assert_eq!(angle_to_pulse_us(0), 500);
        assert_eq!(angle_to_pulse_us(90), 1500);
        assert_eq!(angle_to_pulse_us(180), 2500);
        assert_eq!(angle_to_pulse_us(255), 2500);
    }

    #[test]
    fn horizontal_stays_in_range_and_flips_only_at_bounds() {
        let mut state = ServoState::default();
        for _ in 0..1000 {
            let (next, at_extreme) = advance(state);
            assert!(next.horizontal <= HORIZONTAL_MAX_DEG);
            let flipped = next.direction != state.direction;
            assert_eq!(flipped, at_extreme, "flip must coincide with a bound: {state:?} -> {next:?}");
            assert_eq!(at_extreme, next.horizontal == 0 || next.horizontal == HORIZONTAL_MAX_DEG);
            state = next;
        }
    }

    #[test]
    fn a_full_period_is_160_steps() {
        let start = ServoState::default();
        let mut state = start;
        let mut extremes = 0;
        for _ in 0..160 {
            let (next, at_extreme) = advance(state);
            extremes += usize::from(at_extreme);
            state = next;
        }
        assert_eq!(extremes, 2);
        assert_eq!(state.horizontal, 0);
        assert_eq!(state.direction, SweepDirection::Up);
    }

    #[test]
    fn step_off_the_bounds_keeps_vertical() {
        let servo = SimServo::new();
        let mut scanner = ServoScanner::open(Box::new(servo));
        let (state, at_extreme) = scanner.step();
        assert!(!at_extreme);
        assert_eq!(state.horizontal, 1);
        assert_eq!(state.vertical, 0);
    }

    #[test]
    fn extreme_runs_full_tilt_sweep_and_returns_to_zero() {
        let servo = SimServo::new();
        let log = servo.log();
        let mut scanner = ServoScanner::open(Box::new(servo));
        scanner.set_horizontal(79);
        log.clear();

        let (state, at_extreme) = scanner.step();
        assert!(at_extreme);
        assert_eq!(state.horizontal, 80);
        assert_eq!(state.vertical, 0);
        assert_eq!(state.direction, SweepDirection::Down);

        let tilt: Vec<u8> = log
            .entries()
            .into_iter()
            .filter(|(axis, _)| *axis == ServoAxis::Vertical)
            .map(|(_, deg)| deg)
            .collect();
        assert_eq!(tilt.len(), 61);
        assert_eq!(tilt.first(), Some(&0));
        assert_eq!(tilt[30], 30);
        assert_eq!(tilt.last(), Some(&0));
        assert!(tilt.windows(2).all(|w| w[0].abs_diff(w[1]) == 1));
    }

    #[test]
    fn vertical_is_zero_after_every_extreme() {
        let mut scanner = ServoScanner::open(Box::new(SimServo::new()));
        for _ in 0..400 {
            let (state, at_extreme) = scanner.step();
            assert!(state.horizontal <= HORIZONTAL_MAX_DEG);
            if at_extreme {
                assert_eq!(state.vertical, 0);
            }
        }
    }

    #[test]
    fn failing_driver_does_not_stop_the_sweep() {
        let mut scanner = ServoScanner::open(Box::new(SimServo::new().failing()));
        let (state, _) = scanner.step();
        assert_eq!(state.horizontal, 1);
    }

    #[test]
    fn set_horizontal_clamps_and_preserves_direction() {
        let mut scanner = ServoScanner::open(Box::new(SimServo::new()));
        let state = scanner.set_horizontal(120);
        assert_eq!(state.horizontal, HORIZONTAL_MAX_DEG);
        assert_eq!(state.direction, SweepDirection::Up);
    }
}
