//! [`ObstacleScanPlanner`] – decides how to get past an obstacle.
//!
//! Called with the rover stopped in front of something.  One call runs this
//! state machine:
//!
//! ```text
//!            ┌────────────────────────────────────────────┐
//!            ▼                                            │ recovered
//!  Scan ──► Evaluate ──► too close ──► Reverse-Recover ───┘
//!   │          │                          │ exhausted
//!   │          ├─ no readings ──────────► Fallback-U-Turn
//!   │          └─ clear enough ──► Decide ─► turn / forward / U-turn
//!   └─ cancelled ──► Aborted
//! ```
//!
//! The planner holds a [`ManualControl`] guard for the whole call, so the
//! background sweep is suspended and every servo movement in between is the
//! planner's own.  Re-scans after a successful reversal are bounded by
//! [`PlannerConfig::max_replans`].
//!
//! [`evaluate`] and [`decide`] are pure and hold the threshold logic.

use std::time::Duration;

use fieldbot_hal::{DriveActuator, RangeSensor};
use fieldbot_types::{Cancellation, Distance, DriveMode, FieldError, HORIZONTAL_MAX_DEG, ScanMap, SweepDirection};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::servo_actor::{ManualControl, ServoHandle};

/// One full sweep out and back, plus slack for the final approach.
const MAX_STEPS_PER_TARGET: usize = 2 * HORIZONTAL_MAX_DEG as usize + 2;

/// Thresholds and bounds of the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Target angles, scanned in this order.
    pub scan_angles: Vec<u8>,
    /// Below this the rover reverses before deciding anything.
    pub too_close_mm: f32,
    /// Readings below this flag their half of the arc as blocked; also the
    /// distance reverse-recovery backs off to.
    pub clearance_mm: f32,
    /// Angles below this belong to the low half of the arc.
    pub split_angle: u8,
    pub max_reverse_attempts: u32,
    /// Consecutive empty re-samples that abort reverse-recovery.
    pub max_invalid_resamples: u32,
    /// Time given to each reverse burst before re-sampling.
    pub reverse_settle_ms: u64,
    /// How long to keep driving forward after a turn before returning.
    pub forward_hold_ms: u64,
    /// Re-scans allowed after successful reversals within one call.
    pub max_replans: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            scan_angles: (0..=HORIZONTAL_MAX_DEG).step_by(10).collect(),
            too_close_mm: 150.0,
            clearance_mm: 300.0,
            split_angle: 40,
            max_reverse_attempts: 20,
            max_invalid_resamples: 5,
            reverse_settle_ms: 500,
            forward_hold_ms: 1000,
            max_replans: 3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Why the planner fell back to a U-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UTurnReason {
    /// The scan produced no valid reading at all.
    NoReadings,
    /// Both halves of the arc are blocked.
    BothSidesBlocked,
    /// Reverse-recovery hit its attempt bound.
    ReverseLimit,
    /// Reverse-recovery saw too many empty re-samples in a row.
    InvalidReadings,
    /// Too many re-scans within one call.
    ReplanLimit,
}

/// The maneuver a planning call ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    Forward,
    TurnedLeft,
    TurnedRight,
    UTurn(UTurnReason),
    /// Cancelled before a maneuver was chosen; the drive is stopped.
    Aborted,
}

/// Result of a planning call.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanReport {
    pub outcome: PlanOutcome,
    /// Every completed scan, oldest first.
    pub scans: Vec<ScanMap>,
    /// Reverse bursts issued across all recoveries.
    pub reversals: u32,
}

/// Summary of one scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    NoReadings,
    TooClose { angle: u8, distance: Distance },
    Clear {
        low_blocked: bool,
        high_blocked: bool,
        nearest: Distance,
        farthest: Distance,
    },
}

/// Classify a scan.
///
/// The nearest reading wins ties by scan order.
pub fn evaluate(map: &ScanMap, config: &PlannerConfig) -> Evaluation {
    let mut nearest: Option<(u8, Distance)> = None;
    let mut farthest: Option<Distance> = None;
    let mut low_blocked = false;
    let mut high_blocked = false;

    for (angle, distance) in map.valid() {
        if nearest.is_none_or(|(_, d)| distance < d) {
            nearest = Some((angle, distance));
        }
        if farthest.is_none_or(|d| distance > d) {
            farthest = Some(distance);
        }
        if distance.mm() < config.clearance_mm {
            if angle < config.split_angle {
                low_blocked = true;
            } else {
                high_blocked = true;
            }
        }
    }

    match (nearest, farthest) {
        (Some((angle, distance)), _) if distance.mm() < config.too_close_mm => {
            Evaluation::TooClose { angle, distance }
        }
        (Some((_, nearest)), Some(farthest)) => Evaluation::Clear {
            low_blocked,
            high_blocked,
            nearest,
            farthest,
        },
        _ => Evaluation::NoReadings,
    }
}

/// Pick the maneuver for a scan with nothing too close.
pub fn decide(low_blocked: bool, high_blocked: bool) -> PlanOutcome {
    match (low_blocked, high_blocked) {
        (true, true) => PlanOutcome::UTurn(UTurnReason::BothSidesBlocked),
        (true, false) => PlanOutcome::TurnedLeft,
        (false, true) => PlanOutcome::TurnedRight,
        (false, false) => PlanOutcome::Forward,
    }
}

enum Recovery {
    Recovered(Distance),
    Exhausted(UTurnReason),
    Aborted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Planner
// ─────────────────────────────────────────────────────────────────────────────

/// Scan-and-plan routine over the rover's sensor, servo head and drive.
#[derive(Debug, Clone, Default)]
pub struct ObstacleScanPlanner {
    config: PlannerConfig,
}

impl ObstacleScanPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Run one planning call to completion.
    ///
    /// Blocks for every maneuver it issues.  Sensor faults and planning
    /// exhaustion resolve to a U-turn; cancellation stops the drive and
    /// returns [`PlanOutcome::Aborted`].
    ///
    /// # Errors
    ///
    /// Returns the [`FieldError`] of a failed drive command, or
    /// [`FieldError::ServoUnavailable`] if the servo actor has stopped.
    #[instrument(skip_all, name = "plan")]
    pub async fn plan(
        &self,
        sensor: &mut RangeSensor,
        servo: &ServoHandle,
        drive: &mut DriveActuator,
        cancel: &Cancellation,
    ) -> Result<PlanReport, FieldError> {
        let mut report = PlanReport {
            outcome: PlanOutcome::Aborted,
            scans: Vec::new(),
            reversals: 0,
        };
        match self.run(sensor, servo, drive, cancel, &mut report).await {
            Ok(()) => Ok(report),
            // The servo actor exits on cancel too, so its requests fail mid-maneuver.
            Err(e) if cancel.is_cancelled() => {
                info!(error = %e, "plan interrupted by cancellation");
                drive.stop()?;
                report.outcome = PlanOutcome::Aborted;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    async fn run(
        &self,
        sensor: &mut RangeSensor,
        servo: &ServoHandle,
        drive: &mut DriveActuator,
        cancel: &Cancellation,
        report: &mut PlanReport,
    ) -> Result<(), FieldError> {
        if cancel.is_cancelled() {
            drive.stop()?;
            return Ok(());
        }
        let manual = servo.take_manual().await?;
        let mut replans = 0;

        loop {
            let Some(map) = self.scan(sensor, &manual, cancel).await? else {
                drive.stop()?;
                return Ok(());
            };
            let evaluation = evaluate(&map, &self.config);
            report.scans.push(map);

            match evaluation {
                Evaluation::NoReadings => {
                    warn!("scan produced no valid readings");
                    report.outcome = self.u_turn(drive, UTurnReason::NoReadings).await?;
                    return Ok(());
                }
                Evaluation::TooClose { angle, distance } => {
                    info!(angle, distance_mm = distance.mm(), "obstacle too close; reversing");
                    match self.reverse_recover(angle, sensor, &manual, drive, cancel, report).await? {
                        Recovery::Recovered(distance) => {
                            drive.stop()?;
                            replans += 1;
                            if replans > self.config.max_replans {
                                report.outcome = self.u_turn(drive, UTurnReason::ReplanLimit).await?;
                                return Ok(());
                            }
                            info!(distance_mm = distance.mm(), replans, "reversed clear; re-scanning");
                        }
                        Recovery::Exhausted(reason) => {
                            report.outcome = self.u_turn(drive, reason).await?;
                            return Ok(());
                        }
                        Recovery::Aborted => {
                            drive.stop()?;
                            return Ok(());
                        }
                    }
                }
                Evaluation::Clear {
                    low_blocked,
                    high_blocked,
                    nearest,
                    farthest,
                } => {
                    let outcome = decide(low_blocked, high_blocked);
                    info!(
                        ?outcome,
                        nearest_mm = nearest.mm(),
                        farthest_mm = farthest.mm(),
                        "planner decision"
                    );
                    report.outcome = self.act(outcome, drive).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Sample every target angle.  `None` when cancelled part-way.
    async fn scan(
        &self,
        sensor: &mut RangeSensor,
        manual: &ManualControl,
        cancel: &Cancellation,
    ) -> Result<Option<ScanMap>, FieldError> {
        let mut map = ScanMap::new();
        // Every scan starts from the first target, wherever the sweep left the head.
        if let Some(&first) = self.config.scan_angles.first() {
            manual.set_horizontal(first).await?;
        }
        for &target in &self.config.scan_angles {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if !step_toward(target, manual, cancel).await? {
                return Ok(None);
            }
            let distance = sensor.sample().await;
            info!(angle = target, distance_mm = distance.map(Distance::mm), "scan reading");
            map.record(target, distance);
        }
        Ok(Some(map))
    }

    async fn reverse_recover(
        &self,
        angle: u8,
        sensor: &mut RangeSensor,
        manual: &ManualControl,
        drive: &mut DriveActuator,
        cancel: &Cancellation,
        report: &mut PlanReport,
    ) -> Result<Recovery, FieldError> {
        let duty = drive.config().duty();
        let settle = Duration::from_millis(self.config.reverse_settle_ms);
        let mut attempts = 0;
        let mut invalid = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(Recovery::Aborted);
            }
            if attempts >= self.config.max_reverse_attempts {
                warn!(attempts, "reverse attempts exhausted");
                return Ok(Recovery::Exhausted(UTurnReason::ReverseLimit));
            }

            drive.reverse(duty).await?;
            tokio::time::sleep(settle).await;
            if cancel.is_cancelled() {
                return Ok(Recovery::Aborted);
            }
            manual.set_horizontal(angle).await?;
            let sample = sensor.sample().await;
            attempts += 1;
            report.reversals += 1;

            match sample {
                None => {
                    invalid += 1;
                    warn!(attempts, invalid, "no reading while reversing");
                    if invalid >= self.config.max_invalid_resamples {
                        return Ok(Recovery::Exhausted(UTurnReason::InvalidReadings));
                    }
                }
                Some(distance) => {
                    invalid = 0;
                    info!(attempts, distance_mm = distance.mm(), "reversing");
                    if distance.mm() >= self.config.clearance_mm {
                        return Ok(Recovery::Recovered(distance));
                    }
                }
            }
        }
    }

    async fn act(&self, outcome: PlanOutcome, drive: &mut DriveActuator) -> Result<PlanOutcome, FieldError> {
        let duty = drive.config().duty();
        let hold = Duration::from_millis(self.config.forward_hold_ms);
        match outcome {
            PlanOutcome::TurnedLeft | PlanOutcome::TurnedRight => {
                let turn = if outcome == PlanOutcome::TurnedLeft {
                    DriveMode::TurnLeft
                } else {
                    DriveMode::TurnRight
                };
                drive.drive(turn, duty, None).await?;
                drive.forward(duty).await?;
                tokio::time::sleep(hold).await;
            }
            PlanOutcome::Forward => drive.forward(duty).await?,
            PlanOutcome::UTurn(reason) => return self.u_turn(drive, reason).await,
            PlanOutcome::Aborted => drive.stop()?,
        }
        Ok(outcome)
    }

    async fn u_turn(&self, drive: &mut DriveActuator, reason: UTurnReason) -> Result<PlanOutcome, FieldError> {
        warn!(?reason, "falling back to U-turn");
        let duty = drive.config().duty();
        drive.u_turn(duty).await?;
        Ok(PlanOutcome::UTurn(reason))
    }
}

/// Step the pan axis toward `target` without overshooting in the current
/// sweep direction.  Returns `false` when cancelled.
async fn step_toward(target: u8, manual: &ManualControl, cancel: &Cancellation) -> Result<bool, FieldError> {
    let mut state = manual.state();
    for _ in 0..MAX_STEPS_PER_TARGET {
        if state.horizontal.abs_diff(target) <= 1 {
            break;
        }
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let (next, _) = manual.step().await?;
        state = next;
        let passed = match state.direction {
            SweepDirection::Up => state.horizontal >= target,
            SweepDirection::Down => state.horizontal <= target,
        };
        if passed {
            break;
        }
    }
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo_actor::ServoActor;
    use fieldbot_hal::sim::{MotorLog, RangeStep, RecordingMotor, ScriptedRangeDriver, SimServo};
    use fieldbot_hal::{DriveConfig, RangeSensorConfig, ServoScanner, SweepConfig};
    use tokio::task::JoinHandle;

    fn map(readings: &[(u8, Option<f32>)]) -> ScanMap {
        readings.iter().copied().collect()
    }

    fn uniform_except(special: &[(u8, Option<f32>)], base: f32) -> Vec<RangeStep> {
        (0..=80)
            .step_by(10)
            .map(|angle| match special.iter().find(|(a, _)| *a == angle) {
                Some((_, Some(mm))) => RangeStep::Mm(*mm),
                Some((_, None)) => RangeStep::NotReady,
                None => RangeStep::Mm(base),
            })
            .collect()
    }

    struct Rig {
        sensor: RangeSensor,
        servo: ServoHandle,
        actor: JoinHandle<ServoScanner>,
        drive: DriveActuator,
        log: MotorLog,
        cancel: Cancellation,
    }

    impl Rig {
        fn new(script: Vec<RangeStep>) -> Self {
            let cancel = Cancellation::new();
            let scanner = ServoScanner::open(Box::new(SimServo::new()));
            let (servo, actor) = ServoActor::spawn(scanner, &SweepConfig::default(), cancel.clone());
            let motor = RecordingMotor::new("drive_base");
            let log = motor.log();
            Self {
                sensor: RangeSensor::open(Box::new(ScriptedRangeDriver::new(script)), RangeSensorConfig::default()),
                servo,
                actor,
                drive: DriveActuator::new(Box::new(motor), DriveConfig::default()),
                log,
                cancel,
            }
        }

        async fn plan(&mut self) -> PlanReport {
            ObstacleScanPlanner::default()
                .plan(&mut self.sensor, &self.servo, &mut self.drive, &self.cancel)
                .await
                .expect("plan")
        }

        async fn finish(self) {
            self.servo.shutdown();
            self.actor.await.unwrap();
        }
    }

    #[test]
    fn default_scan_angles() {
        assert_eq!(PlannerConfig::default().scan_angles, vec![0, 10, 20, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn evaluate_empty_map_has_no_readings() {
        let m = map(&[(0, None), (10, None)]);
        assert_eq!(evaluate(&m, &PlannerConfig::default()), Evaluation::NoReadings);
    }

    #[test]
    fn evaluate_reports_nearest_angle_when_too_close() {
        let m = map(&[(0, Some(400.0)), (40, Some(50.0)), (80, Some(120.0))]);
        match evaluate(&m, &PlannerConfig::default()) {
            Evaluation::TooClose { angle, distance } => {
                assert_eq!(angle, 40);
                assert!((distance.mm() - 50.0).abs() < f32::EPSILON);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn evaluate_splits_arc_at_forty_degrees() {
        let cfg = PlannerConfig::default();
        let low = map(&[(30, Some(200.0)), (40, Some(400.0))]);
        let high = map(&[(30, Some(400.0)), (40, Some(200.0))]);
        assert!(matches!(
            evaluate(&low, &cfg),
            Evaluation::Clear { low_blocked: true, high_blocked: false, .. }
        ));
        assert!(matches!(
            evaluate(&high, &cfg),
            Evaluation::Clear { low_blocked: false, high_blocked: true, .. }
        ));
    }

    #[test]
    fn decide_truth_table() {
        assert_eq!(decide(true, true), PlanOutcome::UTurn(UTurnReason::BothSidesBlocked));
        assert_eq!(decide(true, false), PlanOutcome::TurnedLeft);
        assert_eq!(decide(false, true), PlanOutcome::TurnedRight);
        assert_eq!(decide(false, false), PlanOutcome::Forward);
    }

    #[tokio::test(start_paused = true)]
    async fn too_close_reverses_until_clear_then_rescans() {
        let mut script = uniform_except(&[(40, Some(50.0))], 400.0);
        script.extend([RangeStep::Mm(120.0), RangeStep::Mm(220.0), RangeStep::Mm(320.0)]);
        script.extend(uniform_except(&[], 400.0));
        let mut rig = Rig::new(script);

        let report = rig.plan().await;

        assert_eq!(report.outcome, PlanOutcome::Forward);
        assert_eq!(report.scans.len(), 2, "a second scan must follow the reversal");
        assert_eq!(report.reversals, 3);
        assert_eq!(
            rig.log.modes(),
            vec![
                DriveMode::Reverse,
                DriveMode::Reverse,
                DriveMode::Reverse,
                DriveMode::Stop,
                DriveMode::Forward,
            ]
        );
        assert_eq!(rig.servo.state().horizontal, 79);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn obstacle_in_low_half_turns_left_then_forward() {
        let mut rig = Rig::new(uniform_except(&[(20, Some(250.0))], 400.0));
        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::TurnedLeft);
        assert_eq!(
            rig.log.modes(),
            vec![DriveMode::TurnLeft, DriveMode::Stop, DriveMode::Forward]
        );
        assert_eq!(rig.log.count(DriveMode::UTurn), 0);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn obstacle_in_high_half_turns_right() {
        let mut rig = Rig::new(uniform_except(&[(60, Some(200.0))], 400.0));
        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::TurnedRight);
        assert_eq!(rig.log.count(DriveMode::TurnRight), 1);
        assert_eq!(rig.log.count(DriveMode::TurnLeft), 0);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn both_halves_blocked_makes_exactly_one_u_turn() {
        let mut rig = Rig::new(uniform_except(&[(10, Some(200.0)), (70, Some(250.0))], 400.0));
        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::UTurn(UTurnReason::BothSidesBlocked));
        assert_eq!(rig.log.count(DriveMode::UTurn), 1);
        assert_eq!(rig.log.count(DriveMode::TurnLeft), 0);
        assert_eq!(rig.log.count(DriveMode::TurnRight), 0);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn clear_arc_drives_forward() {
        let mut rig = Rig::new(uniform_except(&[], 900.0));
        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::Forward);
        assert_eq!(rig.log.modes(), vec![DriveMode::Forward]);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_valid_readings_falls_back_to_u_turn() {
        let mut rig = Rig::new(Vec::new());
        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::UTurn(UTurnReason::NoReadings));
        assert_eq!(rig.log.modes(), vec![DriveMode::UTurn, DriveMode::Stop]);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn five_empty_resamples_u_turn_and_stop_reversing() {
        let mut script = uniform_except(&[(40, Some(50.0))], 400.0);
        script.extend([RangeStep::Mm(100.0)]);
        let mut rig = Rig::new(script);

        let report = rig.plan().await;

        assert_eq!(report.outcome, PlanOutcome::UTurn(UTurnReason::InvalidReadings));
        assert_eq!(report.reversals, 6);
        assert_eq!(report.scans.len(), 1);
        assert_eq!(rig.log.count(DriveMode::Reverse), 6);
        assert_eq!(rig.log.count(DriveMode::UTurn), 1);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reverse_attempts_are_bounded() {
        let mut script = uniform_except(&[(0, Some(80.0))], 400.0);
        script.extend(std::iter::repeat_n(RangeStep::Mm(140.0), 40));
        let mut rig = Rig::new(script);

        let report = rig.plan().await;

        assert_eq!(report.outcome, PlanOutcome::UTurn(UTurnReason::ReverseLimit));
        assert_eq!(rig.log.count(DriveMode::Reverse), 20);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_recoveries_hit_the_replan_limit() {
        let close = uniform_except(&[(40, Some(50.0))], 400.0);
        let mut script = Vec::new();
        for _ in 0..4 {
            script.extend(close.iter().copied());
            script.push(RangeStep::Mm(350.0));
        }
        let mut rig = Rig::new(script);

        let report = rig.plan().await;

        assert_eq!(report.outcome, PlanOutcome::UTurn(UTurnReason::ReplanLimit));
        assert_eq!(report.scans.len(), 4);
        rig.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_scan() {
        let mut rig = Rig::new(uniform_except(&[], 400.0));
        rig.cancel.cancel();
        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::Aborted);
        assert!(report.scans.is_empty());
        assert_eq!(rig.log.modes(), vec![DriveMode::Stop]);
        let _ = rig.actor.await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_while_reversing_stops_the_drive() {
        let mut script = uniform_except(&[(40, Some(50.0))], 400.0);
        script.extend(std::iter::repeat_n(RangeStep::Mm(120.0), 30));
        let mut rig = Rig::new(script);

        let log = rig.log.clone();
        let cancel = rig.cancel.clone();
        tokio::spawn(async move {
            while !log.modes().contains(&DriveMode::Reverse) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            // Land inside the settle pause of the first reverse burst.
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let report = rig.plan().await;
        assert_eq!(report.outcome, PlanOutcome::Aborted);
        assert_eq!(report.scans.len(), 1);
        assert_eq!(rig.log.modes(), vec![DriveMode::Reverse, DriveMode::Stop]);
        assert_eq!(rig.drive.current(), DriveMode::Stop);
        let _ = rig.actor.await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_servo_actor_without_cancellation_is_an_error() {
        let mut rig = Rig::new(uniform_except(&[], 400.0));
        rig.servo.shutdown();
        let _ = (&mut rig.actor).await;

        let err = ObstacleScanPlanner::default()
            .plan(&mut rig.sensor, &rig.servo, &mut rig.drive, &rig.cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FieldError::ServoUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_resumes_after_plan() {
        let mut rig = Rig::new(uniform_except(&[], 900.0));
        rig.plan().await;
        let after = rig.servo.state();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_ne!(rig.servo.state(), after);
        rig.finish().await;
    }
}
