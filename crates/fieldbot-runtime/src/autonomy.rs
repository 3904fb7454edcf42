//! [`AutonomousLoop`] – the scan-and-react session.
//!
//! Each tick:
//!
//! 1. **Sample** – one [`RangeSensor`] reading.
//! 2. **Look** – when the pan angle is a multiple of the capture stride,
//!    capture a frame and have the [`VisionLabeler`] name it.
//! 3. **Log** – append a [`RunLogEntry`].
//! 4. **React** – with a disabled sensor, cruise forward at the cautious duty
//!    cycle.  Otherwise, a reading below the obstacle threshold stops the
//!    drive and hands over to the [`ObstacleScanPlanner`]; anything else
//!    cruises forward at the normal duty cycle.
//!
//! The servo sweep runs in its own [`ServoActor`] task for the whole session.
//! On cancellation the loop stops the actor and waits for it, stops the
//! drive, closes the hardware, and appends the finished [`Run`] to the sink.
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldbot_hal::sim::{RangeStep, RecordingMotor, ScriptedRangeDriver, SimCamera, SimServo};
//! use fieldbot_hal::{DriveActuator, DriveConfig, RangeSensor, RangeSensorConfig, ServoScanner, SweepConfig};
//! use fieldbot_memory::RunHistory;
//! use fieldbot_runtime::autonomy::{AutonomousLoop, AutonomyConfig, Rover};
//! use fieldbot_runtime::planner::ObstacleScanPlanner;
//! use fieldbot_runtime::vision::{OfflineBackend, VisionConfig, VisionLabeler};
//! use fieldbot_types::Cancellation;
//!
//! # async fn session() {
//! let rover = Rover {
//!     sensor: RangeSensor::open(
//!         Box::new(ScriptedRangeDriver::new([]).then_repeat(RangeStep::Mm(1200.0))),
//!         RangeSensorConfig::default(),
//!     ),
//!     servo: ServoScanner::open(Box::new(SimServo::new())),
//!     drive: DriveActuator::new(Box::new(RecordingMotor::new("drive_base")), DriveConfig::default()),
//!     camera: Box::new(SimCamera::new()),
//! };
//! let vision = VisionLabeler::new(Box::new(OfflineBackend), VisionConfig::default());
//! let history = RunHistory::new();
//! let cancel = Cancellation::new();
//!
//! let session = AutonomousLoop::new(AutonomyConfig::default(), SweepConfig::default(), ObstacleScanPlanner::default());
//! let run = session.run(rover, &vision, &history, &cancel).await;
//! println!("{} observations", run.entries.len());
//! # }
//! ```

use std::time::Duration;

use chrono::Utc;
use fieldbot_hal::{Camera, DriveActuator, RangeSensor, ServoScanner, SweepConfig};
use fieldbot_memory::RunLogSink;
use fieldbot_types::{Cancellation, Distance, DriveMode, DutyCycle, FieldError, Run, RunLogEntry, Uuid};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::planner::ObstacleScanPlanner;
use crate::servo_actor::{ServoActor, ServoHandle};
use crate::vision::{Label, UNKNOWN_LABEL, VisionLabeler};

/// Label recorded on ticks where no frame was captured.
pub const NO_FRAME_LABEL: &str = "no frame";

/// Cadence and thresholds of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub tick_ms: u64,
    /// Capture a frame when the pan angle is a multiple of this.
    pub capture_stride_deg: u8,
    /// Readings below this hand control to the planner.
    pub obstacle_mm: f32,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            capture_stride_deg: 5,
            obstacle_mm: 300.0,
        }
    }
}

/// The hardware one session drives.  Consumed by [`AutonomousLoop::run`].
pub struct Rover {
    pub sensor: RangeSensor,
    pub servo: ServoScanner,
    pub drive: DriveActuator,
    pub camera: Box<dyn Camera>,
}

/// Top-level reactive cycle.
pub struct AutonomousLoop {
    config: AutonomyConfig,
    sweep: SweepConfig,
    planner: ObstacleScanPlanner,
}

impl AutonomousLoop {
    pub fn new(config: AutonomyConfig, sweep: SweepConfig, planner: ObstacleScanPlanner) -> Self {
        Self { config, sweep, planner }
    }

    /// Run one session until `cancel` is raised.
    ///
    /// Faults never end the session early: they are logged and the next tick
    /// proceeds.  The finished run is appended to `sink` and also returned.
    pub async fn run(
        &self,
        rover: Rover,
        vision: &VisionLabeler,
        sink: &dyn RunLogSink,
        cancel: &Cancellation,
    ) -> Run {
        let run_id = Uuid::new_v4();
        self.session(run_id, rover, vision, sink, cancel)
            .instrument(info_span!("session", run = %run_id))
            .await
    }

    async fn session(
        &self,
        run_id: Uuid,
        rover: Rover,
        vision: &VisionLabeler,
        sink: &dyn RunLogSink,
        cancel: &Cancellation,
    ) -> Run {
        let Rover {
            mut sensor,
            servo,
            mut drive,
            mut camera,
        } = rover;
        let (servo, actor) = ServoActor::spawn(servo, &self.sweep, cancel.clone());

        let started_at = Utc::now();
        let mut entries = Vec::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick_ms, "autonomous session started");

        let mut tick: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            ticker.tick().await;
            if cancel.is_cancelled() {
                break;
            }
            tick += 1;

            let span = info_span!("tick", tick);
            let entry = self
                .observe(&mut sensor, &servo, camera.as_mut(), vision)
                .instrument(span.clone())
                .await;
            let distance = entry.distance_mm;
            entries.push(entry);

            if let Err(e) = self
                .react(distance, &mut sensor, &servo, &mut drive, cancel)
                .instrument(span)
                .await
            {
                warn!(tick, error = %e, "tick reaction failed");
            }
        }

        info!(ticks = tick, "autonomous session stopping");
        servo.shutdown();
        match actor.await {
            Ok(scanner) => scanner.close(),
            Err(e) => warn!(error = %e, "servo actor ended abnormally"),
        }
        if let Err(e) = drive.stop() {
            warn!(error = %e, "failed to stop drive at session end");
        }
        sensor.close();

        let run = Run::with_id(run_id, started_at, entries);
        sink.append(run.clone());
        run
    }

    async fn observe(
        &self,
        sensor: &mut RangeSensor,
        servo: &ServoHandle,
        camera: &mut dyn Camera,
        vision: &VisionLabeler,
    ) -> RunLogEntry {
        let distance = sensor.sample().await;
        let state = servo.state();

        let stride = self.config.capture_stride_deg;
        let label = if stride > 0 && state.horizontal % stride == 0 {
            match camera.capture() {
                Ok(frame) => vision.label(&frame).await,
                Err(e) => {
                    warn!(camera = camera.id(), error = %e, "frame capture failed");
                    Label::sentinel(UNKNOWN_LABEL)
                }
            }
        } else {
            Label::sentinel(NO_FRAME_LABEL)
        };

        debug!(
            horizontal = state.horizontal,
            vertical = state.vertical,
            distance_mm = distance.map(Distance::mm),
            label = %label.name,
            "observation"
        );
        RunLogEntry {
            timestamp: Utc::now(),
            label: label.name,
            horizontal_angle: state.horizontal,
            vertical_angle: state.vertical,
            distance_mm: distance.map(Distance::mm),
        }
    }

    async fn react(
        &self,
        distance_mm: Option<f32>,
        sensor: &mut RangeSensor,
        servo: &ServoHandle,
        drive: &mut DriveActuator,
        cancel: &Cancellation,
    ) -> Result<(), FieldError> {
        if sensor.is_disabled() {
            let duty = drive.config().cautious_duty();
            return cruise(drive, duty).await;
        }

        match distance_mm {
            Some(mm) if mm < self.config.obstacle_mm => {
                info!(distance_mm = mm, "obstacle ahead; planning");
                drive.stop()?;
                let report = self.planner.plan(sensor, servo, drive, cancel).await?;
                info!(
                    outcome = ?report.outcome,
                    scans = report.scans.len(),
                    reversals = report.reversals,
                    "planner finished"
                );
                Ok(())
            }
            _ => {
                let duty = drive.config().duty();
                cruise(drive, duty).await
            }
        }
    }
}

/// Drive forward at `duty` unless already doing so.
async fn cruise(drive: &mut DriveActuator, duty: DutyCycle) -> Result<(), FieldError> {
    if drive.current() == DriveMode::Forward && drive.current_duty() == duty {
        return Ok(());
    }
    drive.forward(duty).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::{Reply, ScriptedVision};
    use crate::vision::{OFFLINE_LABEL, VisionConfig};
    use fieldbot_hal::sim::{MotorLog, RangeStep, RecordingMotor, ScriptedRangeDriver, SimCamera, SimServo};
    use fieldbot_hal::{DriveConfig, RangeSensorConfig};
    use fieldbot_memory::RunHistory;

    fn rover(range: ScriptedRangeDriver) -> (Rover, MotorLog) {
        let motor = RecordingMotor::new("drive_base");
        let log = motor.log();
        let rover = Rover {
            sensor: RangeSensor::open(Box::new(range), RangeSensorConfig::default()),
            servo: ServoScanner::open(Box::new(SimServo::new())),
            drive: DriveActuator::new(Box::new(motor), DriveConfig::default()),
            camera: Box::new(SimCamera::new()),
        };
        (rover, log)
    }

    fn labeler(backend: ScriptedVision) -> VisionLabeler {
        let config = VisionConfig {
            requests_per_minute: None,
            ..VisionConfig::default()
        };
        VisionLabeler::new(Box::new(backend), config)
    }

    fn cancel_after(ms: u64) -> Cancellation {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            trigger.cancel();
        });
        cancel
    }

    fn session() -> AutonomousLoop {
        AutonomousLoop::new(AutonomyConfig::default(), SweepConfig::default(), ObstacleScanPlanner::default())
    }

    #[tokio::test(start_paused = true)]
    async fn one_entry_per_tick_and_run_is_appended() {
        let (rover, log) = rover(ScriptedRangeDriver::new([]).then_repeat(RangeStep::Mm(1200.0)));
        let vision = labeler(ScriptedVision::always(Reply::Text("tree")));
        let history = RunHistory::new();
        let cancel = cancel_after(3500);

        let run = session().run(rover, &vision, &history, &cancel).await;

        assert_eq!(run.entries.len(), 4);
        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().id, run.id);
        assert_eq!(log.modes().first(), Some(&DriveMode::Forward));
        assert_eq!(log.modes().last(), Some(&DriveMode::Stop));
        assert_eq!(log.count(DriveMode::Forward), 1, "cruising must not re-issue forward");
        assert!(run.entries.iter().all(|e| e.distance_mm == Some(1200.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_labelled_only_on_stride_angles() {
        let (rover, _log) = rover(ScriptedRangeDriver::new([]).then_repeat(RangeStep::Mm(1200.0)));
        let vision = labeler(ScriptedVision::always(Reply::Text("tree")));
        let history = RunHistory::new();
        let config = AutonomyConfig {
            tick_ms: 130,
            ..AutonomyConfig::default()
        };
        let cancel = cancel_after(4000);

        let run = AutonomousLoop::new(config, SweepConfig::default(), ObstacleScanPlanner::default())
            .run(rover, &vision, &history, &cancel)
            .await;

        assert!(!run.entries.is_empty());
        for entry in &run.entries {
            if entry.horizontal_angle % 5 == 0 {
                assert_eq!(entry.label, "tree");
            } else {
                assert_eq!(entry.label, NO_FRAME_LABEL);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_reading_stops_and_runs_the_planner() {
        let range = ScriptedRangeDriver::new([RangeStep::Mm(200.0)]).then_repeat(RangeStep::Mm(1000.0));
        let (rover, log) = rover(range);
        let vision = labeler(ScriptedVision::always(Reply::Text("rock")));
        let history = RunHistory::new();
        let cancel = cancel_after(1500);

        let run = session().run(rover, &vision, &history, &cancel).await;

        assert_eq!(run.entries[0].distance_mm, Some(200.0));
        let modes = log.modes();
        assert_eq!(&modes[..2], &[DriveMode::Stop, DriveMode::Forward]);
        assert_eq!(log.count(DriveMode::Reverse), 0);
        assert_eq!(log.count(DriveMode::UTurn), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_sensor_cruises_at_cautious_duty() {
        let range = ScriptedRangeDriver::new([]).then_repeat(RangeStep::Fault);
        let (rover, log) = rover(range);
        let vision = labeler(ScriptedVision::always(Reply::Text("weed")));
        let history = RunHistory::new();
        let cancel = cancel_after(6500);

        let run = session().run(rover, &vision, &history, &cancel).await;

        assert!(run.entries.iter().all(|e| e.distance_mm.is_none()));
        let forwards: Vec<f32> = log
            .entries()
            .into_iter()
            .filter(|c| c.mode == DriveMode::Forward)
            .map(|c| c.duty.percent())
            .collect();
        assert_eq!(forwards, vec![15.0, 10.0]);
        assert_eq!(log.count(DriveMode::UTurn), 0);
        assert_eq!(log.count(DriveMode::Reverse), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_vision_still_records_entries() {
        let (rover, _log) = rover(ScriptedRangeDriver::new([]).then_repeat(RangeStep::Mm(900.0)));
        let vision = labeler(ScriptedVision::offline());
        let history = RunHistory::new();
        let cancel = cancel_after(2500);

        let run = session().run(rover, &vision, &history, &cancel).await;

        assert_eq!(run.entries.len(), 3);
        assert!(
            run.entries
                .iter()
                .all(|e| e.label == OFFLINE_LABEL || e.label == NO_FRAME_LABEL)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_records_an_empty_run() {
        let (rover, log) = rover(ScriptedRangeDriver::new([]));
        let vision = labeler(ScriptedVision::offline());
        let history = RunHistory::new();
        let cancel = Cancellation::new();
        cancel.cancel();

        let run = session().run(rover, &vision, &history, &cancel).await;

        assert!(run.entries.is_empty());
        assert_eq!(history.len(), 1);
        assert_eq!(log.modes(), vec![DriveMode::Stop]);
    }

    /// Collects the `run` field of every `session` span and the parent of
    /// every `tick` span.
    #[derive(Clone, Default)]
    struct SpanLog(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    impl<S> tracing_subscriber::Layer<S> for SpanLog
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            id: &tracing::span::Id,
            ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            struct RunField(Option<String>);
            impl tracing::field::Visit for RunField {
                fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                    if field.name() == "run" {
                        self.0 = Some(format!("{value:?}"));
                    }
                }
            }
            let name = attrs.metadata().name();
            let line = match name {
                "session" => {
                    let mut run = RunField(None);
                    attrs.record(&mut run);
                    format!("session {}", run.0.unwrap_or_default())
                }
                "tick" => {
                    let parent = ctx.span(id).and_then(|s| s.parent()).map(|p| p.name());
                    format!("tick in {}", parent.unwrap_or("none"))
                }
                _ => return,
            };
            self.0.lock().unwrap().push(line);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_traced_inside_a_session_span_carrying_the_run_id() {
        use tracing_subscriber::layer::SubscriberExt;

        let spans = SpanLog::default();
        let _default = tracing::subscriber::set_default(tracing_subscriber::registry().with(spans.clone()));

        let (rover, _log) = rover(ScriptedRangeDriver::new([]).then_repeat(RangeStep::Mm(1200.0)));
        let vision = labeler(ScriptedVision::always(Reply::Text("tree")));
        let history = RunHistory::new();
        let cancel = cancel_after(2500);

        let run = session().run(rover, &vision, &history, &cancel).await;

        let lines = spans.0.lock().unwrap().clone();
        assert_eq!(lines.first(), Some(&format!("session {}", run.id)));
        let ticks: Vec<_> = lines.iter().filter(|l| l.starts_with("tick")).collect();
        assert_eq!(ticks.len(), run.entries.len());
        assert!(ticks.iter().all(|l| *l == "tick in session"));
    }
}
