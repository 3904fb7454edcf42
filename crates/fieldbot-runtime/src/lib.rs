//! `fieldbot-runtime` – the rover's reactive brain.
//!
//! Couples the leaf components of `fieldbot-hal` into the obstacle-avoidance
//! behaviour.
//!
//! # Modules
//!
//! - [`servo_actor`] – [`ServoActor`][servo_actor::ServoActor]: the task that
//!   owns the pan/tilt head, sweeps it in the background and hands out
//!   [`ManualControl`][servo_actor::ManualControl] guards that suspend the
//!   sweep.
//! - [`planner`] – [`ObstacleScanPlanner`][planner::ObstacleScanPlanner]:
//!   scans a fixed set of angles and turns the resulting map into one
//!   maneuver, reversing and re-scanning when something is too close.
//! - [`autonomy`] – [`AutonomousLoop`][autonomy::AutonomousLoop]: the
//!   per-tick sample/look/log/react cycle that produces a
//!   [`Run`][fieldbot_types::Run].
//! - [`vision`] – [`VisionLabeler`][vision::VisionLabeler]: cloud object
//!   labelling with backoff on rate limits, a daily quota and a local
//!   throttle.  Never fails its caller.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: compact or
//!   JSON logs, plus OTLP export of the session/tick/plan spans tagged with
//!   the rover id when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod autonomy;
pub mod planner;
pub mod servo_actor;
pub mod telemetry;
pub mod vision;

pub use autonomy::{AutonomousLoop, AutonomyConfig, NO_FRAME_LABEL, Rover};
pub use planner::{ObstacleScanPlanner, PlanOutcome, PlanReport, PlannerConfig, UTurnReason};
pub use servo_actor::{ManualControl, ServoActor, ServoHandle};
pub use telemetry::{LogFormat, TelemetryConfig, TracerProviderGuard, init_tracing};
pub use vision::{GeminiBackend, Label, OfflineBackend, VisionBackend, VisionConfig, VisionError, VisionLabeler};
