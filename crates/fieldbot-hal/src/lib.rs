//! `fieldbot-hal` – hardware abstraction for the fieldbot rover.
//!
//! The leaf components of the obstacle-avoidance stack live here.  Each one
//! owns its driver behind a trait, so the runtime never touches GPIO or I2C
//! directly and tests can swap in the simulated drivers from [`sim`].
//!
//! # Modules
//!
//! - [`range`] – [`RangeSensor`][range::RangeSensor]: one-shot distance
//!   samples with fault counting, self-healing reinitialisation and a
//!   permanent disable after repeated failures.
//! - [`servo`] – [`ServoScanner`][servo::ServoScanner]: the bouncing pan
//!   sweep with a nested tilt sweep at each extreme.
//! - [`drive`] – [`DriveActuator`][drive::DriveActuator]: named open-loop
//!   motions at a duty cycle; turn-class motions block for a fixed duration
//!   and then stop.
//! - [`camera`] – the [`Camera`][camera::Camera] trait and JPEG
//!   [`CameraFrame`][camera::CameraFrame]s.
//! - [`sim`] – recording/scripted drivers for headless tests and CI.
//! - `rpi` (feature `raspberry-pi`) – GPIO/I2C drivers built on `rppal`.
//! - `v4l2` (feature `v4l2-backend`) – MJPEG capture from a V4L2 camera.

pub mod camera;
pub mod drive;
pub mod range;
pub mod servo;
pub mod sim;

#[cfg(feature = "raspberry-pi")]
pub mod rpi;

#[cfg(feature = "v4l2-backend")]
pub mod v4l2;

pub use camera::{Camera, CameraFrame};
pub use drive::{DriveActuator, DriveConfig, MotorDriver};
pub use range::{RangeDriver, RangeSensor, RangeSensorConfig};
pub use servo::{ServoDriver, ServoScanner, SweepConfig, advance, angle_to_pulse_us, pulse_ramp};
