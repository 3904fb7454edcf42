//! [`RangeSensor`] – fault-tolerant time-of-flight distance sampling.
//!
//! Wraps a [`RangeDriver`] with the sampling policy the rest of the rover
//! relies on:
//!
//! - A driver error or an out-of-range value (`<= 0`) is a *failed sample*,
//!   never a fatal error.  The first fault of a call triggers one
//!   [`RangeDriver::reinitialize`] and one retry.
//! - Failed samples (including "not ready") increment a consecutive-failure
//!   counter; any good sample resets it.
//! - After `max_consecutive_failures` failures in a row the sensor is
//!   disabled for the rest of the session and [`RangeSensor::sample`] returns
//!   `None` without touching the hardware again.
//! - Successive samples are spaced by at least the sensor's timing budget.

use std::time::Duration;

use fieldbot_types::{Distance, FieldError, SensorHealth};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Low-level range sensor driver.
pub trait RangeDriver: Send {
    /// Stable identifier, e.g. `"vl53l1x"`.
    fn id(&self) -> &str;

    /// Read one raw measurement in millimetres.
    ///
    /// Returns `Ok(None)` when no new measurement is ready yet.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] when the bus transaction fails.
    fn read_mm(&mut self) -> Result<Option<f32>, FieldError>;

    /// Tear down and recreate the underlying bus/sensor handle.
    fn reinitialize(&mut self) -> Result<(), FieldError>;

    /// Stop ranging and release the bus.
    fn close(&mut self) -> Result<(), FieldError> {
        Ok(())
    }
}

/// Tuning for [`RangeSensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeSensorConfig {
    /// Minimum spacing between two hardware reads.
    pub timing_budget_ms: u64,
    /// Consecutive failed samples after which the sensor is disabled.
    pub max_consecutive_failures: u32,
}

impl Default for RangeSensorConfig {
    fn default() -> Self {
        Self {
            timing_budget_ms: 100,
            max_consecutive_failures: 5,
        }
    }
}

/// Fault-tolerant wrapper around a [`RangeDriver`].
pub struct RangeSensor {
    driver: Box<dyn RangeDriver>,
    config: RangeSensorConfig,
    health: SensorHealth,
    last_read: Option<Instant>,
}

impl RangeSensor {
    /// Take ownership of `driver` and start with a clean health record.
    pub fn open(driver: Box<dyn RangeDriver>, config: RangeSensorConfig) -> Self {
        debug!(sensor = driver.id(), "range sensor opened");
        Self {
            driver,
            config,
            health: SensorHealth::default(),
            last_read: None,
        }
    }

    pub fn health(&self) -> SensorHealth {
        self.health
    }

    pub fn is_disabled(&self) -> bool {
        self.health.disabled
    }

    /// Take one distance sample.
    ///
    /// Returns `None` when the sample failed, was not ready, or the sensor has
    /// been disabled.  Never returns an error.
    pub async fn sample(&mut self) -> Option<Distance> {
        if self.health.disabled {
            return None;
        }

        self.wait_for_budget().await;
        let result = self.read_with_recovery();
        self.last_read = Some(Instant::now());

        match result {
            Some(distance) => {
                self.health.consecutive_failures = 0;
                Some(distance)
            }
            None => {
                self.record_failure();
                None
            }
        }
    }

    /// Recreate the driver's bus handle.  Called internally after a faulty
    /// read; exposed for callers that want to force a reset.
    pub fn reinitialize(&mut self) -> Result<(), FieldError> {
        self.driver.reinitialize()
    }

    /// Stop ranging and release the driver.
    pub fn close(mut self) {
        if let Err(e) = self.driver.close() {
            warn!(sensor = self.driver.id(), error = %e, "range sensor close failed");
        }
    }

    fn read_with_recovery(&mut self) -> Option<Distance> {
        match self.read_once() {
            Ok(reading) => reading,
            Err(e) => {
                warn!(sensor = self.driver.id(), error = %e, "range read failed; reinitialising");
                if let Err(e) = self.driver.reinitialize() {
                    warn!(sensor = self.driver.id(), error = %e, "range sensor reinitialisation failed");
                    return None;
                }
                match self.read_once() {
                    Ok(reading) => reading,
                    Err(e) => {
                        warn!(sensor = self.driver.id(), error = %e, "range read failed after reinitialisation");
                        None
                    }
                }
            }
        }
    }

    fn read_once(&mut self) -> Result<Option<Distance>, FieldError> {
        match self.driver.read_mm()? {
            None => Ok(None),
            Some(mm) => Distance::from_mm(mm).map(Some).ok_or_else(|| {
                FieldError::hardware(self.driver.id(), format!("invalid distance reading {mm}"))
            }),
        }
    }

    fn record_failure(&mut self) {
        self.health.consecutive_failures += 1;
        if self.health.consecutive_failures >= self.config.max_consecutive_failures {
            self.health.disabled = true;
            warn!(
                sensor = self.driver.id(),
                failures = self.health.consecutive_failures,
                "range sensor disabled for the rest of the session"
            );
        }
    }

    async fn wait_for_budget(&self) {
        if let Some(last) = self.last_read {
            let budget = Duration::from_millis(self.config.timing_budget_ms);
            tokio::time::sleep_until(last + budget).await;
        }
    }
}
