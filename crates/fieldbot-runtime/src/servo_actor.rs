//! [`ServoActor`] – single owner of the pan/tilt head.
//!
//! The [`ServoScanner`] lives inside one Tokio task.  Everyone else talks to
//! it through a cloneable [`ServoHandle`]:
//!
//! | Message            | Effect                                               |
//! |--------------------|------------------------------------------------------|
//! | `Suspend`          | stop background sweep steps (counted, re-entrant)    |
//! | `Resume`           | undo one `Suspend`                                   |
//! | `Step`             | advance the sweep by one degree, reply with state    |
//! | `SetHorizontal`    | point the pan axis at an absolute angle              |
//! | `Shutdown`         | leave the task loop and hand the scanner back        |
//!
//! Every state change is published on a `watch` channel, so reading the
//! current [`ServoState`] never waits on the actor.
//!
//! # Arbitration
//!
//! The planner must hold a [`ManualControl`] guard while it scans.  While any
//! guard is alive the actor performs no background steps and only executes
//! explicit requests, so two parties never advance the head concurrently.
//! Dropping the guard resumes the sweep.

use std::time::Duration;

use fieldbot_hal::{ServoScanner, SweepConfig};
use fieldbot_types::{Cancellation, FieldError, ServoState};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum ServoCommand {
    Suspend(oneshot::Sender<()>),
    Resume,
    Step(oneshot::Sender<(ServoState, bool)>),
    SetHorizontal(u8, oneshot::Sender<ServoState>),
    Shutdown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

/// The task that owns the [`ServoScanner`].
///
/// Servo writes may block while a pulse ramps, so every scanner call runs on
/// the blocking pool and the scanner travels there and back by value.
pub struct ServoActor {
    period: Duration,
    commands: mpsc::UnboundedReceiver<ServoCommand>,
    state_tx: watch::Sender<ServoState>,
    cancel: Cancellation,
    suspended: u32,
}

impl ServoActor {
    /// Move `scanner` into a new task and start sweeping.
    ///
    /// The returned [`JoinHandle`] yields the scanner back once the actor has
    /// stopped (after [`ServoHandle::shutdown`], cancellation, or every
    /// handle being dropped).
    pub fn spawn(
        scanner: ServoScanner,
        config: &SweepConfig,
        cancel: Cancellation,
    ) -> (ServoHandle, JoinHandle<ServoScanner>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(scanner.state());
        let actor = Self {
            period: Duration::from_millis(config.period_ms.max(1)),
            commands: cmd_rx,
            state_tx,
            cancel,
            suspended: 0,
        };
        let task = tokio::spawn(actor.run(scanner));
        (
            ServoHandle {
                commands: cmd_tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(mut self, mut scanner: ServoScanner) -> ServoScanner {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = self.period.as_millis() as u64, "servo sweep started");

        loop {
            if self.cancel.is_cancelled() {
                debug!("servo sweep cancelled");
                break;
            }
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    None | Some(ServoCommand::Shutdown) => break,
                    Some(cmd) => scanner = self.handle(scanner, cmd).await,
                },
                _ = ticker.tick() => {
                    if self.suspended == 0 {
                        let (next, (state, _)) = off_thread(scanner, ServoScanner::step).await;
                        scanner = next;
                        self.publish(state);
                    }
                }
            }
        }

        info!("servo sweep stopped");
        scanner
    }

    async fn handle(&mut self, scanner: ServoScanner, cmd: ServoCommand) -> ServoScanner {
        match cmd {
            ServoCommand::Suspend(ack) => {
                self.suspended += 1;
                debug!(depth = self.suspended, "servo sweep suspended");
                let _ = ack.send(());
                scanner
            }
            ServoCommand::Resume => {
                self.suspended = self.suspended.saturating_sub(1);
                debug!(depth = self.suspended, "servo sweep resume requested");
                scanner
            }
            ServoCommand::Step(reply) => {
                let (scanner, (state, at_extreme)) = off_thread(scanner, ServoScanner::step).await;
                self.publish(state);
                let _ = reply.send((state, at_extreme));
                scanner
            }
            ServoCommand::SetHorizontal(degrees, reply) => {
                let (scanner, state) = off_thread(scanner, move |s| s.set_horizontal(degrees)).await;
                self.publish(state);
                let _ = reply.send(state);
                scanner
            }
            ServoCommand::Shutdown => scanner,
        }
    }

    fn publish(&self, state: ServoState) {
        self.state_tx.send_replace(state);
    }
}

/// Run `f` against `scanner` on the blocking pool and hand the scanner back.
///
/// A panic inside the driver is re-raised in the actor task.
async fn off_thread<R, F>(mut scanner: ServoScanner, f: F) -> (ServoScanner, R)
where
    F: FnOnce(&mut ServoScanner) -> R + Send + 'static,
    R: Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let out = f(&mut scanner);
        (scanner, out)
    });
    match task.await {
        Ok(done) => done,
        Err(e) => std::panic::resume_unwind(e.into_panic()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable client of a running [`ServoActor`].
#[derive(Clone)]
pub struct ServoHandle {
    commands: mpsc::UnboundedSender<ServoCommand>,
    state: watch::Receiver<ServoState>,
}

impl ServoHandle {
    /// Latest published servo state.
    pub fn state(&self) -> ServoState {
        *self.state.borrow()
    }

    /// A receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<ServoState> {
        self.state.clone()
    }

    /// Suspend the background sweep and return a guard for explicit control.
    ///
    /// Resolves only after the actor has acknowledged the suspension, so no
    /// background step can land after this returns.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ServoUnavailable`] when the actor has stopped.
    pub async fn take_manual(&self) -> Result<ManualControl, FieldError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(ServoCommand::Suspend(ack_tx))?;
        ack_rx.await.map_err(|_| FieldError::ServoUnavailable)?;
        Ok(ManualControl {
            handle: self.clone(),
        })
    }

    /// Ask the actor to stop.  Await its `JoinHandle` to observe the stop.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ServoCommand::Shutdown);
    }

    fn send(&self, cmd: ServoCommand) -> Result<(), FieldError> {
        self.commands.send(cmd).map_err(|_| FieldError::ServoUnavailable)
    }
}

/// RAII guard that keeps the background sweep suspended.
pub struct ManualControl {
    handle: ServoHandle,
}

impl ManualControl {
    pub fn state(&self) -> ServoState {
        self.handle.state()
    }

    /// Advance the sweep by one degree, returning the new state and whether
    /// a horizontal extreme was reached.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ServoUnavailable`] when the actor has stopped.
    pub async fn step(&self) -> Result<(ServoState, bool), FieldError> {
        let (tx, rx) = oneshot::channel();
        self.handle.send(ServoCommand::Step(tx))?;
        rx.await.map_err(|_| FieldError::ServoUnavailable)
    }

    /// Point the pan axis at `degrees`, keeping tilt and sweep direction.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::ServoUnavailable`] when the actor has stopped.
    pub async fn set_horizontal(&self, degrees: u8) -> Result<ServoState, FieldError> {
        let (tx, rx) = oneshot::channel();
        self.handle.send(ServoCommand::SetHorizontal(degrees, tx))?;
        rx.await.map_err(|_| FieldError::ServoUnavailable)
    }
}

impl Drop for ManualControl {
    fn drop(&mut self) {
        if self.handle.commands.send(ServoCommand::Resume).is_err() {
            warn!("servo actor gone before manual control was released");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
