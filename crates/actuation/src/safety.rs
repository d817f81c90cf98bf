//! Drive watchdog, directional speed ceilings and motor block.
//!
//! One [`SafetyLayer`] exists per vehicle and is shared by every connection.
//! All state transitions and the actuator calls they imply happen under one
//! lock, so a drive command and an expiring watchdog cannot interleave.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actuator::Actuator;
use crate::error::ActuationError;

/// Delay before the watchdog retries a neutral command the actuator refused.
const EXPIRE_RETRY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn of(speed: f64) -> Option<Self> {
        if speed > 0.0 {
            Some(Self::Forward)
        } else if speed < 0.0 {
            Some(Self::Backward)
        } else {
            None
        }
    }
}

/// Per-direction ceilings in percent, applied as a factor to drive requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimits {
    pub forward: f64,
    pub backward: f64,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            forward: 100.0,
            backward: 100.0,
        }
    }
}

impl SpeedLimits {
    pub fn get(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Forward => self.forward,
            Direction::Backward => self.backward,
        }
    }

    fn set(&mut self, direction: Direction, percent: f64) {
        match direction {
            Direction::Forward => self.forward = percent,
            Direction::Backward => self.backward = percent,
        }
    }

    /// Speed actually sent to the motor for a requested `speed`.
    pub fn apply(&self, speed: f64) -> f64 {
        match Direction::of(speed) {
            Some(direction) => speed * self.get(direction) / 100.0,
            None => 0.0,
        }
    }
}

/// Observable watchdog state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveState {
    /// No drive outstanding, motor neutral (or braked).
    Idle,
    Driving {
        /// Speed the controller asked for.
        requested: f64,
        /// Speed after ceilings.
        applied: f64,
        deadline: Instant,
    },
}

struct State {
    drive: DriveState,
    limits: SpeedLimits,
    blocked: bool,
}

struct Shared {
    actuator: Arc<dyn Actuator>,
    window: Duration,
    state: Mutex<State>,
    rearmed: Notify,
}

impl Shared {
    /// Forces neutral if the current deadline has passed. Returns whether it fired.
    ///
    /// A refused neutral command keeps the state `Driving` with a short
    /// deadline so the watchdog tries again.
    fn expire(&self) -> bool {
        let mut state = self.state.lock();
        let DriveState::Driving {
            requested,
            applied,
            deadline,
        } = state.drive
        else {
            return false;
        };
        if Instant::now() < deadline {
            return false;
        }
        match self.actuator.drive(0.0) {
            Ok(()) => {
                state.drive = DriveState::Idle;
                tracing::warn!(
                    window_ms = self.window.as_millis() as u64,
                    "drive watchdog expired, motor set to neutral"
                );
            }
            Err(e) => {
                state.drive = DriveState::Driving {
                    requested,
                    applied,
                    deadline: Instant::now() + EXPIRE_RETRY,
                };
                tracing::error!(error = %e, "drive watchdog could not neutralize motor, retrying");
            }
        }
        true
    }
}

/// Gatekeeper in front of the [`Actuator`].
pub struct SafetyLayer {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl SafetyLayer {
    /// Wraps `actuator` and spawns the watchdog task. Must be called inside a
    /// tokio runtime.
    pub fn new(actuator: Arc<dyn Actuator>, window: Duration) -> Self {
        Self::with_limits(actuator, window, SpeedLimits::default())
    }

    pub fn with_limits(
        actuator: Arc<dyn Actuator>,
        window: Duration,
        limits: SpeedLimits,
    ) -> Self {
        let shared = Arc::new(Shared {
            actuator,
            window,
            state: Mutex::new(State {
                drive: DriveState::Idle,
                limits,
                blocked: false,
            }),
            rearmed: Notify::new(),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watchdog_loop(Arc::clone(&shared), cancel.clone()));
        Self {
            shared,
            cancel,
            watchdog: Mutex::new(Some(task)),
        }
    }

    pub fn watchdog_window(&self) -> Duration {
        self.shared.window
    }

    pub fn state(&self) -> DriveState {
        self.shared.state.lock().drive
    }

    pub fn actuator(&self) -> &Arc<dyn Actuator> {
        &self.shared.actuator
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Drives at `speed` percent (-100..100) until the watchdog window runs
    /// out or another command supersedes it. `0` rolls and disarms the
    /// watchdog. Returns the speed applied after ceilings.
    pub fn drive(&self, speed: f64) -> Result<f64, ActuationError> {
        let speed = ActuationError::check_range("speed", speed, -100.0, 100.0)?;
        let mut state = self.shared.state.lock();

        if speed == 0.0 {
            self.shared.actuator.drive(0.0)?;
            state.drive = DriveState::Idle;
            return Ok(0.0);
        }
        if state.blocked {
            return Err(ActuationError::MotorBlocked);
        }

        let applied = state.limits.apply(speed);
        self.shared.actuator.drive(applied)?;
        state.drive = DriveState::Driving {
            requested: speed,
            applied,
            deadline: Instant::now() + self.shared.window,
        };
        drop(state);

        self.shared.rearmed.notify_one();
        tracing::debug!(speed, applied, "drive");
        Ok(applied)
    }

    /// Full stopping force, independent of any outstanding deadline.
    ///
    /// If the actuator refuses, an outstanding drive stays armed.
    pub fn brake(&self) -> Result<(), ActuationError> {
        let mut state = self.shared.state.lock();
        self.shared.actuator.brake()?;
        state.drive = DriveState::Idle;
        Ok(())
    }

    /// Steers to `position` percent (0..100). Not covered by the watchdog.
    pub fn steer(&self, position: f64) -> Result<(), ActuationError> {
        let position = ActuationError::check_range("steering position", position, 0.0, 100.0)?;
        self.shared.actuator.steer(position)
    }

    /// Sets the motor to neutral if it is driving.
    pub fn neutralize(&self) -> Result<(), ActuationError> {
        let mut state = self.shared.state.lock();
        if let DriveState::Driving { .. } = state.drive {
            self.shared.actuator.drive(0.0)?;
            state.drive = DriveState::Idle;
            tracing::info!("motor set to neutral");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ceilings and block
    // -----------------------------------------------------------------------

    pub fn limits(&self) -> SpeedLimits {
        self.shared.state.lock().limits
    }

    /// Caps `direction` at `percent` of the requested speed until lifted.
    ///
    /// Tightening a ceiling while driving in that direction takes effect
    /// immediately; loosening waits for the next drive command.
    pub fn set_limit(&self, direction: Direction, percent: f64) -> Result<(), ActuationError> {
        let percent = ActuationError::check_range("speed limit", percent, 0.0, 100.0)?;
        let mut state = self.shared.state.lock();
        if state.limits.get(direction) == percent {
            return Ok(());
        }
        state.limits.set(direction, percent);
        tracing::info!(?direction, percent, "speed limit set");

        if let DriveState::Driving {
            requested,
            applied,
            deadline,
        } = state.drive
            && Direction::of(requested) == Some(direction)
        {
            let capped = state.limits.apply(requested);
            if capped.abs() < applied.abs() {
                self.shared.actuator.drive(capped)?;
                state.drive = DriveState::Driving {
                    requested,
                    applied: capped,
                    deadline,
                };
            }
        }
        Ok(())
    }

    pub fn lift_limit(&self, direction: Direction) -> Result<(), ActuationError> {
        self.set_limit(direction, 100.0)
    }

    /// Stops the motor and rejects non-zero drive commands until
    /// [`unblock`](Self::unblock).
    pub fn block(&self) -> Result<(), ActuationError> {
        let mut state = self.shared.state.lock();
        state.blocked = true;
        tracing::info!("motor blocked");
        self.shared.actuator.drive(0.0)?;
        state.drive = DriveState::Idle;
        Ok(())
    }

    pub fn unblock(&self) {
        self.shared.state.lock().blocked = false;
        tracing::info!("motor unblocked");
    }

    pub fn is_blocked(&self) -> bool {
        self.shared.state.lock().blocked
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Stops the watchdog, forces neutral and releases the actuator.
    pub async fn shutdown(&self) -> Result<(), ActuationError> {
        self.cancel.cancel();
        let task = self.watchdog.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "watchdog task ended abnormally");
        }

        {
            let mut state = self.shared.state.lock();
            self.shared.actuator.drive(0.0)?;
            state.drive = DriveState::Idle;
        }
        self.shared.actuator.close()
    }
}

impl Drop for SafetyLayer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watchdog_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let deadline = match shared.state.lock().drive {
            DriveState::Driving { deadline, .. } => Some(deadline),
            DriveState::Idle => None,
        };

        match deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shared.rearmed.notified() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        shared.expire();
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = shared.rearmed.notified() => {}
                }
            }
        }
    }
    tracing::debug!("drive watchdog stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedActuator;

    /// Records every motor command.
    #[derive(Default)]
    struct Recorder {
        inner: SimulatedActuator,
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn neutral_count(&self) -> usize {
            self.calls.lock().iter().filter(|c| *c == "drive 0").count()
        }
    }

    impl Actuator for Recorder {
        fn drive(&self, percent: f64) -> Result<(), ActuationError> {
            self.calls.lock().push(format!("drive {percent}"));
            self.inner.drive(percent)
        }

        fn brake(&self) -> Result<(), ActuationError> {
            self.calls.lock().push("brake".into());
            self.inner.brake()
        }

        fn steer(&self, position: f64) -> Result<(), ActuationError> {
            self.calls.lock().push(format!("steer {position}"));
            self.inner.steer(position)
        }

        fn current_speed(&self) -> f64 {
            self.inner.current_speed()
        }

        fn current_steer_position(&self) -> f64 {
            self.inner.current_steer_position()
        }
    }

    const WINDOW: Duration = Duration::from_millis(500);

    fn layer() -> (Arc<Recorder>, SafetyLayer) {
        let recorder = Arc::new(Recorder::default());
        let layer = SafetyLayer::new(recorder.clone(), WINDOW);
        (recorder, layer)
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_neutralizes_exactly_once() {
        let (recorder, layer) = layer();
        layer.drive(50.0).unwrap();
        assert_eq!(recorder.current_speed(), 50.0);

        tokio::time::sleep(WINDOW * 4).await;
        assert_eq!(layer.state(), DriveState::Idle);
        assert_eq!(recorder.current_speed(), 0.0);
        assert_eq!(recorder.neutral_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_drive_rearms_watchdog() {
        let (recorder, layer) = layer();
        for _ in 0..10 {
            layer.drive(40.0).unwrap();
            tokio::time::sleep(WINDOW / 2).await;
        }
        assert_eq!(recorder.neutral_count(), 0);
        assert!(matches!(layer.state(), DriveState::Driving { .. }));

        tokio::time::sleep(WINDOW).await;
        assert_eq!(recorder.neutral_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_leaves_state_unchanged() {
        let (recorder, layer) = layer();
        layer.drive(30.0).unwrap();
        assert!(matches!(
            layer.drive(150.0),
            Err(ActuationError::OutOfRange { .. })
        ));
        assert!(layer.drive(f64::NAN).is_err());
        assert!(layer.steer(120.0).is_err());
        assert_eq!(recorder.current_speed(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn brake_is_immediate() {
        let (recorder, layer) = layer();
        layer.drive(80.0).unwrap();
        layer.brake().unwrap();
        assert_eq!(layer.state(), DriveState::Idle);
        assert!(recorder.inner.is_braking());

        tokio::time::sleep(WINDOW * 2).await;
        // No watchdog action after brake.
        assert_eq!(recorder.neutral_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn directional_limits() {
        let (recorder, layer) = layer();
        layer.set_limit(Direction::Forward, 40.0).unwrap();

        assert_eq!(layer.drive(50.0).unwrap(), 20.0);
        assert_eq!(layer.drive(-50.0).unwrap(), -50.0);
        assert_eq!(recorder.current_speed(), -50.0);

        layer.lift_limit(Direction::Forward).unwrap();
        assert_eq!(layer.drive(50.0).unwrap(), 50.0);
        assert!(layer.set_limit(Direction::Backward, 101.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn tightening_applies_to_current_drive() {
        let (recorder, layer) = layer();
        layer.drive(60.0).unwrap();
        layer.set_limit(Direction::Forward, 50.0).unwrap();
        assert_eq!(recorder.current_speed(), 30.0);

        // Backward ceiling does not touch a forward drive.
        layer.set_limit(Direction::Backward, 0.0).unwrap();
        assert_eq!(recorder.current_speed(), 30.0);

        // Loosening waits for the next command.
        layer.lift_limit(Direction::Forward).unwrap();
        assert_eq!(recorder.current_speed(), 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_motor_rejects_drive() {
        let (recorder, layer) = layer();
        layer.drive(50.0).unwrap();
        layer.block().unwrap();
        assert_eq!(recorder.current_speed(), 0.0);
        assert_eq!(layer.drive(10.0), Err(ActuationError::MotorBlocked));
        assert_eq!(layer.drive(0.0), Ok(0.0));

        layer.unblock();
        assert_eq!(layer.drive(10.0), Ok(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn actuator_failure_is_propagated() {
        let (recorder, layer) = layer();
        recorder.inner.set_fault(Some("H-bridge fault".into()));
        assert_eq!(
            layer.drive(20.0),
            Err(ActuationError::Actuator("H-bridge fault".into()))
        );
        assert_eq!(layer.state(), DriveState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_brake_keeps_watchdog_armed() {
        let (recorder, layer) = layer();
        layer.drive(50.0).unwrap();

        recorder.inner.set_fault(Some("transient".into()));
        assert!(layer.brake().is_err());
        assert!(matches!(layer.state(), DriveState::Driving { .. }));
        recorder.inner.set_fault(None);

        tokio::time::sleep(WINDOW * 6).await;
        assert_eq!(layer.state(), DriveState::Idle);
        assert_eq!(recorder.current_speed(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_neutralize_keeps_watchdog_armed() {
        let (recorder, layer) = layer();
        layer.drive(40.0).unwrap();

        recorder.inner.set_fault(Some("transient".into()));
        assert!(layer.neutralize().is_err());
        assert!(matches!(layer.state(), DriveState::Driving { .. }));

        // Still refused when the window runs out; the watchdog keeps trying.
        tokio::time::sleep(WINDOW * 2).await;
        assert!(matches!(layer.state(), DriveState::Driving { .. }));
        assert_eq!(recorder.current_speed(), 40.0);

        recorder.inner.set_fault(None);
        tokio::time::sleep(EXPIRE_RETRY * 2).await;
        assert_eq!(layer.state(), DriveState::Idle);
        assert_eq!(recorder.current_speed(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_neutralizes_and_stops_watchdog() {
        let (recorder, layer) = layer();
        layer.drive(70.0).unwrap();
        layer.shutdown().await.unwrap();
        assert_eq!(recorder.current_speed(), 0.0);
        assert_eq!(layer.state(), DriveState::Idle);
    }
}
