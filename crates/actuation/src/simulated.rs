//! Actuator without hardware: keeps the state a motor driver and a steering
//! servo would be in and logs every change.

use parking_lot::Mutex;

use crate::actuator::Actuator;
use crate::error::ActuationError;

/// Pulse-width window of the steering servo.
///
/// The servo accepts `min_pulse_us..max_pulse_us`; the steering linkage only
/// allows the part between `right_limit` and `left_limit` percent of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringGeometry {
    pub min_pulse_us: f64,
    pub max_pulse_us: f64,
    pub right_limit: f64,
    pub left_limit: f64,
}

impl Default for SteeringGeometry {
    fn default() -> Self {
        Self {
            min_pulse_us: 750.0,
            max_pulse_us: 2250.0,
            right_limit: 33.0,
            left_limit: 72.0,
        }
    }
}

impl SteeringGeometry {
    /// Servo pulse width for a steering position (0 = right, 100 = left).
    pub fn pulse_width(&self, position: f64) -> f64 {
        let per_percent = (self.max_pulse_us - self.min_pulse_us) / 100.0;
        let right = self.min_pulse_us + self.right_limit * per_percent;
        let left = self.min_pulse_us + self.left_limit * per_percent;
        right + (left - right) * position / 100.0
    }
}

#[derive(Debug)]
struct MotorState {
    speed: f64,
    braking: bool,
    position: f64,
    pulse_us: f64,
    fault: Option<String>,
}

#[derive(Debug)]
pub struct SimulatedActuator {
    geometry: SteeringGeometry,
    state: Mutex<MotorState>,
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new(SteeringGeometry::default())
    }
}

impl SimulatedActuator {
    /// Starts stopped with the wheels centred.
    pub fn new(geometry: SteeringGeometry) -> Self {
        Self {
            geometry,
            state: Mutex::new(MotorState {
                speed: 0.0,
                braking: false,
                position: 50.0,
                pulse_us: geometry.pulse_width(50.0),
                fault: None,
            }),
        }
    }

    /// Makes every following call fail with `reason`, or heals with `None`.
    pub fn set_fault(&self, reason: Option<String>) {
        self.state.lock().fault = reason;
    }

    pub fn is_braking(&self) -> bool {
        self.state.lock().braking
    }

    /// Pulse width currently sent to the steering servo; 0 once closed.
    pub fn pulse_width(&self) -> f64 {
        self.state.lock().pulse_us
    }

    fn check_fault(state: &MotorState) -> Result<(), ActuationError> {
        match &state.fault {
            Some(reason) => Err(ActuationError::Actuator(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Actuator for SimulatedActuator {
    fn drive(&self, percent: f64) -> Result<(), ActuationError> {
        let percent = ActuationError::check_range("speed", percent, -100.0, 100.0)?;
        let mut state = self.state.lock();
        Self::check_fault(&state)?;
        state.speed = percent.round();
        state.braking = false;
        tracing::debug!(speed = state.speed, "motor");
        Ok(())
    }

    fn brake(&self) -> Result<(), ActuationError> {
        let mut state = self.state.lock();
        Self::check_fault(&state)?;
        state.speed = 0.0;
        state.braking = true;
        tracing::debug!("motor shorted");
        Ok(())
    }

    fn steer(&self, position: f64) -> Result<(), ActuationError> {
        // Round half up to a whole percent before range checking.
        let position = (position + 0.5).floor();
        let position = ActuationError::check_range("steering position", position, 0.0, 100.0)?;
        let mut state = self.state.lock();
        Self::check_fault(&state)?;
        state.position = position;
        state.pulse_us = self.geometry.pulse_width(position);
        tracing::debug!(position, pulse_us = state.pulse_us, "steering");
        Ok(())
    }

    fn current_speed(&self) -> f64 {
        self.state.lock().speed
    }

    fn current_steer_position(&self) -> f64 {
        self.state.lock().position
    }

    fn close(&self) -> Result<(), ActuationError> {
        let mut state = self.state.lock();
        state.speed = 0.0;
        state.braking = false;
        state.pulse_us = 0.0;
        tracing::info!("actuator released");
        Ok(())
    }
}
