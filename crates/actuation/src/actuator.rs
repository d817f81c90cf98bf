use crate::error::ActuationError;

/// Motor and steering hardware.
///
/// Implementations only translate requests into hardware actions; range
/// validation, limits and the watchdog live in
/// [`SafetyLayer`](crate::SafetyLayer). Calls are short and synchronous.
pub trait Actuator: Send + Sync {
    /// Sets the motor to `percent` (-100..100). Negative drives backwards,
    /// zero lets the vehicle roll.
    fn drive(&self, percent: f64) -> Result<(), ActuationError>;

    /// Shorts the motor for full stopping force.
    fn brake(&self) -> Result<(), ActuationError>;

    /// Sets steering to `position` percent, 0 = right limit, 100 = left limit.
    fn steer(&self, position: f64) -> Result<(), ActuationError>;

    /// Currently applied speed in percent.
    fn current_speed(&self) -> f64;

    fn current_steer_position(&self) -> f64;

    /// Releases the hardware (servo off, motor idle).
    fn close(&self) -> Result<(), ActuationError> {
        Ok(())
    }
}
