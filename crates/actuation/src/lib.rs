//! Actuation for the SmartRC vehicle.
//!
//! [`Actuator`] is the narrow interface to the motor and steering hardware;
//! [`SafetyLayer`] sits in front of it and owns the drive watchdog, speed
//! ceilings and the motor block.

mod actuator;
mod error;
mod safety;
mod simulated;

pub use actuator::Actuator;
pub use error::ActuationError;
pub use safety::{Direction, DriveState, SafetyLayer, SpeedLimits};
pub use simulated::{SimulatedActuator, SteeringGeometry};
