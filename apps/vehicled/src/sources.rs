//! Vehicle-specific sensor sources built on top of the actuator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smartrc_actuation::Actuator;
use smartrc_protocol::SensorValue;
use smartrc_sensors::{SensorError, SensorSource};

const AMBIENT_CELSIUS: f64 = 25.0;
/// Steady-state temperature rise at full throttle.
const FULL_LOAD_RISE: f64 = 70.0;
const TIME_CONSTANT: Duration = Duration::from_secs(45);
/// Motor current at full throttle, in amperes.
pub const FULL_LOAD_AMPS: f64 = 12.0;

/// Maximum range of the rangefinder; reported when nothing is in front.
const CLEAR_DISTANCE_CM: f64 = 200.0;
const MIN_DISTANCE_CM: f64 = 2.0;
/// Ground speed at full throttle.
const FULL_SPEED_CM_S: f64 = 150.0;
/// Speed at which the obstacle moves out of the way while the car stands.
const OBSTACLE_DRIFT_CM_S: f64 = 20.0;

/// First-order thermal model of the drive motor, heated by the current
/// throttle of the actuator.
pub struct MotorThermal {
    actuator: Arc<dyn Actuator>,
    state: Mutex<(f64, Instant)>,
}

impl MotorThermal {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            state: Mutex::new((AMBIENT_CELSIUS, Instant::now())),
        }
    }

    /// Advances the model to `now` at the current throttle.
    fn sample(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.1);
        state.1 = now;

        let target = AMBIENT_CELSIUS + FULL_LOAD_RISE * (self.actuator.current_speed().abs() / 100.0);
        let k = 1.0 - (-elapsed.as_secs_f64() / TIME_CONSTANT.as_secs_f64()).exp();
        state.0 += (target - state.0) * k;
        (state.0 * 10.0).round() / 10.0
    }
}

impl SensorSource for MotorThermal {
    fn read(&self) -> Result<SensorValue, SensorError> {
        Ok(SensorValue::Number(self.sample(Instant::now())))
    }
}

/// Ultrasonic rangefinder facing forward with one obstacle ahead.
///
/// The obstacle comes closer while the car drives forward and recedes while
/// it reverses. A standing car sees it slowly move out of the way.
pub struct Rangefinder {
    actuator: Arc<dyn Actuator>,
    state: Mutex<(f64, Instant)>,
}

impl Rangefinder {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self {
            actuator,
            state: Mutex::new((CLEAR_DISTANCE_CM, Instant::now())),
        }
    }

    fn sample(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.1).as_secs_f64();
        state.1 = now;

        let speed = self.actuator.current_speed();
        let velocity = if speed == 0.0 {
            OBSTACLE_DRIFT_CM_S
        } else {
            -FULL_SPEED_CM_S * speed / 100.0
        };
        state.0 = (state.0 + velocity * elapsed).clamp(MIN_DISTANCE_CM, CLEAR_DISTANCE_CM);
        state.0.round()
    }
}

impl SensorSource for Rangefinder {
    fn read(&self) -> Result<SensorValue, SensorError> {
        Ok(SensorValue::Number(self.sample(Instant::now())))
    }
}

/// Motor current draw for the battery model.
pub fn motor_load(actuator: &Arc<dyn Actuator>) -> impl Fn() -> f64 + Send + Sync + 'static {
    let actuator = Arc::clone(actuator);
    move || FULL_LOAD_AMPS * actuator.current_speed().abs() / 100.0
}

/// Throttle read back from the actuator.
pub fn speed_readback(actuator: &Arc<dyn Actuator>) -> Arc<dyn SensorSource> {
    let actuator = Arc::clone(actuator);
    Arc::new(move || Ok::<_, SensorError>(SensorValue::Number(actuator.current_speed())))
}

/// Steering position read back from the actuator.
pub fn steering_readback(actuator: &Arc<dyn Actuator>) -> Arc<dyn SensorSource> {
    let actuator = Arc::clone(actuator);
    Arc::new(move || {
        Ok::<_, SensorError>(SensorValue::Number(actuator.current_steer_position()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartrc_actuation::SimulatedActuator;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn motor_heats_under_load_and_cools_at_rest() {
        let actuator: Arc<dyn Actuator> = Arc::new(SimulatedActuator::default());
        let motor = MotorThermal::new(Arc::clone(&actuator));
        let t0 = Instant::now();
        assert_eq!(motor.sample(t0 + secs(10)), 25.0);

        actuator.drive(100.0).unwrap();
        let warm = motor.sample(t0 + secs(55));
        assert!(warm > 65.0 && warm < 75.0, "{warm}");
        let hot = motor.sample(t0 + secs(655));
        assert!((hot - 95.0).abs() < 0.1, "{hot}");

        actuator.drive(0.0).unwrap();
        let cooled = motor.sample(t0 + secs(1255));
        assert!((cooled - 25.0).abs() < 0.1, "{cooled}");

        assert!(matches!(motor.read(), Ok(SensorValue::Number(_))));
    }

    #[test]
    fn obstacle_approaches_while_driving_forward() {
        let actuator: Arc<dyn Actuator> = Arc::new(SimulatedActuator::default());
        let range = Rangefinder::new(Arc::clone(&actuator));
        let t0 = Instant::now();
        assert_eq!(range.sample(t0 + secs(1)), CLEAR_DISTANCE_CM);

        actuator.drive(50.0).unwrap();
        assert_eq!(range.sample(t0 + secs(2)), 125.0);
        assert_eq!(range.sample(t0 + secs(10)), MIN_DISTANCE_CM);

        actuator.drive(-20.0).unwrap();
        assert_eq!(range.sample(t0 + secs(11)), 32.0);

        actuator.drive(0.0).unwrap();
        assert_eq!(range.sample(t0 + secs(12)), 52.0);
        assert_eq!(range.sample(t0 + secs(30)), CLEAR_DISTANCE_CM);
    }

    #[test]
    fn readbacks_follow_actuator() {
        let actuator: Arc<dyn Actuator> = Arc::new(SimulatedActuator::default());
        let speed = speed_readback(&actuator);
        let steering = steering_readback(&actuator);
        let load = motor_load(&actuator);

        actuator.drive(-50.0).unwrap();
        actuator.steer(20.0).unwrap();
        assert_eq!(speed.read(), Ok(SensorValue::Number(-50.0)));
        assert_eq!(steering.read(), Ok(SensorValue::Number(20.0)));
        assert_eq!(load(), 6.0);
    }
}
