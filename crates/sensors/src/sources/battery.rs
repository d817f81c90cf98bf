//! Simulated 2S LiPo battery monitor.
//!
//! One monitor feeds the `Voltage`, `Current`, `Charge` and `Battery-Temp`
//! sensor types; every read advances the discharge model by the time
//! elapsed since the previous read.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use smartrc_protocol::SensorValue;

use crate::error::SensorError;
use crate::sensor::SensorSource;

const EMPTY_VOLTS: f64 = 6.4;
const FULL_VOLTS: f64 = 8.4;
const IDLE_AMPS: f64 = 0.15;
/// Voltage sag per ampere drawn.
const INTERNAL_RESISTANCE: f64 = 0.06;
const AMBIENT_CELSIUS: f64 = 25.0;
const HEATING_PER_AMP: f64 = 2.5;
const THERMAL_TIME_CONSTANT: Duration = Duration::from_secs(120);

/// Load callback returning the motor current draw in amperes.
pub type LoadFn = Box<dyn Fn() -> f64 + Send + Sync + 'static>;

/// One consistent reading of all battery quantities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySnapshot {
    pub voltage: f64,
    pub current: f64,
    pub remaining_mah: f64,
    pub temperature: f64,
}

struct BatteryState {
    capacity_mah: f64,
    remaining_mah: f64,
    temperature: f64,
    last_poll: Instant,
}

pub struct BatteryMonitor {
    state: Mutex<BatteryState>,
    load: LoadFn,
}

impl BatteryMonitor {
    /// A fully charged pack of `capacity_mah` feeding `load`.
    pub fn new(capacity_mah: f64, load: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(BatteryState {
                capacity_mah,
                remaining_mah: capacity_mah,
                temperature: AMBIENT_CELSIUS,
                last_poll: Instant::now(),
            }),
            load: Box::new(load),
        }
    }

    /// Advances the model to now and returns the result.
    pub fn poll(&self) -> BatterySnapshot {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_poll);
        state.last_poll = now;
        self.advance(&mut state, elapsed)
    }

    /// Advances the model by `elapsed` regardless of wall time.
    pub fn step(&self, elapsed: Duration) -> BatterySnapshot {
        let mut state = self.state.lock();
        self.advance(&mut state, elapsed)
    }

    fn advance(&self, state: &mut BatteryState, elapsed: Duration) -> BatterySnapshot {
        let current = IDLE_AMPS + (self.load)().max(0.0);
        let hours = elapsed.as_secs_f64() / 3600.0;
        state.remaining_mah = (state.remaining_mah - current * hours * 1000.0).max(0.0);

        let target = AMBIENT_CELSIUS + HEATING_PER_AMP * current;
        let k = (elapsed.as_secs_f64() / THERMAL_TIME_CONSTANT.as_secs_f64()).min(1.0);
        state.temperature += (target - state.temperature) * k;

        let soc = state.remaining_mah / state.capacity_mah;
        let voltage = EMPTY_VOLTS + (FULL_VOLTS - EMPTY_VOLTS) * soc - INTERNAL_RESISTANCE * current;

        BatterySnapshot {
            voltage: round2(voltage.max(0.0)),
            current: round2(current),
            remaining_mah: state.remaining_mah.round(),
            temperature: round2(state.temperature),
        }
    }

    /// Sensor source reporting one quantity of this monitor.
    pub fn reading(self: &Arc<Self>, quantity: BatteryQuantity) -> BatteryReading {
        BatteryReading {
            monitor: Arc::clone(self),
            quantity,
        }
    }
}

impl fmt::Debug for BatteryMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatteryMonitor")
            .field("capacity_mah", &state.capacity_mah)
            .field("remaining_mah", &state.remaining_mah)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryQuantity {
    Voltage,
    Current,
    Charge,
    Temperature,
}

#[derive(Debug, Clone)]
pub struct BatteryReading {
    monitor: Arc<BatteryMonitor>,
    quantity: BatteryQuantity,
}

impl SensorSource for BatteryReading {
    fn read(&self) -> Result<SensorValue, SensorError> {
        let snapshot = self.monitor.poll();
        let value = match self.quantity {
            BatteryQuantity::Voltage => snapshot.voltage,
            BatteryQuantity::Current => snapshot.current,
            BatteryQuantity::Charge => snapshot.remaining_mah,
            BatteryQuantity::Temperature => snapshot.temperature,
        };
        Ok(SensorValue::Number(value))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
