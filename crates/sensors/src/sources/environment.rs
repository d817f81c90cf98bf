//! Simulated combined temperature/humidity/pressure sensor (BME280-style).

use std::sync::Arc;

use parking_lot::Mutex;
use smartrc_protocol::SensorValue;

use crate::error::SensorError;
use crate::sensor::SensorSource;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    temperature: f64,
    humidity: f64,
    pressure: f64,
}

/// Shared device behind the `Temperature`, `Humidity` and `Pressure` sensors.
///
/// Values drift slowly around a baseline so that only-new subscribers see
/// occasional changes.
#[derive(Debug)]
pub struct Environment {
    baseline: Baseline,
    samples: Mutex<u64>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(21.5, 45.0, 1013.25)
    }
}

impl Environment {
    pub fn new(temperature: f64, humidity: f64, pressure: f64) -> Self {
        Self {
            baseline: Baseline {
                temperature,
                humidity,
                pressure,
            },
            samples: Mutex::new(0),
        }
    }

    fn sample(&self, quantity: EnvironmentQuantity) -> f64 {
        let n = {
            let mut samples = self.samples.lock();
            *samples += 1;
            *samples as f64
        };
        let wobble = (n / 20.0).sin();
        let (base, amplitude) = match quantity {
            EnvironmentQuantity::Temperature => (self.baseline.temperature, 0.5),
            EnvironmentQuantity::Humidity => (self.baseline.humidity, 2.0),
            EnvironmentQuantity::Pressure => (self.baseline.pressure, 0.8),
        };
        ((base + amplitude * wobble) * 10.0).round() / 10.0
    }

    pub fn reading(self: &Arc<Self>, quantity: EnvironmentQuantity) -> EnvironmentReading {
        EnvironmentReading {
            device: Arc::clone(self),
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentQuantity {
    Temperature,
    Humidity,
    Pressure,
}

#[derive(Debug, Clone)]
pub struct EnvironmentReading {
    device: Arc<Environment>,
    quantity: EnvironmentQuantity,
}

impl SensorSource for EnvironmentReading {
    fn read(&self) -> Result<SensorValue, SensorError> {
        Ok(SensorValue::Number(self.device.sample(self.quantity)))
    }
}
