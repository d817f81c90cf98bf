//! Process-wide sensor catalog and its refresh drivers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RegistryError;
use crate::sensor::{SensorSpec, SensorType};

/// Catalog of sensor types, keyed by name.
///
/// Sensors are registered explicitly before [`start`](Self::start); once
/// started, each sensor with an interval is refreshed by its own task until
/// [`shutdown`](Self::shutdown).
#[derive(Debug, Default)]
pub struct SensorRegistry {
    sensors: Vec<Arc<SensorType>>,
    by_name: HashMap<String, usize>,
    drivers: Mutex<Option<Drivers>>,
}

#[derive(Debug)]
struct Drivers {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sensor type.
    pub fn register(&mut self, spec: SensorSpec) -> Result<Arc<SensorType>, RegistryError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }
        if spec.interval == Some(Duration::ZERO) {
            return Err(RegistryError::ZeroInterval(spec.name));
        }

        let sensor = Arc::new(SensorType::new(spec));
        self.by_name
            .insert(sensor.name().to_string(), self.sensors.len());
        self.sensors.push(Arc::clone(&sensor));
        Ok(sensor)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SensorType>> {
        self.by_name.get(name).map(|&i| &self.sensors[i])
    }

    /// Sensors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SensorType>> {
        self.sensors.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sensors.iter().map(|s| s.name())
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Reads every sensor once, then spawns one refresh task per sensor that
    /// has an interval.
    ///
    /// The initial read happens before returning, so subscribers never see
    /// an empty cache for a healthy sensor.
    pub fn start(&self) -> Result<(), RegistryError> {
        let mut drivers = self.drivers.lock();
        if drivers.is_some() {
            return Err(RegistryError::AlreadyStarted);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        for sensor in &self.sensors {
            sensor.refresh();
            if let Some(interval) = sensor.interval() {
                let sensor = Arc::clone(sensor);
                let cancel = cancel.child_token();
                tasks.push(tokio::spawn(refresh_loop(sensor, interval, cancel)));
            }
        }

        tracing::info!(
            sensors = self.sensors.len(),
            drivers = tasks.len(),
            "sensor registry started"
        );
        *drivers = Some(Drivers { cancel, tasks });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.drivers.lock().is_some()
    }

    /// Stops all refresh drivers and waits for them to exit.
    pub async fn shutdown(&self) {
        let Some(drivers) = self.drivers.lock().take() else {
            return;
        };
        drivers.cancel.cancel();
        for task in drivers.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "sensor refresh task ended abnormally");
            }
        }
        tracing::info!("sensor registry stopped");
    }
}

impl Drop for SensorRegistry {
    fn drop(&mut self) {
        if let Some(drivers) = self.drivers.get_mut().take() {
            drivers.cancel.cancel();
        }
    }
}

/// Refresh driver of one sensor type.
async fn refresh_loop(sensor: Arc<SensorType>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the first immediate tick; `start` already read the sensor.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => sensor.refresh(),
        }
    }
    tracing::debug!(sensor = %sensor.name(), "refresh driver stopped");
}
