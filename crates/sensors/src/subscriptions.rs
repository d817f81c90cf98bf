//! Per-connection sensor subscriptions.
//!
//! A [`SubscriptionManager`] belongs to exactly one connection. It owns one
//! delivery task per data subscription and one alert registration per
//! sensor; [`close`](SubscriptionManager::close) tears both down before the
//! connection goes away.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use smartrc_protocol::constants::MAX_SUBSCRIPTION_INTERVAL;
use smartrc_protocol::{Alert, Message, SensorData, SensorRequest, SensorValue};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SubscriptionError;
use crate::registry::SensorRegistry;
use crate::sensor::{AlertCondition, AlertSubscriptionId, SensorType};

/// Callback that queues a message on the owning connection.
///
/// Must not block; delivery tasks and alert callbacks call it directly.
pub type DeliverFn = Arc<dyn Fn(Message) + Send + Sync + 'static>;

/// Effective schedule of a data subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Deliver every period.
    Every(Duration),
    /// Deliver the cached value once.
    Once,
}

struct DataSubscription {
    cadence: Cadence,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct AlertRegistration {
    sensor: Weak<SensorType>,
    id: AlertSubscriptionId,
}

pub struct SubscriptionManager {
    registry: Arc<SensorRegistry>,
    deliver: DeliverFn,
    cancel: CancellationToken,
    data: Mutex<HashMap<String, DataSubscription>>,
    alerts: Mutex<HashMap<String, AlertRegistration>>,
}

impl SubscriptionManager {
    /// Creates a manager whose tasks also stop when `parent` is cancelled.
    pub fn new(registry: Arc<SensorRegistry>, deliver: DeliverFn, parent: &CancellationToken) -> Self {
        Self {
            registry,
            deliver,
            cancel: parent.child_token(),
            data: Mutex::new(HashMap::new()),
            alerts: Mutex::new(HashMap::new()),
        }
    }

    fn sensor(&self, name: &str) -> Result<Arc<SensorType>, SubscriptionError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| SubscriptionError::UnknownSensor(name.to_string()))
    }

    // -----------------------------------------------------------------------
    // Data subscriptions
    // -----------------------------------------------------------------------

    /// Starts delivering `request.name`, replacing an existing subscription
    /// to the same sensor.
    pub async fn subscribe(&self, request: &SensorRequest) -> Result<Cadence, SubscriptionError> {
        let sensor = self.sensor(&request.name)?;
        let cadence = resolve_cadence(&request.name, sensor.interval(), request.interval)?;

        let previous = self.data.lock().remove(&request.name);
        if let Some(old) = previous {
            stop(old).await;
        }

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(delivery_loop(
            Arc::downgrade(&sensor),
            cadence,
            request.only_new,
            Arc::clone(&self.deliver),
            cancel.clone(),
        ));
        let replaced = self.data.lock().insert(
            request.name.clone(),
            DataSubscription {
                cadence,
                cancel,
                task,
            },
        );
        // A concurrent subscribe to the same sensor raced us; keep the newest.
        if let Some(old) = replaced {
            stop(old).await;
        }

        tracing::debug!(sensor = %request.name, ?cadence, only_new = request.only_new, "subscribed");
        Ok(cadence)
    }

    /// Stops delivering `name`.
    pub async fn unsubscribe(&self, name: &str) -> Result<(), SubscriptionError> {
        self.sensor(name)?;
        let sub = self
            .data
            .lock()
            .remove(name)
            .ok_or_else(|| SubscriptionError::NotSubscribed(name.to_string()))?;
        stop(sub).await;
        tracing::debug!(sensor = %name, "unsubscribed");
        Ok(())
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.data.lock().contains_key(name)
    }

    pub fn cadence(&self, name: &str) -> Option<Cadence> {
        self.data.lock().get(name).map(|s| s.cadence)
    }

    pub fn subscription_count(&self) -> usize {
        self.data.lock().len()
    }

    // -----------------------------------------------------------------------
    // Alert registrations
    // -----------------------------------------------------------------------

    /// Registers for alert transitions of `name`. Subscribing twice is a no-op.
    pub fn subscribe_alerts(&self, name: &str) -> Result<(), SubscriptionError> {
        let sensor = self.sensor(name)?;
        let mut alerts = self.alerts.lock();
        if alerts.contains_key(name) {
            return Ok(());
        }

        let deliver = Arc::clone(&self.deliver);
        let id = sensor.subscribe_alerts(Arc::new(move |sensor: &str, alert: &AlertCondition| {
            deliver(Message::Alert(Alert {
                sensor: sensor.to_string(),
                severity: alert.severity,
                message: alert.message.clone(),
            }));
        }));
        alerts.insert(
            name.to_string(),
            AlertRegistration {
                sensor: Arc::downgrade(&sensor),
                id,
            },
        );
        Ok(())
    }

    /// Registers for alerts of every sensor in the registry.
    pub fn subscribe_all_alerts(&self) {
        for name in self.registry.names() {
            // Names come from the registry itself.
            let _ = self.subscribe_alerts(name);
        }
    }

    pub fn unsubscribe_alerts(&self, name: &str) -> Result<(), SubscriptionError> {
        self.sensor(name)?;
        let registration = self
            .alerts
            .lock()
            .remove(name)
            .ok_or_else(|| SubscriptionError::NotSubscribed(name.to_string()))?;
        release(registration);
        Ok(())
    }

    pub fn alert_registration_count(&self) -> usize {
        self.alerts.lock().len()
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Cancels every delivery task, waits for them to exit and drops every
    /// alert registration. After this returns the registry no longer calls
    /// into this connection.
    pub async fn close(&self) {
        self.cancel.cancel();

        let registrations: Vec<_> = self.alerts.lock().drain().map(|(_, r)| r).collect();
        for registration in registrations {
            release(registration);
        }

        let subs: Vec<_> = self.data.lock().drain().map(|(_, s)| s).collect();
        let count = subs.len();
        for sub in subs {
            stop(sub).await;
        }
        if count > 0 {
            tracing::debug!(subscriptions = count, "subscriptions closed");
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
        for (_, registration) in self.alerts.get_mut().drain() {
            release(registration);
        }
    }
}

async fn stop(sub: DataSubscription) {
    sub.cancel.cancel();
    if let Err(e) = sub.task.await {
        tracing::warn!(error = %e, "delivery task ended abnormally");
    }
}

fn release(registration: AlertRegistration) {
    if let Some(sensor) = registration.sensor.upgrade() {
        sensor.unsubscribe_alerts(registration.id);
    }
}

/// Clamps a requested cadence to `[sensor interval, MAX_SUBSCRIPTION_INTERVAL]`.
///
/// Without a request the sensor's own interval is used; sensors without
/// interval deliver once unless a period is requested explicitly.
pub fn resolve_cadence(
    sensor: &str,
    sensor_interval: Option<Duration>,
    requested: Option<f64>,
) -> Result<Cadence, SubscriptionError> {
    let period = match requested {
        None => match sensor_interval {
            Some(interval) => interval,
            None => return Ok(Cadence::Once),
        },
        Some(secs) if secs.is_nan() || secs < 0.0 => {
            return Err(SubscriptionError::InvalidInterval {
                sensor: sensor.to_string(),
                interval: secs,
            });
        }
        Some(secs) => {
            let requested =
                Duration::from_secs_f64(secs.min(MAX_SUBSCRIPTION_INTERVAL.as_secs_f64()));
            requested.max(sensor_interval.unwrap_or(Duration::ZERO))
        }
    };

    let period = period.min(MAX_SUBSCRIPTION_INTERVAL);
    if period.is_zero() {
        Ok(Cadence::Once)
    } else {
        Ok(Cadence::Every(period))
    }
}

/// Delivery task of one data subscription.
async fn delivery_loop(
    sensor: Weak<SensorType>,
    cadence: Cadence,
    only_new: bool,
    deliver: DeliverFn,
    cancel: CancellationToken,
) {
    let mut ticker = match cadence {
        Cadence::Every(period) => {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            Some(ticker)
        }
        Cadence::Once => None,
    };
    let mut last: Option<SensorValue> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(sensor) = sensor.upgrade() else {
            break;
        };

        let value = sensor.value();
        let unchanged = only_new && last.as_ref() == Some(&value);
        if !value.is_absent() && !unchanged {
            deliver(Message::SensorData(SensorData {
                sensor: sensor.name().to_string(),
                value: value.clone(),
                unit: sensor.unit().to_string(),
            }));
            last = Some(value);
        }
        drop(sensor);

        let Some(ticker) = ticker.as_mut() else {
            break;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
    }
}
