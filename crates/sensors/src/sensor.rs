//! Sensor types: one process-wide cached value and alert state per sensor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use smartrc_protocol::{SensorValue, Severity};

use crate::error::SensorError;

/// An active alert on a sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertCondition {
    pub severity: Severity,
    pub message: String,
}

impl AlertCondition {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

/// Hardware (or simulated) access behind one sensor type.
pub trait SensorSource: Send + Sync {
    fn read(&self) -> Result<SensorValue, SensorError>;

    /// Source-specific alert predicate, checked before the [`SensorSpec`] alert rule.
    fn check_alert(&self, _value: &SensorValue) -> Option<AlertCondition> {
        None
    }
}

impl<F> SensorSource for F
where
    F: Fn() -> Result<SensorValue, SensorError> + Send + Sync,
{
    fn read(&self) -> Result<SensorValue, SensorError> {
        self()
    }
}

/// Threshold on a numeric reading.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertRule {
    Below {
        limit: f64,
        severity: Severity,
        label: String,
    },
    Above {
        limit: f64,
        severity: Severity,
        label: String,
    },
}

impl AlertRule {
    pub fn below(limit: f64, severity: Severity, label: impl Into<String>) -> Self {
        Self::Below {
            limit,
            severity,
            label: label.into(),
        }
    }

    pub fn above(limit: f64, severity: Severity, label: impl Into<String>) -> Self {
        Self::Above {
            limit,
            severity,
            label: label.into(),
        }
    }

    /// Text values and absent readings never trigger.
    pub fn check(&self, value: &SensorValue, unit: &str) -> Option<AlertCondition> {
        let n = value.as_number()?;
        let (hit, severity, label) = match self {
            Self::Below {
                limit,
                severity,
                label,
            } => (n < *limit, severity, label),
            Self::Above {
                limit,
                severity,
                label,
            } => (n > *limit, severity, label),
        };
        hit.then(|| {
            let message = format!("{label} {n} {unit}");
            AlertCondition::new(*severity, message.trim_end())
        })
    }
}

/// Static description of a sensor type, handed to
/// [`SensorRegistry::register`](crate::SensorRegistry::register).
pub struct SensorSpec {
    pub name: String,
    pub unit: String,
    /// `None`: read once when the registry starts, never refreshed.
    pub interval: Option<Duration>,
    pub source: Arc<dyn SensorSource>,
    pub alert: Option<AlertRule>,
}

impl SensorSpec {
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        source: Arc<dyn SensorSource>,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            interval: None,
            source,
            alert: None,
        }
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_alert(mut self, rule: AlertRule) -> Self {
        self.alert = Some(rule);
        self
    }
}

/// Callback receiving `(sensor name, alert)` on every alert transition.
pub type AlertCallback = Arc<dyn Fn(&str, &AlertCondition) + Send + Sync + 'static>;

/// Handle returned by [`SensorType::subscribe_alerts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlertSubscriptionId(u64);

/// Where an alert came from. Together with the severity it identifies a
/// condition; the message text follows the reading and is not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertOrigin {
    Source,
    Rule,
    ReadFailure,
}

type AlertKey = (AlertOrigin, Severity);

#[derive(Default)]
struct SensorState {
    value: SensorValue,
    alert: Option<AlertCondition>,
    key: Option<AlertKey>,
}

/// A registered sensor with its shared cache.
///
/// Only the registry's refresh driver writes the cache; any number of
/// subscriptions read it.
pub struct SensorType {
    name: String,
    unit: String,
    interval: Option<Duration>,
    source: Arc<dyn SensorSource>,
    rule: Option<AlertRule>,
    state: RwLock<SensorState>,
    subscribers: Mutex<Vec<(AlertSubscriptionId, AlertCallback)>>,
    next_id: AtomicU64,
}

impl SensorType {
    pub(crate) fn new(spec: SensorSpec) -> Self {
        Self {
            name: spec.name,
            unit: spec.unit,
            interval: spec.interval,
            source: spec.source,
            rule: spec.alert,
            state: RwLock::new(SensorState::default()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Last cached value.
    pub fn value(&self) -> SensorValue {
        self.state.read().value.clone()
    }

    /// Current alert, if any.
    pub fn alert(&self) -> Option<AlertCondition> {
        self.state.read().alert.clone()
    }

    /// Reads the source, updates the cache and notifies alert subscribers
    /// if the alert changed to a new condition.
    ///
    /// A sustained condition is reported once even while its reading drifts.
    /// A failed read clears the value and raises a synthetic alert.
    pub fn refresh(&self) {
        let (value, alert) = match self.source.read() {
            Ok(value) => {
                let alert = self.check_alert(&value);
                (value, alert)
            }
            Err(e) => {
                tracing::warn!(sensor = %self.name, error = %e, "sensor read failed");
                let alert = AlertCondition::new(
                    Severity::Warning,
                    format!("error while reading sensor {}: {e}", self.name),
                );
                (SensorValue::Absent, Some((alert, AlertOrigin::ReadFailure)))
            }
        };
        let key = alert.as_ref().map(|(a, origin)| (*origin, a.severity));

        let transition = {
            let mut state = self.state.write();
            state.value = value;
            state.alert = alert.map(|(a, _)| a);
            let changed = key != state.key;
            state.key = key;
            if changed { state.alert.clone() } else { None }
        };

        if let Some(alert) = transition {
            tracing::info!(sensor = %self.name, alert = %alert.message, "sensor alert");
            self.notify(&alert);
        }
    }

    fn check_alert(&self, value: &SensorValue) -> Option<(AlertCondition, AlertOrigin)> {
        if let Some(alert) = self.source.check_alert(value) {
            return Some((alert, AlertOrigin::Source));
        }
        let rule = self.rule.as_ref()?;
        rule.check(value, &self.unit).map(|a| (a, AlertOrigin::Rule))
    }

    /// Registers `callback` for alert transitions.
    ///
    /// Callbacks run on the refresh driver's task with the subscriber list
    /// locked; they must not call back into this sensor's alert API.
    pub fn subscribe_alerts(&self, callback: AlertCallback) -> AlertSubscriptionId {
        let id = AlertSubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, callback));
        id
    }

    /// Removes a registration. Returns `false` if `id` was not registered.
    pub fn unsubscribe_alerts(&self, id: AlertSubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn alert_subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self, alert: &AlertCondition) {
        let subscribers = self.subscribers.lock();
        for (_, callback) in subscribers.iter() {
            callback(&self.name, alert);
        }
    }
}

impl fmt::Debug for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorType")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ManualSource;

    fn sensor_with(source: Arc<ManualSource>, rule: Option<AlertRule>) -> SensorType {
        let mut spec = SensorSpec::new("Voltage", "V", source);
        spec.alert = rule;
        SensorType::new(spec)
    }

    fn recorder(sensor: &SensorType) -> (AlertSubscriptionId, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = sensor.subscribe_alerts(Arc::new(move |name: &str, alert: &AlertCondition| {
            sink.lock().push(format!("{name}: {}", alert.message));
        }));
        (id, seen)
    }

    #[test]
    fn refresh_caches_value() {
        let source = Arc::new(ManualSource::new(7.4));
        let sensor = sensor_with(Arc::clone(&source), None);
        assert!(sensor.value().is_absent());

        sensor.refresh();
        assert_eq!(sensor.value(), SensorValue::Number(7.4));

        source.set(7.2);
        assert_eq!(sensor.value(), SensorValue::Number(7.4));
        sensor.refresh();
        assert_eq!(sensor.value(), SensorValue::Number(7.2));
    }

    #[test]
    fn alerts_are_reported_on_transition_only() {
        let source = Arc::new(ManualSource::new(7.0));
        let sensor = sensor_with(
            Arc::clone(&source),
            Some(AlertRule::below(6.6, Severity::Warning, "Low Volt.")),
        );
        let (_, seen) = recorder(&sensor);

        sensor.refresh();
        source.set(6.5);
        sensor.refresh();
        sensor.refresh();
        sensor.refresh();
        assert_eq!(*seen.lock(), vec!["Voltage: Low Volt. 6.5 V".to_string()]);

        // Recovery clears the alert silently, a new drop reports again.
        source.set(7.0);
        sensor.refresh();
        assert_eq!(sensor.alert(), None);
        source.set(6.5);
        sensor.refresh();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn drifting_reading_is_one_condition() {
        let source = Arc::new(ManualSource::new(7.0));
        let sensor = sensor_with(
            Arc::clone(&source),
            Some(AlertRule::below(6.6, Severity::Warning, "Low Volt.")),
        );
        let (_, seen) = recorder(&sensor);

        sensor.refresh();
        for v in [6.5, 6.49, 6.48, 6.47] {
            source.set(v);
            sensor.refresh();
        }
        assert_eq!(*seen.lock(), vec!["Voltage: Low Volt. 6.5 V".to_string()]);
        // The cached alert still tracks the latest reading.
        assert_eq!(sensor.alert().unwrap().message, "Low Volt. 6.47 V");

        // A different failure text is still the same condition.
        source.fail("i2c timeout");
        sensor.refresh();
        source.fail("bus error");
        sensor.refresh();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn read_failure_becomes_alert() {
        let source = Arc::new(ManualSource::new(1.0));
        let sensor = sensor_with(Arc::clone(&source), None);
        let (_, seen) = recorder(&sensor);
        sensor.refresh();

        source.fail("i2c timeout");
        sensor.refresh();
        assert!(sensor.value().is_absent());
        let alert = sensor.alert().unwrap();
        assert!(alert.message.contains("Voltage"));
        assert!(alert.message.contains("i2c timeout"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_isolated() {
        let source = Arc::new(ManualSource::new(5.0));
        let sensor = sensor_with(
            Arc::clone(&source),
            Some(AlertRule::below(6.0, Severity::Critical, "Low Volt.")),
        );
        let (first, first_seen) = recorder(&sensor);
        let (_, second_seen) = recorder(&sensor);

        assert!(sensor.unsubscribe_alerts(first));
        assert!(!sensor.unsubscribe_alerts(first));
        assert_eq!(sensor.alert_subscriber_count(), 1);

        sensor.refresh();
        assert!(first_seen.lock().is_empty());
        assert_eq!(second_seen.lock().len(), 1);
    }

    #[test]
    fn rules_ignore_text() {
        let rule = AlertRule::above(60.0, Severity::Warning, "Hot");
        assert_eq!(rule.check(&SensorValue::from("n/a"), "°C"), None);
        assert_eq!(rule.check(&SensorValue::Absent, "°C"), None);
        assert_eq!(
            rule.check(&SensorValue::Number(61.5), "°C"),
            Some(AlertCondition::new(Severity::Warning, "Hot 61.5 °C"))
        );
    }

    #[test]
    fn closures_are_sources() {
        let spec = SensorSpec::new(
            "IP-Address",
            "",
            Arc::new(|| Ok::<_, SensorError>(SensorValue::from("10.0.0.7"))),
        );
        let sensor = SensorType::new(spec);
        sensor.refresh();
        assert_eq!(sensor.value().to_string(), "10.0.0.7");
    }
}
