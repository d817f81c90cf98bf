/// Failure of a single sensor read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("read failed: {0}")]
    Read(String),

    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Errors from building or starting a [`SensorRegistry`](crate::SensorRegistry).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("sensor '{0}' is already registered")]
    Duplicate(String),

    #[error("sensor '{0}' has a zero refresh interval")]
    ZeroInterval(String),

    #[error("registry is already running")]
    AlreadyStarted,
}

/// Per-sensor failures of a `subscribe`/`unsubscribe` request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),

    #[error("not subscribed to '{0}'")]
    NotSubscribed(String),

    #[error("invalid interval {interval} for sensor '{sensor}'")]
    InvalidInterval { sensor: String, interval: f64 },
}
