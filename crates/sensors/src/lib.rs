//! Sensor side of the SmartRC vehicle.
//!
//! - [`SensorRegistry`]: process-wide catalog of [`SensorType`]s with one
//!   refresh task per timed sensor.
//! - [`SubscriptionManager`]: per-connection data subscriptions and alert
//!   registrations, delivering [`Message`](smartrc_protocol::Message)s
//!   through a callback.
//! - [`sources`]: concrete (mostly simulated) sensor sources.

mod error;
mod registry;
mod sensor;
pub mod sources;
mod subscriptions;

pub use error::{RegistryError, SensorError, SubscriptionError};
pub use registry::SensorRegistry;
pub use sensor::{
    AlertCallback, AlertCondition, AlertRule, AlertSubscriptionId, SensorSource, SensorSpec,
    SensorType,
};
pub use subscriptions::{Cadence, DeliverFn, SubscriptionManager, resolve_cadence};
