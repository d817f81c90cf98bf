//! Concrete sensor sources.
//!
//! Several sensor types may share one physical device (e.g. a battery
//! monitor reporting voltage, current, charge and temperature); those
//! devices are modelled as one shared component that each sensor type holds
//! an `Arc` to.

mod battery;
mod environment;
mod manual;
mod network;
mod thermal;

pub use battery::{BatteryMonitor, BatteryQuantity, BatteryReading, BatterySnapshot};
pub use environment::{Environment, EnvironmentQuantity, EnvironmentReading};
pub use manual::ManualSource;
pub use network::IpAddress;
pub use thermal::CpuTemperature;
