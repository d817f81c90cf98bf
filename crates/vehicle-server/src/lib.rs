//! SRCCP server for the SmartRC vehicle.
//!
//! Accepts any number of controller connections over TCP (up to a
//! configured cap). Each connection gets its own session with a
//! subscription table, while all sessions share the sensor registry and the
//! actuation safety layer.

mod connection;
mod dispatcher;
mod server;

pub use connection::{SendError, Sender, SessionInfo};
pub use dispatcher::{Dispatcher, Outcome};
pub use server::{ServerConfig, VehicleServer};

/// Outbound queue capacity per connection.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the vehicle server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already running")]
    AlreadyRunning,
}
