//! SRCCP wire protocol shared by the vehicle and its remote controllers.
//!
//! Two layers:
//! - [`frame`]: length-prefixed framing with start/end markers, tolerant of
//!   split reads and corrupted frames.
//! - [`messages`]: the XML documents carried inside a frame (`cmd`, `msg`,
//!   `ctlmsg`).

pub mod constants;
pub mod error;
pub mod frame;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::{CommandName, MessageKind};
pub use error::{FramingError, MessageError, ProtocolError};
pub use frame::{Decoded, FrameCodec, decode, encode};
pub use messages::{Alert, Command, ControlMessage, Message, SensorData, SensorRequest, SubscriptionKind};
pub use types::{SensorValue, Severity};
