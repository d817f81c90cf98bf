use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Marker opening every frame, right after the 2-byte length.
pub const START_MARKER: &[u8] = b"/SRCCP/v0.1/#";

/// Marker closing every frame.
pub const END_MARKER: &[u8] = b"#/";

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Smallest value the length prefix can legally hold (empty payload).
pub const MIN_FRAME_LENGTH: usize = START_MARKER.len() + END_MARKER.len();

/// Largest payload that still fits the 16-bit length prefix.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - MIN_FRAME_LENGTH;

/// Default TCP port of the vehicle.
pub const DEFAULT_PORT: u16 = 8889;

/// Upper bound for a subscription cadence.
pub const MAX_SUBSCRIPTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Root element of an SRCCP document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// `<cmd>`: controller -> vehicle.
    Command,
    /// `<msg>`: sensor data and alerts, vehicle -> controller.
    Message,
    /// `<ctlmsg>`: ack/nack.
    Control,
}

impl MessageKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Command => "cmd",
            Self::Message => "msg",
            Self::Control => "ctlmsg",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cmd" => Some(Self::Command),
            "msg" => Some(Self::Message),
            "ctlmsg" => Some(Self::Control),
            _ => None,
        }
    }
}

/// Name carried in the `<name>` element of a `<cmd>` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Drive,
    Steer,
    Brake,
    Subscribe,
    Unsubscribe,
    Close,
}

impl CommandName {
    pub const ALL: [CommandName; 6] = [
        Self::Drive,
        Self::Steer,
        Self::Brake,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::Close,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Steer => "steer",
            Self::Brake => "brake",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|c| c.as_str() == s).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_frame_length_covers_both_markers() {
        assert_eq!(MIN_FRAME_LENGTH, 15);
        assert_eq!(MAX_PAYLOAD_SIZE, 65_520);
    }

    #[test]
    fn command_names_parse_back() {
        for name in CommandName::ALL {
            assert_eq!(name.as_str().parse::<CommandName>(), Ok(name));
        }
        assert!("fly".parse::<CommandName>().is_err());
    }

    #[test]
    fn message_kind_tags() {
        assert_eq!(MessageKind::from_tag("cmd"), Some(MessageKind::Command));
        assert_eq!(MessageKind::from_tag("ctlmsg"), Some(MessageKind::Control));
        assert_eq!(MessageKind::from_tag("command"), None);
        assert_eq!(MessageKind::Message.tag(), "msg");
    }
}
