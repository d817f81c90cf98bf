//! Error types for framing and message parsing.

/// Why a candidate frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("no start marker")]
    NoStartMarker,

    #[error("declared length {0} is shorter than the frame markers")]
    LengthTooShort(usize),

    #[error("end marker mismatch at declared length {0}")]
    EndMarkerMismatch(usize),
}

/// Errors produced by the frame codec.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
}

/// Errors produced while turning a payload into a [`Message`](crate::Message).
///
/// Never fatal to a connection: the session answers with a `nack`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("malformed message: {reason}")]
    Malformed {
        /// The offending payload, lossily decoded.
        raw: String,
        reason: String,
        /// Best-effort name of the command the document was meant to be.
        subject: Option<String>,
    },

    #[error("unknown command '{name}'")]
    UnknownCommand { name: String },
}

impl MessageError {
    pub(crate) fn malformed(raw: &str, subject: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            raw: raw.to_string(),
            reason: reason.into(),
            subject: subject.map(str::to_string),
        }
    }

    /// Name to report in the `nack` for this error.
    pub fn subject(&self) -> &str {
        match self {
            Self::Malformed { subject, .. } => subject.as_deref().unwrap_or("unknown"),
            Self::UnknownCommand { name } => name,
        }
    }
}
