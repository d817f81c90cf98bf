use std::fmt;
use std::str::FromStr;

/// Most recent reading of a sensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SensorValue {
    Number(f64),
    Text(String),
    /// Nothing read yet, or the last read failed.
    #[default]
    Absent,
}

impl SensorValue {
    /// Parses the text of a `<data>` element.
    ///
    /// Numeric text becomes [`SensorValue::Number`], empty text
    /// [`SensorValue::Absent`], anything else [`SensorValue::Text`].
    pub fn from_wire(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::Absent;
        }
        match text.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(text.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(t) => f.write_str(t),
            Self::Absent => Ok(()),
        }
    }
}

impl From<f64> for SensorValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for SensorValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for SensorValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Alert severity carried in `<severity>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "critical" | "error" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}
