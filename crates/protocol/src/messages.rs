//! XML documents carried inside SRCCP frames.
//!
//! The root element names the kind (`cmd`, `msg`, `ctlmsg`), `<name>` the
//! concrete message, remaining children carry the fields.

use std::fmt::Write as _;

use roxmltree::{Document, Node};

use crate::constants::{CommandName, MessageKind};
use crate::error::MessageError;
use crate::types::{SensorValue, Severity};

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

/// Any document that can travel over an SRCCP connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Command(Command),
    SensorData(SensorData),
    Alert(Alert),
    Control(ControlMessage),
}

/// Controller -> vehicle request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Percent speed, -100..100; negative drives backwards, 0 rolls.
    Drive { speed: f64 },
    /// Percent steering position, 0 (right limit)..100 (left limit).
    Steer { angle: f64 },
    Brake,
    Subscribe {
        kind: SubscriptionKind,
        sensors: Vec<SensorRequest>,
    },
    Unsubscribe {
        kind: SubscriptionKind,
        sensors: Vec<String>,
    },
    Close,
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Self::Drive { .. } => CommandName::Drive,
            Self::Steer { .. } => CommandName::Steer,
            Self::Brake => CommandName::Brake,
            Self::Subscribe { .. } => CommandName::Subscribe,
            Self::Unsubscribe { .. } => CommandName::Unsubscribe,
            Self::Close => CommandName::Close,
        }
    }
}

/// What a `subscribe`/`unsubscribe` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubscriptionKind {
    /// Periodic `sensordata` pushes.
    #[default]
    Data,
    /// `alert` pushes on alert transitions.
    Alert,
}

impl SubscriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Alert => "alert",
        }
    }
}

/// One `<sensor>` entry of a `subscribe` command.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRequest {
    pub name: String,
    /// Requested cadence in seconds.
    pub interval: Option<f64>,
    /// Skip pushes whose value equals the last one sent.
    pub only_new: bool,
}

impl SensorRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: None,
            only_new: true,
        }
    }

    pub fn with_interval(mut self, seconds: f64) -> Self {
        self.interval = Some(seconds);
        self
    }

    pub fn with_only_new(mut self, only_new: bool) -> Self {
        self.only_new = only_new;
        self
    }
}

/// `sensordata` push.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorData {
    pub sensor: String,
    pub value: SensorValue,
    /// Empty when the sensor has no unit.
    pub unit: String,
}

/// `alert` push.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub sensor: String,
    pub severity: Severity,
    pub message: String,
}

/// `ack`/`nack` reply to exactly one inbound document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub ack: bool,
    /// Name of the command being answered.
    pub subject: String,
    pub message: Option<String>,
}

impl ControlMessage {
    pub fn ack(subject: impl Into<String>) -> Self {
        Self {
            ack: true,
            subject: subject.into(),
            message: None,
        }
    }

    pub fn nack(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ack: false,
            subject: subject.into(),
            message: Some(message.into()),
        }
    }
}

impl From<Command> for Message {
    fn from(cmd: Command) -> Self {
        Self::Command(cmd)
    }
}

impl From<SensorData> for Message {
    fn from(data: SensorData) -> Self {
        Self::SensorData(data)
    }
}

impl From<Alert> for Message {
    fn from(alert: Alert) -> Self {
        Self::Alert(alert)
    }
}

impl From<ControlMessage> for Message {
    fn from(ctl: ControlMessage) -> Self {
        Self::Control(ctl)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Command(_) => MessageKind::Command,
            Self::SensorData(_) | Self::Alert(_) => MessageKind::Message,
            Self::Control(_) => MessageKind::Control,
        }
    }

    /// Parses a frame payload.
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let raw = match std::str::from_utf8(payload) {
            Ok(raw) => raw,
            Err(e) => {
                return Err(MessageError::malformed(
                    &String::from_utf8_lossy(payload),
                    None,
                    format!("payload is not UTF-8: {e}"),
                ));
            }
        };
        Self::parse_str(raw)
    }

    pub fn parse_str(raw: &str) -> Result<Self, MessageError> {
        let doc = Document::parse(raw)
            .map_err(|e| MessageError::malformed(raw, None, format!("invalid XML: {e}")))?;
        let root = doc.root_element();
        let tag = root.tag_name().name();
        let kind = MessageKind::from_tag(tag).ok_or_else(|| {
            MessageError::malformed(raw, None, format!("unexpected root element <{tag}>"))
        })?;

        let mut p = Parser {
            raw,
            subject: None,
        };
        let name = p.required(root, "name")?;
        p.subject = Some(name);

        match kind {
            MessageKind::Command => p.command(root, name).map(Self::Command),
            MessageKind::Message => p.msg(root, name),
            MessageKind::Control => p.control(root, name).map(Self::Control),
        }
    }
}

struct Parser<'a> {
    raw: &'a str,
    subject: Option<&'a str>,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> MessageError {
        MessageError::malformed(self.raw, self.subject, reason)
    }

    fn required(&self, node: Node<'a, 'a>, tag: &str) -> Result<&'a str, MessageError> {
        child_text(node, tag).ok_or_else(|| self.error(format!("missing <{tag}>")))
    }

    fn number(&self, node: Node<'a, 'a>, tags: &[&str]) -> Result<f64, MessageError> {
        let text = tags
            .iter()
            .find_map(|tag| child_text(node, tag))
            .ok_or_else(|| self.error(format!("missing <{}>", tags[0])))?;
        match text.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            _ => Err(self.error(format!("<{}> is not a number: '{text}'", tags[0]))),
        }
    }

    fn command(&self, root: Node<'a, 'a>, name: &str) -> Result<Command, MessageError> {
        let command = name
            .parse::<CommandName>()
            .map_err(|()| MessageError::UnknownCommand {
                name: name.to_string(),
            })?;

        Ok(match command {
            CommandName::Drive => Command::Drive {
                speed: self.number(root, &["speed"])?,
            },
            CommandName::Steer => Command::Steer {
                angle: self.number(root, &["angle", "position"])?,
            },
            CommandName::Brake => Command::Brake,
            CommandName::Close => Command::Close,
            CommandName::Subscribe => Command::Subscribe {
                kind: self.subscription_kind(root)?,
                sensors: self
                    .sensor_nodes(root)?
                    .into_iter()
                    .map(|(node, name)| self.sensor_request(node, name))
                    .collect::<Result<_, _>>()?,
            },
            CommandName::Unsubscribe => Command::Unsubscribe {
                kind: self.subscription_kind(root)?,
                sensors: self
                    .sensor_nodes(root)?
                    .into_iter()
                    .map(|(_, name)| name.to_string())
                    .collect(),
            },
        })
    }

    fn subscription_kind(&self, root: Node<'a, 'a>) -> Result<SubscriptionKind, MessageError> {
        match child_text(root, "type") {
            None | Some("data") => Ok(SubscriptionKind::Data),
            Some("alert") => Ok(SubscriptionKind::Alert),
            Some(other) => Err(self.error(format!("unknown subscription type '{other}'"))),
        }
    }

    fn sensor_nodes(&self, root: Node<'a, 'a>) -> Result<Vec<(Node<'a, 'a>, &'a str)>, MessageError> {
        let mut sensors = Vec::new();
        for node in root.children().filter(|n| n.has_tag_name("sensor")) {
            match node.text().map(str::trim).filter(|t| !t.is_empty()) {
                Some(name) => sensors.push((node, name)),
                None => return Err(self.error("empty <sensor>")),
            }
        }
        if sensors.is_empty() {
            return Err(self.error("no <sensor> given"));
        }
        Ok(sensors)
    }

    fn sensor_request(&self, node: Node<'a, 'a>, name: &str) -> Result<SensorRequest, MessageError> {
        let interval = match node.attribute("interval").map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(text.parse::<f64>().map_err(|_| {
                self.error(format!("interval of sensor '{name}' is not a number: '{text}'"))
            })?),
        };
        let only_new = match node.attribute("onlynew") {
            None => true,
            Some(text) => parse_bool(text).ok_or_else(|| {
                self.error(format!("onlynew of sensor '{name}' is not a boolean: '{text}'"))
            })?,
        };
        Ok(SensorRequest {
            name: name.to_string(),
            interval,
            only_new,
        })
    }

    fn msg(&self, root: Node<'a, 'a>, name: &str) -> Result<Message, MessageError> {
        let sensor = self.required(root, "sensor")?.to_string();
        match name {
            "sensordata" => Ok(Message::SensorData(SensorData {
                sensor,
                value: SensorValue::from_wire(child_text(root, "data").unwrap_or_default()),
                unit: child_text(root, "unit").unwrap_or_default().to_string(),
            })),
            "alert" => {
                let severity = match child_text(root, "severity") {
                    None => Severity::default(),
                    Some(text) => text
                        .parse()
                        .map_err(|()| self.error(format!("unknown severity '{text}'")))?,
                };
                Ok(Message::Alert(Alert {
                    sensor,
                    severity,
                    message: child_text(root, "message").unwrap_or_default().to_string(),
                }))
            }
            other => Err(self.error(format!("unknown message '{other}'"))),
        }
    }

    fn control(&self, root: Node<'a, 'a>, name: &str) -> Result<ControlMessage, MessageError> {
        let ack = match name {
            "ack" => true,
            "nack" => false,
            other => return Err(self.error(format!("unknown control message '{other}'"))),
        };
        Ok(ControlMessage {
            ack,
            subject: self.required(root, "type")?.to_string(),
            message: child_text(root, "message").map(str::to_string),
        })
    }
}

/// Trimmed text of the first `tag` child, `None` if missing or blank.
fn child_text<'a>(node: Node<'a, 'a>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

impl Message {
    /// Renders the document without XML declaration, the way the legacy
    /// controller expects it.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(96);
        out.push('<');
        out.push_str(self.kind().tag());
        out.push('>');

        match self {
            Self::Command(cmd) => write_command(&mut out, cmd),
            Self::SensorData(data) => {
                element(&mut out, "name", "sensordata");
                element(&mut out, "sensor", &data.sensor);
                element(&mut out, "data", &data.value.to_string());
                if !data.unit.is_empty() {
                    element(&mut out, "unit", &data.unit);
                }
            }
            Self::Alert(alert) => {
                element(&mut out, "name", "alert");
                element(&mut out, "sensor", &alert.sensor);
                element(&mut out, "severity", alert.severity.as_str());
                element(&mut out, "message", &alert.message);
            }
            Self::Control(ctl) => {
                element(&mut out, "name", if ctl.ack { "ack" } else { "nack" });
                element(&mut out, "type", &ctl.subject);
                if let Some(message) = &ctl.message {
                    element(&mut out, "message", message);
                }
            }
        }

        out.push_str("</");
        out.push_str(self.kind().tag());
        out.push('>');
        out
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.to_xml().into_bytes()
    }
}

fn write_command(out: &mut String, cmd: &Command) {
    element(out, "name", cmd.name().as_str());
    match cmd {
        Command::Drive { speed } => element(out, "speed", &speed.to_string()),
        Command::Steer { angle } => element(out, "angle", &angle.to_string()),
        Command::Brake | Command::Close => {}
        Command::Subscribe { kind, sensors } => {
            element(out, "type", kind.as_str());
            for sensor in sensors {
                out.push_str("<sensor");
                if let Some(interval) = sensor.interval {
                    let _ = write!(out, " interval=\"{interval}\"");
                }
                if !sensor.only_new {
                    out.push_str(" onlynew=\"false\"");
                }
                out.push('>');
                escape_into(out, &sensor.name);
                out.push_str("</sensor>");
            }
        }
        Command::Unsubscribe { kind, sensors } => {
            element(out, "type", kind.as_str());
            for sensor in sensors {
                element(out, "sensor", sensor);
            }
        }
    }
}

fn element(out: &mut String, tag: &str, text: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    escape_into(out, text);
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(xml: &str) -> Command {
        match Message::parse_str(xml).unwrap() {
            Message::Command(cmd) => cmd,
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn parses_drive_and_steer() {
        assert_eq!(
            cmd("<cmd><name>drive</name><speed>-50</speed></cmd>"),
            Command::Drive { speed: -50.0 }
        );
        assert_eq!(
            cmd("<cmd>\n  <name> steer </name>\n  <angle>40.5</angle>\n</cmd>"),
            Command::Steer { angle: 40.5 }
        );
        assert_eq!(
            cmd("<cmd><name>steer</name><position>70</position></cmd>"),
            Command::Steer { angle: 70.0 }
        );
        assert_eq!(cmd("<cmd><name>brake</name></cmd>"), Command::Brake);
        assert_eq!(cmd("<cmd><name>close</name></cmd>"), Command::Close);
    }

    #[test]
    fn parses_subscribe_with_attributes() {
        let parsed = cmd(
            "<cmd><name>subscribe</name><type>data</type>\
             <sensor interval=\"10\" onlynew=\"false\">Voltage</sensor>\
             <sensor>Current</sensor></cmd>",
        );
        assert_eq!(
            parsed,
            Command::Subscribe {
                kind: SubscriptionKind::Data,
                sensors: vec![
                    SensorRequest::new("Voltage")
                        .with_interval(10.0)
                        .with_only_new(false),
                    SensorRequest::new("Current"),
                ],
            }
        );
    }

    #[test]
    fn subscription_type_defaults_to_data() {
        let parsed = cmd("<cmd><name>unsubscribe</name><sensor>Voltage</sensor></cmd>");
        assert_eq!(
            parsed,
            Command::Unsubscribe {
                kind: SubscriptionKind::Data,
                sensors: vec!["Voltage".into()],
            }
        );

        let parsed = cmd("<cmd><name>subscribe</name><type>alert</type><sensor>Distance</sensor></cmd>");
        assert!(matches!(
            parsed,
            Command::Subscribe {
                kind: SubscriptionKind::Alert,
                ..
            }
        ));
    }

    #[test]
    fn missing_field_names_the_command() {
        let err = Message::parse_str("<cmd><name>drive</name></cmd>").unwrap_err();
        assert_eq!(err.subject(), "drive");
        assert!(err.to_string().contains("missing <speed>"));

        let err = Message::parse_str("<cmd><name>drive</name><speed>fast</speed></cmd>").unwrap_err();
        assert_eq!(err.subject(), "drive");

        let err = Message::parse_str("<cmd><name>subscribe</name></cmd>").unwrap_err();
        assert_eq!(err.subject(), "subscribe");
    }

    #[test]
    fn invalid_documents_are_malformed() {
        let raw = "<cmd><name>drive</name>";
        match Message::parse_str(raw).unwrap_err() {
            MessageError::Malformed { raw: got, subject, .. } => {
                assert_eq!(got, raw);
                assert_eq!(subject, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(Message::parse_str("<command><name>drive</name></command>").is_err());
        assert!(Message::parse(&[0xff, 0xfe]).is_err());
        assert!(Message::parse_str("<cmd><speed>1</speed></cmd>").is_err());
        assert!(
            Message::parse_str("<cmd><name>subscribe</name><type>video</type><sensor>a</sensor></cmd>")
                .is_err()
        );
    }

    #[test]
    fn unknown_command_is_reported_by_name() {
        let err = Message::parse_str("<cmd><name>fly</name></cmd>").unwrap_err();
        assert_eq!(
            err,
            MessageError::UnknownCommand {
                name: "fly".into()
            }
        );
    }

    #[test]
    fn sensordata_xml() {
        let msg = Message::from(SensorData {
            sensor: "Voltage".into(),
            value: SensorValue::Number(7.4),
            unit: "V".into(),
        });
        assert_eq!(
            msg.to_xml(),
            "<msg><name>sensordata</name><sensor>Voltage</sensor><data>7.4</data><unit>V</unit></msg>"
        );
        assert_eq!(Message::parse_str(&msg.to_xml()).unwrap(), msg);

        let no_unit = Message::from(SensorData {
            sensor: "IP-Address".into(),
            value: "10.0.0.2".into(),
            unit: String::new(),
        });
        assert!(!no_unit.to_xml().contains("<unit>"));
    }

    #[test]
    fn alert_xml_escapes_text() {
        let msg = Message::from(Alert {
            sensor: "Distance".into(),
            severity: Severity::Critical,
            message: "obstacle < 20 cm & closing".into(),
        });
        let xml = msg.to_xml();
        assert!(xml.contains("<message>obstacle &lt; 20 cm &amp; closing</message>"));
        assert!(xml.contains("<severity>critical</severity>"));
        assert_eq!(Message::parse_str(&xml).unwrap(), msg);
    }

    #[test]
    fn control_messages() {
        assert_eq!(
            Message::from(ControlMessage::ack("drive")).to_xml(),
            "<ctlmsg><name>ack</name><type>drive</type></ctlmsg>"
        );
        let nack = Message::from(ControlMessage::nack("subscribe", "unknown sensor 'X'"));
        assert_eq!(
            nack.to_xml(),
            "<ctlmsg><name>nack</name><type>subscribe</type>\
             <message>unknown sensor &apos;X&apos;</message></ctlmsg>"
        );
        assert_eq!(Message::parse_str(&nack.to_xml()).unwrap(), nack);
    }

    #[test]
    fn commands_serialize_to_legacy_shape() {
        let subscribe = Message::from(Command::Subscribe {
            kind: SubscriptionKind::Data,
            sensors: vec![
                SensorRequest::new("Voltage").with_interval(2.5),
                SensorRequest::new("Speed").with_only_new(false),
            ],
        });
        assert_eq!(
            subscribe.to_xml(),
            "<cmd><name>subscribe</name><type>data</type>\
             <sensor interval=\"2.5\">Voltage</sensor>\
             <sensor onlynew=\"false\">Speed</sensor></cmd>"
        );
        assert_eq!(Message::parse_str(&subscribe.to_xml()).unwrap(), subscribe);

        let drive = Message::from(Command::Drive { speed: 50.0 });
        assert_eq!(drive.to_xml(), "<cmd><name>drive</name><speed>50</speed></cmd>");
    }
}
