fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use bytes::BytesMut;
    use smartrc_protocol::{
        Alert, Command, ControlMessage, FrameCodec, Message, SensorData, SensorRequest,
        SensorValue, Severity, SubscriptionKind, encode,
    };
    use tokio_util::codec::Decoder;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture captured from the legacy controller, trimmed.
    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
            .trim()
            .to_string()
    }

    /// Loads a hex dump fixture (whitespace ignored) as raw bytes.
    fn load_hex(name: &str) -> Vec<u8> {
        let text: String = load_fixture(name).split_whitespace().collect();
        hex::decode(&text).unwrap_or_else(|e| panic!("invalid hex in {name}: {e}"))
    }

    fn parse_fixture(name: &str) -> Message {
        let xml = load_fixture(name);
        Message::parse_str(&xml).unwrap_or_else(|e| panic!("failed to parse {name}: {e}"))
    }

    /// Parses a fixture and checks that our rendering parses back to the
    /// same message.
    fn reparse_test(name: &str) -> Message {
        let parsed = parse_fixture(name);
        let rendered = parsed.to_xml();
        let reparsed = Message::parse_str(&rendered)
            .unwrap_or_else(|e| panic!("failed to reparse {name}: {e}\n  xml: {rendered}"));
        assert_eq!(parsed, reparsed, "reparse mismatch for {name}");
        parsed
    }

    /// Compact legacy documents must be reproduced byte for byte.
    fn exact_test(name: &str) -> Message {
        let parsed = reparse_test(name);
        assert_eq!(
            parsed.to_xml(),
            load_fixture(name),
            "rendering mismatch for {name}"
        );
        parsed
    }

    // --- Documents ---

    #[test]
    fn fixture_cmd_drive() {
        assert_eq!(
            exact_test("cmd_drive.xml"),
            Message::Command(Command::Drive { speed: -35.0 })
        );
    }

    #[test]
    fn fixture_cmd_steer_position_alias() {
        assert_eq!(
            reparse_test("cmd_steer_position.xml"),
            Message::Command(Command::Steer { angle: 62.5 })
        );
    }

    #[test]
    fn fixture_cmd_subscribe() {
        assert_eq!(
            reparse_test("cmd_subscribe.xml"),
            Message::Command(Command::Subscribe {
                kind: SubscriptionKind::Data,
                sensors: vec![
                    SensorRequest::new("Voltage")
                        .with_interval(10.0)
                        .with_only_new(false),
                    SensorRequest::new("Current"),
                    SensorRequest::new("Distance").with_interval(0.5),
                ],
            })
        );
    }

    #[test]
    fn fixture_cmd_unsubscribe_alert() {
        assert_eq!(
            exact_test("cmd_unsubscribe_alert.xml"),
            Message::Command(Command::Unsubscribe {
                kind: SubscriptionKind::Alert,
                sensors: vec!["Motor-Temp".into()],
            })
        );
    }

    #[test]
    fn fixture_msg_sensordata() {
        assert_eq!(
            exact_test("msg_sensordata.xml"),
            Message::SensorData(SensorData {
                sensor: "Voltage".into(),
                value: SensorValue::Number(7.4),
                unit: "V".into(),
            })
        );
    }

    #[test]
    fn fixture_msg_alert() {
        assert_eq!(
            exact_test("msg_alert.xml"),
            Message::Alert(Alert {
                sensor: "Voltage".into(),
                severity: Severity::Warning,
                message: "Low Volt. 6.5 V".into(),
            })
        );
    }

    #[test]
    fn fixture_ctlmsg_nack() {
        assert_eq!(
            exact_test("ctlmsg_nack.xml"),
            Message::Control(ControlMessage::nack("subscribe", "unknown sensor 'X'"))
        );
    }

    // --- Frames ---

    #[test]
    fn fixture_frame_brake() {
        let frame = load_hex("frame_brake.hex");
        let payload = Message::Command(Command::Brake).to_payload();
        assert_eq!(encode(&payload).unwrap(), frame);

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&frame[..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn fixture_frame_ack() {
        let frame = load_hex("frame_ack.hex");
        let payload = Message::Control(ControlMessage::ack("drive")).to_payload();
        assert_eq!(encode(&payload).unwrap(), frame);
    }

    #[test]
    fn fixture_stream_with_noise_and_corruption() {
        let stream = load_hex("stream_noise_corrupt.hex");
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&stream[..]);

        let mut messages = Vec::new();
        while let Some(payload) = codec.decode(&mut buf).unwrap() {
            messages.push(Message::parse(&payload).unwrap());
        }

        assert_eq!(
            messages,
            vec![
                Message::Command(Command::Drive { speed: 20.0 }),
                Message::Command(Command::Steer { angle: 50.0 }),
            ]
        );
        assert_eq!(codec.discarded(), 1);
    }

    #[test]
    fn fixture_stream_byte_by_byte() {
        let stream = load_hex("stream_noise_corrupt.hex");
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        let mut count = 0;
        for byte in stream {
            buf.extend_from_slice(&[byte]);
            while let Some(payload) = codec.decode(&mut buf).unwrap() {
                Message::parse(&payload).unwrap();
                count += 1;
            }
        }
        assert_eq!(count, 2);
    }
}
