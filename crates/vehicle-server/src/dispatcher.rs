//! Command dispatcher: parse, validate, execute and acknowledge one inbound
//! document at a time.

use std::sync::Arc;

use smartrc_actuation::SafetyLayer;
use smartrc_protocol::{
    Command, ControlMessage, Message, MessageKind, SensorRequest, SubscriptionKind,
};
use smartrc_sensors::SubscriptionManager;

/// Result of dispatching one inbound document.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// The single `ack`/`nack` owed to the controller.
    pub reply: ControlMessage,
    /// The controller asked to end the session.
    pub close: bool,
}

impl Outcome {
    fn reply(reply: ControlMessage) -> Self {
        Self {
            reply,
            close: false,
        }
    }
}

/// Routes commands of one session to the safety layer and to the session's
/// subscriptions.
pub struct Dispatcher {
    safety: Arc<SafetyLayer>,
    subscriptions: Arc<SubscriptionManager>,
}

impl Dispatcher {
    pub fn new(safety: Arc<SafetyLayer>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            safety,
            subscriptions,
        }
    }

    /// Handles one frame payload. Never fails: every problem turns into a
    /// `nack` naming the offending command.
    pub async fn dispatch(&self, payload: &[u8]) -> Outcome {
        let command = match Message::parse(payload) {
            Ok(Message::Command(command)) => command,
            Ok(Message::Control(ctl)) => {
                // Acknowledged like any other document; acks are never answered.
                tracing::debug!(subject = %ctl.subject, ack = ctl.ack, "control message from controller");
                return Outcome::reply(ControlMessage::ack(MessageKind::Control.tag()));
            }
            Ok(other) => {
                let kind = other.kind();
                tracing::warn!(kind = kind.tag(), "controller sent a non-command document");
                return Outcome::reply(ControlMessage::nack(kind.tag(), "only commands are accepted"));
            }
            Err(e) => {
                tracing::warn!(subject = e.subject(), "rejected message: {e}");
                return Outcome::reply(ControlMessage::nack(e.subject(), e.to_string()));
            }
        };

        let name = command.name().as_str();
        tracing::debug!(command = name, "dispatch");

        let close = matches!(command, Command::Close);
        let failures = self.execute(command).await;
        let reply = if failures.is_empty() {
            ControlMessage::ack(name)
        } else {
            let message = failures.join("; ");
            tracing::warn!(command = name, %message, "command failed");
            ControlMessage::nack(name, message)
        };

        Outcome {
            reply,
            close,
        }
    }

    /// Executes every item of a command, collecting the failures of
    /// individual items instead of stopping at the first one.
    async fn execute(&self, command: Command) -> Vec<String> {
        let mut failures = Vec::new();
        match command {
            Command::Drive { speed } => {
                if let Err(e) = self.safety.drive(speed) {
                    failures.push(e.to_string());
                }
            }
            Command::Steer { angle } => {
                if let Err(e) = self.safety.steer(angle) {
                    failures.push(e.to_string());
                }
            }
            Command::Brake => {
                if let Err(e) = self.safety.brake() {
                    failures.push(e.to_string());
                }
            }
            Command::Subscribe { kind, sensors } => {
                for request in &sensors {
                    if let Err(e) = self.subscribe(kind, request).await {
                        failures.push(e);
                    }
                }
            }
            Command::Unsubscribe { kind, sensors } => {
                for name in &sensors {
                    let result = match kind {
                        SubscriptionKind::Data => self.subscriptions.unsubscribe(name).await,
                        SubscriptionKind::Alert => self.subscriptions.unsubscribe_alerts(name),
                    };
                    if let Err(e) = result {
                        failures.push(e.to_string());
                    }
                }
            }
            Command::Close => {}
        }
        failures
    }

    async fn subscribe(&self, kind: SubscriptionKind, request: &SensorRequest) -> Result<(), String> {
        let result = match kind {
            SubscriptionKind::Data => self.subscriptions.subscribe(request).await.map(drop),
            SubscriptionKind::Alert => self.subscriptions.subscribe_alerts(&request.name),
        };
        result.map_err(|e| e.to_string())
    }
}
