//! Controller sessions: read/write pumps, outbound queue and teardown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use smartrc_actuation::SafetyLayer;
use smartrc_protocol::constants::MAX_PAYLOAD_SIZE;
use smartrc_protocol::{FrameCodec, Message};
use smartrc_sensors::{SensorRegistry, SubscriptionManager};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::SEND_BUFFER_SIZE;
use crate::dispatcher::Dispatcher;

/// Upper bound on flushing queued frames once a session is shutting down.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity of a connected controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer: SocketAddr,
}

/// Handle for queueing messages to one controller.
///
/// Cloneable; all clones feed the same write pump, so frames never
/// interleave on the socket.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Message>,
}

impl Sender {
    /// Queues an unsolicited push. Dropped (with a warning) when the queue
    /// is full so a slow controller cannot stall sensor delivery.
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| {
            if let mpsc::error::TrySendError::Full(_) = e {
                tracing::warn!("send buffer full, dropping message");
            }
            SendError
        })
    }

    /// Queues a reply, waiting for room. Replies are never dropped.
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.send(msg).await.map_err(|_| SendError)
    }

    /// Returns `true` if the write pump is still running.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Creates the outbound queue of one session.
pub(crate) fn channel() -> (Sender, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
    (Sender { tx }, rx)
}

/// Error returned when the send queue is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Shared vehicle state a session works against.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub registry: Arc<SensorRegistry>,
    pub safety: Arc<SafetyLayer>,
    pub alerts_on_connect: bool,
}

/// Runs one controller session to completion.
///
/// Returns after the controller disconnected (or sent `close`, or `cancel`
/// fired) and every subscription of the session has been torn down.
pub(crate) async fn run_session<S>(
    stream: S,
    info: SessionInfo,
    ctx: SessionContext,
    (sender, rx): (Sender, mpsc::Receiver<Message>),
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);

    let write_cancel = cancel.child_token();
    let write_task = tokio::spawn(write_pump(
        FramedWrite::new(writer, FrameCodec::new()),
        rx,
        write_cancel.clone(),
    ));

    let push = sender.clone();
    let subscriptions = Arc::new(SubscriptionManager::new(
        Arc::clone(&ctx.registry),
        Arc::new(move |msg: Message| {
            let _ = push.try_send(msg);
        }),
        &cancel,
    ));
    if ctx.alerts_on_connect {
        subscriptions.subscribe_all_alerts();
    }

    let dispatcher = Dispatcher::new(Arc::clone(&ctx.safety), Arc::clone(&subscriptions));
    read_pump(
        FramedRead::new(reader, FrameCodec::new()),
        &dispatcher,
        &sender,
        &info,
        &cancel,
    )
    .await;

    // Teardown: no registry callback may reach this connection afterwards.
    subscriptions.close().await;
    if let Err(e) = ctx.safety.neutralize() {
        tracing::error!(session = %info.id, error = %e, "failed to neutralize motor on disconnect");
    }

    // Whatever is still queued (the last reply) is flushed before FIN.
    drop(dispatcher);
    drop(subscriptions);
    drop(sender);
    write_cancel.cancel();
    if let Err(e) = write_task.await {
        tracing::warn!(session = %info.id, error = %e, "write pump ended abnormally");
    }
}

/// Write pump: drains the queue into the framed socket.
///
/// A write stalled by a controller that stopped reading is abandoned when
/// `cancel` fires, and the final flush is bounded by [`FLUSH_TIMEOUT`].
async fn write_pump<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let Some(payload) = outbound(msg) else { continue };
                tokio::select! {
                    biased;

                    result = sink.send(payload) => {
                        if let Err(e) = result {
                            tracing::debug!("write pump send error: {e}");
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }

            _ = cancel.cancelled() => break,
        }
    }

    // Best-effort flush of what is still queued, then FIN.
    let flush = async {
        while let Ok(msg) = rx.try_recv() {
            if let Some(payload) = outbound(msg)
                && sink.feed(payload).await.is_err()
            {
                return;
            }
        }
        let _ = sink.close().await;
    };
    if tokio::time::timeout(FLUSH_TIMEOUT, flush).await.is_err() {
        tracing::warn!("controller is not reading, unsent frames dropped");
    }
}

/// Serializes an outbound message, dropping it if it cannot be framed.
fn outbound(msg: Message) -> Option<Bytes> {
    let payload = msg.to_payload();
    if payload.len() > MAX_PAYLOAD_SIZE {
        tracing::error!(size = payload.len(), "outbound message exceeds frame size, dropped");
        return None;
    }
    tracing::trace!(payload = %String::from_utf8_lossy(&payload), "send");
    Some(Bytes::from(payload))
}

/// Read pump: decodes frames and hands them to the dispatcher, one at a
/// time, answering each with exactly one reply.
async fn read_pump<R>(
    mut stream: FramedRead<R, FrameCodec>,
    dispatcher: &Dispatcher,
    sender: &Sender,
    info: &SessionInfo,
    cancel: &CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(payload)) => {
                        tracing::trace!(session = %info.id, payload = %String::from_utf8_lossy(&payload), "recv");
                        let outcome = dispatcher.dispatch(&payload).await;
                        if sender.send(outcome.reply.into()).await.is_err() {
                            break;
                        }
                        if outcome.close {
                            tracing::info!(session = %info.id, peer = %info.peer, "controller closed the session");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(session = %info.id, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartrc_actuation::{Actuator, SimulatedActuator};
    use smartrc_protocol::{ControlMessage, encode};
    use smartrc_sensors::SensorSpec;
    use smartrc_sensors::sources::ManualSource;
    use std::time::Duration;

    fn info() -> SessionInfo {
        SessionInfo {
            id: Uuid::new_v4(),
            peer: "127.0.0.1:50000".parse().unwrap(),
        }
    }

    fn context(actuator: Arc<SimulatedActuator>) -> SessionContext {
        let mut registry = SensorRegistry::new();
        registry
            .register(SensorSpec::new(
                "Voltage",
                "V",
                Arc::new(ManualSource::new(7.4)),
            ))
            .unwrap();
        registry.start().unwrap();
        SessionContext {
            registry: Arc::new(registry),
            safety: Arc::new(SafetyLayer::new(actuator, Duration::from_secs(1))),
            alerts_on_connect: true,
        }
    }

    fn frame(msg: impl Into<Message>) -> Vec<u8> {
        encode(&msg.into().to_payload()).unwrap()
    }

    #[tokio::test]
    async fn close_is_acked_then_session_ends() {
        let request = encode(b"<cmd><name>close</name></cmd>").unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&request)
            .write(&frame(ControlMessage::ack("close")))
            .build();

        let ctx = context(Arc::new(SimulatedActuator::default()));
        let registry = Arc::clone(&ctx.registry);
        run_session(mock, info(), ctx, channel(), CancellationToken::new()).await;

        assert_eq!(
            registry.get("Voltage").unwrap().alert_subscriber_count(),
            0
        );
    }

    #[tokio::test]
    async fn disconnect_neutralizes_motor() {
        let (client, server) = tokio::io::duplex(4096);
        let actuator = Arc::new(SimulatedActuator::default());
        let ctx = context(Arc::clone(&actuator));
        let session = tokio::spawn(run_session(server, info(), ctx, channel(), CancellationToken::new()));

        let mut client = tokio_util::codec::Framed::new(client, FrameCodec::new());
        client
            .send(Bytes::from_static(b"<cmd><name>drive</name><speed>60</speed></cmd>"))
            .await
            .unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(
            Message::parse(&reply).unwrap(),
            Message::Control(ControlMessage::ack("drive"))
        );
        assert_eq!(actuator.current_speed(), 60.0);

        drop(client);
        tokio_test::assert_ok!(session.await);
        assert_eq!(actuator.current_speed(), 0.0);
    }

    #[tokio::test]
    async fn cancellation_ends_session() {
        let (_client, server) = tokio::io::duplex(4096);
        let cancel = CancellationToken::new();
        let ctx = context(Arc::new(SimulatedActuator::default()));
        let session = tokio::spawn(run_session(server, info(), ctx, channel(), cancel.clone()));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), session).await;
        tokio_test::assert_ok!(result);
    }

    #[tokio::test]
    async fn cancellation_ends_session_when_peer_stops_reading() {
        let (mut client, server) = tokio::io::duplex(16);
        let cancel = CancellationToken::new();
        let ctx = context(Arc::new(SimulatedActuator::default()));
        let session = tokio::spawn(run_session(server, info(), ctx, channel(), cancel.clone()));

        // The ack does not fit into the pipe and the client never reads it.
        tokio::io::AsyncWriteExt::write_all(&mut client, &frame(smartrc_protocol::Command::Brake))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        let result = tokio::time::timeout(FLUSH_TIMEOUT * 3, session).await;
        tokio_test::assert_ok!(result);
        drop(client);
    }

    #[test]
    fn send_error_display() {
        assert!(SendError.to_string().contains("buffer full"));
    }
}
