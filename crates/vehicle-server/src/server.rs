//! TCP listener accepting controller connections.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use smartrc_actuation::SafetyLayer;
use smartrc_protocol::constants::DEFAULT_PORT;
use smartrc_sensors::SensorRegistry;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ServerError;
use crate::connection::{self, Sender, SessionContext, SessionInfo};

/// Pause after an accept error that is not tied to a single connection,
/// such as running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Connections beyond this are closed right after accept.
    pub max_connections: usize,
    /// Register every new session for the alerts of all sensors.
    pub alerts_on_connect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: 8,
            alerts_on_connect: true,
        }
    }
}

struct SessionHandle {
    info: SessionInfo,
    sender: Sender,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// The vehicle's SRCCP server.
///
/// Every accepted connection runs its own session task; the sensor registry
/// and the safety layer are shared by all of them.
pub struct VehicleServer {
    config: ServerConfig,
    context: SessionContext,
    sessions: Mutex<HashMap<Uuid, SessionHandle>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl VehicleServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<SensorRegistry>,
        safety: Arc<SafetyLayer>,
    ) -> Arc<Self> {
        let context = SessionContext {
            registry,
            safety,
            alerts_on_connect: config.alerts_on_connect,
        };
        Arc::new(Self {
            config,
            context,
            sessions: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Currently connected controllers.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|h| h.info.clone())
            .collect()
    }

    /// Returns the outbound queue of a session, if it is still connected.
    pub async fn sender(&self, id: Uuid) -> Option<Sender> {
        self.sessions.lock().await.get(&id).map(|h| h.sender.clone())
    }

    /// Closes one session. Returns `false` if it was not connected.
    pub async fn disconnect(&self, id: Uuid) -> bool {
        let handle = self.sessions.lock().await.remove(&id);
        match handle {
            Some(mut handle) => {
                handle.cancel.cancel();
                if let Some(task) = handle.task.take() {
                    let _ = task.await;
                }
                true
            }
            None => false,
        }
    }

    /// Stops accepting and closes every session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Returns once every session has been torn down.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("vehicle server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.accept(stream, peer_addr).await,
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                            if let Some(pause) = accept_backoff(&e) {
                                tokio::select! {
                                    _ = self.cancel.cancelled() => {}
                                    _ = tokio::time::sleep(pause) => {}
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.config.max_connections {
            tracing::warn!(%peer, max = self.config.max_connections, "rejecting connection: too many controllers");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, "set_nodelay failed: {e}");
        }

        let info = SessionInfo {
            id: Uuid::new_v4(),
            peer,
        };
        tracing::info!(session = %info.id, %peer, "controller connected");

        let cancel = self.cancel.child_token();
        let (sender, rx) = connection::channel();
        let server = Arc::clone(self);
        let task = tokio::spawn({
            let info = info.clone();
            let context = self.context.clone();
            let sender = sender.clone();
            let cancel = cancel.clone();
            async move {
                let id = info.id;
                connection::run_session(stream, info, context, (sender, rx), cancel).await;
                server.sessions.lock().await.remove(&id);
                tracing::info!(session = %id, %peer, "controller disconnected");
            }
        });

        // Still holding the lock: the task cannot remove itself before it
        // is registered.
        sessions.insert(
            info.id,
            SessionHandle {
                info,
                sender,
                cancel,
                task: Some(task),
            },
        );
    }

    async fn close_all(&self) {
        let handles: Vec<_> = self.sessions.lock().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.cancel.cancel();
        }
        for mut handle in handles {
            if let Some(task) = handle.task.take() {
                let _ = task.await;
            }
        }
    }
}

/// How long to wait before accepting again after `e`. Errors that only
/// concern the connection being accepted are retried at once.
fn accept_backoff(e: &io::Error) -> Option<Duration> {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_BACKOFF),
    }
}
