//! WebSocket Duel Server
//!
//! Async WebSocket front end for the engine. Each text frame is one JSON
//! [`ClientMessage`]; every request runs in its own task so a blocking call
//! never stalls the connection, and subscriptions are forwarded until the
//! duel ends or the client goes away.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::DuelPhase;
use crate::network::engine::{ClientError, DuelEngine, JoinOutcome, QueueStatus, SubmitOutcome};
use crate::network::hub::{ScopedView, Subscription};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};

/// Most archived results returned per request.
const MAX_RESULTS: usize = 100;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are closed.
    pub idle_timeout: Duration,
    /// Directory of the JSON file store.
    pub data_dir: PathBuf,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            data_dir: PathBuf::from("data"),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from `RIPOSTE_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("RIPOSTE_BIND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("RIPOSTE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            idle_timeout: std::env::var("RIPOSTE_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            data_dir: std::env::var("RIPOSTE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            version: defaults.version,
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Store could not be loaded.
    #[error("Store error: {0}")]
    Store(#[from] crate::persist::StoreError),
}

// =============================================================================
// DISPATCH
// =============================================================================

/// What handling one client message produced.
pub struct Reply {
    /// Messages to send back, in order.
    pub messages: Vec<ServerMessage>,
    /// Updates to forward until the duel ends.
    pub stream: Option<Subscription>,
}

impl Reply {
    fn one(message: ServerMessage) -> Self {
        Self { messages: vec![message], stream: None }
    }

    fn error(e: ClientError) -> Self {
        Self::one(ServerMessage::Error(e.to_server_error()))
    }
}

fn unknown_token() -> Reply {
    Reply::error(ClientError::UnknownToken)
}

fn unix_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Run one client message against the engine.
pub async fn dispatch(engine: &DuelEngine, origin_key: &str, msg: ClientMessage) -> Reply {
    match msg {
        ClientMessage::JoinQueue { display_name, blocking } => {
            match engine.join_queue(&display_name, origin_key, blocking).await {
                Ok(JoinOutcome::Queued { token, position }) => {
                    Reply::one(ServerMessage::Queued { token, position })
                }
                Ok(JoinOutcome::Matched { token, view }) => {
                    Reply::one(ServerMessage::Matched { token, view })
                }
                Ok(JoinOutcome::Expired { token }) => {
                    Reply::one(ServerMessage::QueueExpired { token })
                }
                Err(e) => Reply::error(e),
            }
        }
        ClientMessage::PollQueue { token } => match engine.poll_queue(&token).await {
            QueueStatus::Queued { position } => {
                Reply::one(ServerMessage::Queued { token, position })
            }
            QueueStatus::Matched(view) => Reply::one(ServerMessage::Matched { token, view }),
            QueueStatus::Expired => Reply::one(ServerMessage::QueueExpired { token }),
            QueueStatus::Unknown => unknown_token(),
        },
        ClientMessage::LeaveQueue { token } => {
            if engine.leave_queue(&token).await {
                Reply::one(ServerMessage::QueueLeft { token })
            } else {
                unknown_token()
            }
        }
        ClientMessage::SubmitMove { token, move_token, blocking } => {
            match engine.submit_move(&token, &move_token, blocking).await {
                Ok(SubmitOutcome::Accepted(view)) => Reply::one(ServerMessage::Accepted { view }),
                Ok(SubmitOutcome::Resolved(view)) => Reply::one(ServerMessage::Resolved { view }),
                Err(e) => Reply::error(e),
            }
        }
        ClientMessage::GetState { token } => match engine.get_state(&token).await {
            Ok(view) => Reply::one(ServerMessage::State { view }),
            Err(e) => Reply::error(e),
        },
        ClientMessage::Subscribe { token } => match engine.subscribe(&token).await {
            Ok((view, sub)) => {
                let stream = (view.phase != DuelPhase::Over).then_some(sub);
                Reply { messages: vec![ServerMessage::State { view }], stream }
            }
            Err(e) => Reply::error(e),
        },
        ClientMessage::Practice { display_name, difficulty } => {
            match engine.start_practice(&display_name, origin_key, difficulty).await {
                Ok((token, view)) => Reply::one(ServerMessage::Matched { token, view }),
                Err(e) => Reply::error(e),
            }
        }
        ClientMessage::Spectate { session_id } => match engine.spectate(&session_id).await {
            Ok((view, sub)) => {
                let stream = (view.phase != DuelPhase::Over).then_some(sub);
                Reply { messages: vec![ServerMessage::Spectator { view }], stream }
            }
            Err(e) => Reply::error(e),
        },
        ClientMessage::RecentResults { limit } => Reply::one(ServerMessage::Results {
            duels: engine.recent_results(limit.min(MAX_RESULTS)),
        }),
        ClientMessage::Ping { timestamp } => Reply::one(ServerMessage::Pong {
            timestamp,
            server_time: unix_millis(),
        }),
    }
}

/// Forward a subscription to a client until the duel ends.
async fn forward(mut sub: Subscription, sender: mpsc::Sender<ServerMessage>) {
    while let Some(view) = sub.next().await {
        let (message, over) = match view {
            ScopedView::Participant(view) => {
                let over = view.phase == DuelPhase::Over;
                (ServerMessage::State { view }, over)
            }
            ScopedView::Spectator(view) => {
                let over = view.phase == DuelPhase::Over;
                (ServerMessage::Spectator { view }, over)
            }
        };
        if sender.send(message).await.is_err() || over {
            break;
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// Connected client state.
struct ConnectedClient {
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Fired once to close the connection. Taken when used.
    close_tx: Option<oneshot::Sender<()>>,
}

type ClientMap = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// Signal every client silent for longer than `idle_timeout` to close.
///
/// Entries stay until the connection task exits and removes its own, so
/// the connection count only drops once the socket is really gone.
async fn close_idle(clients: &ClientMap, idle_timeout: Duration, now: Instant) -> usize {
    let mut clients = clients.write().await;
    let mut closed = 0;
    for (addr, client) in clients.iter_mut() {
        if now.duration_since(client.last_activity) <= idle_timeout {
            continue;
        }
        if let Some(tx) = client.close_tx.take() {
            if tx.send(()).is_ok() {
                info!("Closing idle client {}", addr);
                closed += 1;
            }
        }
    }
    closed
}

/// The duel server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// The engine every connection talks to.
    engine: Arc<DuelEngine>,
    /// Connected clients.
    clients: ClientMap,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server in front of an engine.
    pub fn new(config: ServerConfig, engine: Arc<DuelEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            engine,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Run the server until [`shutdown`](Self::shutdown) is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Duel server {} listening on {}", self.config.version, self.config.bind_addr);

        let maintenance_handle = self.engine.spawn_maintenance();
        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        maintenance_handle.abort();
        cleanup_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let engine = self.engine.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let origin_key = addr.ip().to_string();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            let (close_tx, mut close_rx) = oneshot::channel();
            clients.write().await.insert(addr, ConnectedClient {
                connected_at: Instant::now(),
                last_activity: Instant::now(),
                close_tx: Some(close_tx),
            });

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut tasks: Vec<JoinHandle<()>> = Vec::new();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::InvalidMessage,
                                            message: "Invalid message format".to_string(),
                                            view: None,
                                        })).await;
                                        continue;
                                    }
                                };

                                if let Some(client) = clients.write().await.get_mut(&addr) {
                                    client.last_activity = Instant::now();
                                }

                                tasks.retain(|t| !t.is_finished());
                                let engine = engine.clone();
                                let origin_key = origin_key.clone();
                                let sender = msg_tx.clone();
                                tasks.push(tokio::spawn(async move {
                                    let reply = dispatch(&engine, &origin_key, client_msg).await;
                                    for message in reply.messages {
                                        if sender.send(message).await.is_err() {
                                            return;
                                        }
                                    }
                                    if let Some(sub) = reply.stream {
                                        forward(sub, sender).await;
                                    }
                                }));
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: unix_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = &mut close_rx => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Idle timeout".to_string(),
                        }).await;
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Blocked calls and streams die with the connection; queue
            // entries and duels stay for the caller to come back to.
            for task in tasks {
                task.abort();
            }
            drop(msg_tx);
            let mut sender_task = sender_task;
            if tokio::time::timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            if let Some(client) = clients.write().await.remove(&addr) {
                debug!("Client {} was connected for {:?}", addr, client.connected_at.elapsed());
            }
            info!("Client {} cleaned up", addr);
        });
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(clients: ClientMap, idle_timeout: Duration) {
        let period = idle_timeout.clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut interval = interval(period);

        loop {
            interval.tick().await;
            let closed = close_idle(&clients, idle_timeout, Instant::now()).await;
            if closed > 0 {
                debug!("Signalled {} idle clients to close", closed);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// The engine behind this server.
    pub fn engine(&self) -> &Arc<DuelEngine> {
        &self.engine
    }
}
