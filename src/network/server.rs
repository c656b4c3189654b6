//! WebSocket Session Host
//!
//! Hosts one authoritative session over WebSocket. Clients authenticate to
//! take a seat; once every seat is filled the session starts on its engine
//! task. Events, replica pushes and heartbeats fan out to every seated
//! connection. A dropped connection is recorded as a disconnect; the player
//! can come back on a new connection with a rejoin request.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::game::events::GameEvent;
use crate::game::state::PlayerId;
use crate::network::auth::{validate_token, AuthError};
use crate::network::protocol::{
    parse_player_id, AuthRequest, AuthResult, ClientMessage, ErrorCode, RejoinRequest,
    ServerError, ServerMessage,
};
use crate::session::context::SessionContext;
use crate::session::handle::SessionHandle;
use crate::session::authority::SessionStatus;
use crate::session::orchestrator::{GameOrchestrator, Push};

/// Host configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Seats to fill before the session starts
    pub seats: usize,
    /// Connections silent this long are dropped
    pub idle_timeout: Duration,
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 64,
            seats: 2,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Read `BOARDSYNC_BIND_ADDR`, `BOARDSYNC_MAX_CONNECTIONS`,
    /// `BOARDSYNC_SEATS` and `BOARDSYNC_IDLE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = std::env::var("BOARDSYNC_BIND_ADDR").ok().and_then(|v| v.parse().ok()) {
            config.bind_addr = addr;
        }
        if let Some(n) = std::env::var("BOARDSYNC_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()) {
            config.max_connections = n;
        }
        if let Some(n) = std::env::var("BOARDSYNC_SEATS").ok().and_then(|v| v.parse().ok()) {
            config.seats = n;
        }
        if let Some(secs) = std::env::var("BOARDSYNC_IDLE_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()) {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Host errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Connection limit reached")]
    ConnectionLimitReached,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Connected client state.
struct ConnectedClient {
    /// Seat bound to this connection (after auth or rejoin)
    player_id: Option<PlayerId>,
    last_activity: Instant,
    sender: mpsc::Sender<ServerMessage>,
}

/// Seating before start, engine handle after.
enum Lobby {
    Waiting { seated: Vec<PlayerId> },
    Running { handle: SessionHandle, players: Vec<PlayerId> },
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// State shared by every connection task.
struct Shared {
    config: ServerConfig,
    ctx: SessionContext,
    clients: Clients,
    lobby: RwLock<Lobby>,
    shutdown_tx: broadcast::Sender<()>,
}

/// The session host.
pub struct GameServer {
    shared: Arc<Shared>,
}

impl GameServer {
    pub fn new(config: ServerConfig, ctx: SessionContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shared: Arc::new(Shared {
                config,
                ctx,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
                lobby: RwLock::new(Lobby::Waiting { seated: Vec::new() }),
                shutdown_tx,
            }),
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            addr = %listener.local_addr()?,
            session = %self.shared.ctx.session_hex(),
            seats = self.shared.config.seats,
            "session host listening"
        );

        let cleanup = tokio::spawn(run_cleanup_loop(self.shared.clone()));
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let count = self.shared.clients.read().await.len();
                            if count >= self.shared.config.max_connections {
                                warn!(%addr, "connection limit reached, rejecting");
                                continue;
                            }
                            debug!(%addr, "new connection");
                            tokio::spawn(handle_connection(self.shared.clone(), stream, addr));
                        }
                        Err(e) => error!(error = %e, "accept error"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        cleanup.abort();
        if let Lobby::Running { handle, .. } = &*self.shared.lobby.read().await {
            handle.stop().await;
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shared.shutdown_tx.send(());
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.clients.read().await.len()
    }

    /// Seats taken so far.
    pub async fn seated_count(&self) -> usize {
        match &*self.shared.lobby.read().await {
            Lobby::Waiting { seated } => seated.len(),
            Lobby::Running { players, .. } => players.len(),
        }
    }

    /// Engine handle once the session has started.
    pub async fn session(&self) -> Option<SessionHandle> {
        match &*self.shared.lobby.read().await {
            Lobby::Running { handle, .. } => Some(handle.clone()),
            Lobby::Waiting { .. } => None,
        }
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, addr: SocketAddr) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(256);

    shared.clients.write().await.insert(
        addr,
        ConnectedClient { player_id: None, last_activity: Instant::now(), sender: msg_tx.clone() },
    );

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "failed to serialize message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let client_msg = match ClientMessage::from_json(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            debug!(%addr, error = %e, "invalid message");
                            let _ = msg_tx
                                .send(ServerError::new(ErrorCode::InvalidInput, "invalid message format").into())
                                .await;
                            continue;
                        }
                    };
                    if let Some(client) = shared.clients.write().await.get_mut(&addr) {
                        client.last_activity = Instant::now();
                    }
                    if let ClientMessage::Leave = client_msg {
                        break;
                    }
                    handle_client_message(&shared, addr, client_msg, &msg_tx).await;
                }
                Some(Ok(Message::Ping(_))) => {
                    let _ = msg_tx.send(ServerMessage::Pong { timestamp: 0, server_time: now_millis() }).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(%addr, "client closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(%addr, error = %e, "websocket error");
                    break;
                }
                _ => {}
            },
            _ = shutdown_rx.recv() => {
                let _ = msg_tx.send(ServerMessage::Shutdown).await;
                break;
            }
        }
    }

    // Give the writer a moment to flush the last messages.
    drop(msg_tx);
    let _ = tokio::time::timeout(Duration::from_millis(200), sender_task).await;
    release_client(&shared, addr).await;
}

/// Forget `addr`; if it held a seat no other connection holds, record a
/// disconnect (or free the lobby seat).
async fn release_client(shared: &Shared, addr: SocketAddr) {
    let player = {
        let mut clients = shared.clients.write().await;
        let player = clients.remove(&addr).and_then(|c| c.player_id);
        player.filter(|p| !clients.values().any(|c| c.player_id == Some(*p)))
    };
    let Some(player) = player else {
        debug!(%addr, "client cleaned up");
        return;
    };

    let handle = {
        let mut lobby = shared.lobby.write().await;
        match &mut *lobby {
            Lobby::Waiting { seated } => {
                seated.retain(|p| *p != player);
                None
            }
            Lobby::Running { handle, .. } => Some(handle.clone()),
        }
    };
    match handle {
        Some(handle) => {
            if let Err(e) = handle.player_disconnected(player).await {
                debug!(player = %player, error = %e, "disconnect not recorded");
            }
        }
        None => broadcast_waiting(shared).await,
    }
    info!(%addr, player = %player, "client released");
}

async fn handle_client_message(
    shared: &Arc<Shared>,
    addr: SocketAddr,
    msg: ClientMessage,
    sender: &mpsc::Sender<ServerMessage>,
) {
    let reply = match msg {
        ClientMessage::Auth(auth) => handle_auth(shared, addr, auth).await,
        ClientMessage::Rejoin(req) => handle_rejoin(shared, addr, req).await,
        ClientMessage::Ping { timestamp } => {
            Some(ServerMessage::Pong { timestamp, server_time: now_millis() })
        }
        ClientMessage::Leave => None,
        other => handle_session_message(shared, addr, other).await,
    };
    if let Some(reply) = reply {
        let _ = sender.send(reply).await;
    }
}

async fn handle_auth(shared: &Arc<Shared>, addr: SocketAddr, auth: AuthRequest) -> Option<ServerMessage> {
    let player = match resolve_identity(&shared.ctx, &auth) {
        Ok(player) => player,
        Err(err) => {
            warn!(%addr, error = %err.message, "authentication failed");
            return Some(auth_failure(shared, err.message));
        }
    };

    // Bind first so two sockets cannot race for the same seat.
    let previous = {
        let mut clients = shared.clients.write().await;
        if clients.iter().any(|(other, c)| *other != addr && c.player_id == Some(player)) {
            warn!(%addr, player = %player, "seat held by another connection");
            return Some(ServerError::new(ErrorCode::AlreadyJoined, "player already connected").into());
        }
        clients.get_mut(&addr).and_then(|client| client.player_id.replace(player))
    };

    let seating = {
        let mut lobby = shared.lobby.write().await;
        match &mut *lobby {
            Lobby::Waiting { seated } if seated.contains(&player) || seated.len() < shared.config.seats => {
                if !seated.contains(&player) {
                    seated.push(player);
                }
                Ok((seated.len() == shared.config.seats).then(|| seated.clone()))
            }
            Lobby::Waiting { .. } => Err(ServerError::new(ErrorCode::SessionFull, "all seats taken")),
            Lobby::Running { .. } => Err(ServerError::new(
                ErrorCode::SessionFull,
                "session already started; send a rejoin request",
            )),
        }
    };
    let start = match seating {
        Ok(start) => start,
        Err(err) => {
            if let Some(client) = shared.clients.write().await.get_mut(&addr) {
                client.player_id = previous;
            }
            return Some(err.into());
        }
    };
    info!(%addr, player = %player, "player seated");

    if let Some(client) = shared.clients.read().await.get(&addr) {
        let _ = client
            .sender
            .send(ServerMessage::AuthResult(AuthResult {
                success: true,
                player_id: Some(player.to_uuid_string()),
                error: None,
                server_version: shared.config.version.clone(),
            }))
            .await;
    }

    match start {
        Some(players) => {
            if let Err(e) = start_session(shared, players).await {
                error!(error = %e, "session failed to start");
                return Some(ServerError::new(ErrorCode::InternalError, e.to_string()).into());
            }
        }
        None => broadcast_waiting(shared).await,
    }
    None
}

fn resolve_identity(ctx: &SessionContext, auth: &AuthRequest) -> Result<PlayerId, ServerError> {
    if ctx.auth.is_configured() {
        let token = auth
            .token
            .as_deref()
            .ok_or_else(|| ServerError::new(ErrorCode::NotAuthenticated, "token required"))?;
        return validate_token(token, &ctx.auth)
            .map(|claims| claims.player_id())
            .map_err(|e| {
                let code = match e {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    _ => ErrorCode::InvalidToken,
                };
                ServerError::new(code, e.to_string())
            });
    }
    match auth.player_id.as_deref() {
        Some(text) => parse_player_id(text)
            .ok_or_else(|| ServerError::new(ErrorCode::InvalidInput, "invalid player id")),
        None => Ok(PlayerId::random()),
    }
}

fn auth_failure(shared: &Shared, message: String) -> ServerMessage {
    ServerMessage::AuthResult(AuthResult {
        success: false,
        player_id: None,
        error: Some(message),
        server_version: shared.config.version.clone(),
    })
}

async fn start_session(shared: &Arc<Shared>, players: Vec<PlayerId>) -> Result<(), GameServerError> {
    let orchestrator = GameOrchestrator::new(shared.ctx.clone(), &players)?;
    let (handle, _task) = SessionHandle::spawn(orchestrator)?;

    // Subscribe before anyone can submit, so nothing is missed.
    let events = handle.subscribe();
    let pushes = handle.subscribe_pushes();
    *shared.lobby.write().await = Lobby::Running { handle: handle.clone(), players: players.clone() };
    tokio::spawn(run_fanout(shared.clone(), handle.clone(), events, pushes));

    let session_id = uuid::Uuid::from_bytes(shared.ctx.session_id).to_string();
    let clients = shared.clients.read().await;
    for client in clients.values() {
        let Some(player) = client.player_id else { continue };
        let rejoin_ticket = if shared.ctx.auth.is_configured() {
            None
        } else {
            handle.rejoin_ticket(player).await?
        };
        let bundle = handle.request_resync(player, 0).await?;
        let _ = client
            .sender
            .send(ServerMessage::SessionStarted {
                session_id: session_id.clone(),
                players: players.clone(),
                rejoin_ticket,
                bundle,
            })
            .await;
    }
    info!(session = %shared.ctx.session_hex(), players = players.len(), "session running");
    Ok(())
}

async fn handle_rejoin(shared: &Arc<Shared>, addr: SocketAddr, req: RejoinRequest) -> Option<ServerMessage> {
    let Some(player) = parse_player_id(&req.player_id) else {
        return Some(ServerError::new(ErrorCode::InvalidInput, "invalid player id").into());
    };
    let Some(handle) = running_handle(shared).await else {
        return Some(ServerError::new(ErrorCode::SessionNotActive, "session has not started").into());
    };

    match handle.request_rejoin(player, req.last_known_turn, req.credential).await {
        Ok(bundle) => {
            if let Some(client) = shared.clients.write().await.get_mut(&addr) {
                client.player_id = Some(player);
            }
            Some(ServerMessage::Rejoin { bundle })
        }
        Err(e) => {
            warn!(%addr, player = %player, error = %e, "rejoin refused");
            Some(ServerError::from_engine(&e).into())
        }
    }
}

/// Messages that need a seat in a running session.
async fn handle_session_message(
    shared: &Arc<Shared>,
    addr: SocketAddr,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    let player = shared.clients.read().await.get(&addr).and_then(|c| c.player_id);
    let Some(player) = player else {
        return Some(ServerError::new(ErrorCode::NotAuthenticated, "authenticate first").into());
    };
    let Some(handle) = running_handle(shared).await else {
        return Some(ServerError::new(ErrorCode::SessionNotActive, "session has not started").into());
    };

    let result = match msg {
        ClientMessage::SubmitIntent { sequence, intent } => handle
            .submit_intent(player, sequence, intent)
            .await
            .map(|reply| ServerMessage::IntentResult { sequence, reply }),
        ClientMessage::WithdrawIntent { sequence } => handle
            .withdraw_intent(player, sequence)
            .await
            .map(|withdrawn| ServerMessage::WithdrawResult { sequence, withdrawn }),
        ClientMessage::ConfirmRejoin => handle.confirm_rejoin(player).await.map(|()| {
            let view = handle.status();
            ServerMessage::Heartbeat {
                turn: view.turn,
                last_sequence: view.last_sequence,
                state_hash: view.state_hash,
            }
        }),
        ClientMessage::Resync { last_sequence } => handle
            .request_resync(player, last_sequence)
            .await
            .map(|bundle| ServerMessage::Resync { bundle }),
        ClientMessage::GetSnapshot => handle
            .get_snapshot()
            .await
            .map(|snapshot| ServerMessage::Snapshot { snapshot }),
        ClientMessage::GetTurnRecord { turn } => handle
            .get_turn_record(turn)
            .await
            .map(|record| ServerMessage::TurnRecord { record }),
        ClientMessage::Auth(_)
        | ClientMessage::Rejoin(_)
        | ClientMessage::Ping { .. }
        | ClientMessage::Leave => return None,
    };

    Some(result.unwrap_or_else(|e| ServerError::from_engine(&e).into()))
}

async fn running_handle(shared: &Shared) -> Option<SessionHandle> {
    match &*shared.lobby.read().await {
        Lobby::Running { handle, .. } => Some(handle.clone()),
        Lobby::Waiting { .. } => None,
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

async fn broadcast(shared: &Shared, msg: ServerMessage) {
    let senders: Vec<_> = shared
        .clients
        .read()
        .await
        .values()
        .filter(|c| c.player_id.is_some())
        .map(|c| c.sender.clone())
        .collect();
    for sender in senders {
        let _ = sender.send(msg.clone()).await;
    }
}

async fn broadcast_waiting(shared: &Shared) {
    let joined = match &*shared.lobby.read().await {
        Lobby::Waiting { seated } => seated.len(),
        Lobby::Running { .. } => return,
    };
    broadcast(shared, ServerMessage::Waiting { joined, needed: shared.config.seats }).await;
}

/// Forward events, pushes and heartbeats to every seated connection.
async fn run_fanout(
    shared: Arc<Shared>,
    handle: SessionHandle,
    mut events: broadcast::Receiver<GameEvent>,
    mut pushes: broadcast::Receiver<Push>,
) {
    let mut heartbeat = interval(shared.ctx.config.timing.heartbeat_interval);
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => broadcast(&shared, ServerMessage::Event { event }).await,
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event fan-out lagged"),
                Err(RecvError::Closed) => break,
            },
            push = pushes.recv() => match push {
                Ok(push) => broadcast(&shared, ServerMessage::Push { push }).await,
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "push fan-out lagged; replicas will resync"),
                Err(RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => {
                let view = handle.status();
                if let SessionStatus::Terminated { reason } = view.status {
                    broadcast(&shared, ServerMessage::Terminated { reason }).await;
                    break;
                }
                broadcast(&shared, ServerMessage::Heartbeat {
                    turn: view.turn,
                    last_sequence: view.last_sequence,
                    state_hash: view.state_hash,
                }).await;
            }
            _ = shutdown_rx.recv() => break,
        }
    }
    debug!("fan-out stopped");
}

/// Drop connections that have gone quiet.
async fn run_cleanup_loop(shared: Arc<Shared>) {
    let mut ticker = interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let idle: Vec<SocketAddr> = shared
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) > shared.config.idle_timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in idle {
            info!(%addr, "removing idle client");
            release_client(&shared, addr).await;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant as TokioInstant;
    use tokio_tungstenite::connect_async;
    use crate::game::intent::Intent;
    use crate::game::state::ConnectionStatus;
    use crate::session::orchestrator::IntentReply;
    use crate::session::replica::ReplicaSession;

    type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    async fn send(ws: &mut Ws, msg: ClientMessage) {
        ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
    }

    /// Read until `pick` returns Some.
    async fn recv_until<T>(ws: &mut Ws, mut pick: impl FnMut(ServerMessage) -> Option<T>) -> T {
        let read = async {
            loop {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    if let Some(found) = pick(ServerMessage::from_json(&text).unwrap()) {
                        return found;
                    }
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), read).await.unwrap()
    }

    async fn join(addr: SocketAddr, seat: u8) -> Ws {
        let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        send(
            &mut ws,
            ClientMessage::Auth(AuthRequest {
                player_id: Some(hex::encode([seat; 16])),
                token: None,
                client_version: "test".into(),
            }),
        )
        .await;
        ws
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.seats, 2);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default(), SessionContext::standard());
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.seated_count().await, 0);
        assert!(server.session().await.is_none());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_two_seats_start_and_play() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ServerConfig::default(), SessionContext::standard()));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let mut a = join(addr, 1).await;
        recv_until(&mut a, |m| matches!(m, ServerMessage::Waiting { joined: 1, .. }).then_some(())).await;
        let mut b = join(addr, 2).await;

        let (ticket, bundle) = recv_until(&mut b, |m| match m {
            ServerMessage::SessionStarted { rejoin_ticket, bundle, .. } => Some((rejoin_ticket, bundle)),
            _ => None,
        })
        .await;
        assert!(ticket.is_some());
        recv_until(&mut a, |m| matches!(m, ServerMessage::SessionStarted { .. }).then_some(())).await;

        // The start bundle is enough to build a replica; no rejoin needed.
        let replica =
            ReplicaSession::from_bundle(SessionContext::standard(), PlayerId::new([2; 16]), &bundle, TokioInstant::now())
                .unwrap();
        assert_eq!(replica.last_sequence(), 0);
        assert_eq!(replica.state().turn_number, 1);

        // Seat 0 rolls; seat 1 is refused.
        send(&mut b, ClientMessage::SubmitIntent { sequence: 1, intent: Intent::RollDice }).await;
        let reply = recv_until(&mut b, |m| match m {
            ServerMessage::IntentResult { reply, .. } => Some(reply),
            _ => None,
        })
        .await;
        assert!(matches!(reply, IntentReply::Rejected { .. }));

        send(&mut a, ClientMessage::SubmitIntent { sequence: 1, intent: Intent::RollDice }).await;
        let reply = recv_until(&mut a, |m| match m {
            ServerMessage::IntentResult { reply, .. } => Some(reply),
            _ => None,
        })
        .await;
        assert_eq!(reply, IntentReply::Accepted { turn: 1 });

        // Replica pushes reach the other seat.
        recv_until(&mut b, |m| matches!(m, ServerMessage::Push { .. }).then_some(())).await;

        // A resync leaves seat 1 connected.
        send(&mut b, ClientMessage::Resync { last_sequence: 0 }).await;
        let bundle = recv_until(&mut b, |m| match m {
            ServerMessage::Resync { bundle } => Some(bundle),
            _ => None,
        })
        .await;
        assert_eq!(bundle.in_flight.len(), 1);
        let ctx = SessionContext::standard();
        let live = bundle.restore(ctx.content.clone(), &ctx.config.rules).unwrap();
        let seat = live.state().player(&PlayerId::new([2; 16])).unwrap();
        assert_eq!(seat.connection, ConnectionStatus::Connected);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_seat_claim_refused_while_held() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(GameServer::new(ServerConfig::default(), SessionContext::standard()));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let mut a = join(addr, 1).await;
        recv_until(&mut a, |m| matches!(m, ServerMessage::Waiting { joined: 1, .. }).then_some(())).await;

        let mut impostor = join(addr, 1).await;
        let code = recv_until(&mut impostor, |m| match m {
            ServerMessage::Error(err) => Some(err.code),
            _ => None,
        })
        .await;
        assert_eq!(code, ErrorCode::AlreadyJoined);
        assert_eq!(server.seated_count().await, 1);
        server.shutdown();
    }
}
