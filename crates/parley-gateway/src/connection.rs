use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::Identity;

use crate::presence::ConnectionHandle;
use crate::router::{MessageRouter, RouterError};
use crate::token::{self, AuthError};

/// Close code sent after a rejected handshake.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub jwt_secret: String,
    /// How long a fresh connection may take to send `Identify`.
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl GatewayConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Joined,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_enter(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Connecting, Closed)
                | (Authenticated, Joined)
                | (Authenticated, Closed)
                | (Joined, Closed)
        )
    }
}

struct Lifecycle {
    conn_id: Uuid,
    state: ConnectionState,
}

impl Lifecycle {
    fn enter(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_enter(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("connection {}: {:?} -> {:?}", self.conn_id, self.state, next);
        self.state = next;
    }
}

/// Drive one WebSocket connection from handshake to teardown.
pub async fn handle_connection(socket: WebSocket, router: MessageRouter, config: Arc<GatewayConfig>) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, user_rx) = ConnectionHandle::new();
    let mut lifecycle = Lifecycle {
        conn_id: handle.id(),
        state: ConnectionState::Connecting,
    };

    // Step 1: Wait for Identify command with JWT
    let identity = match wait_for_identify(&mut receiver, &config).await {
        Ok(identity) => identity,
        Err(Handshake::Rejected(e)) => {
            warn!("Gateway handshake rejected: {}", e);
            reject(&mut sender, e).await;
            lifecycle.enter(ConnectionState::Closed);
            return;
        }
        Err(Handshake::TimedOut) => {
            warn!("WebSocket client failed to identify, closing");
            close(&mut sender, "handshake_timeout").await;
            lifecycle.enter(ConnectionState::Closed);
            return;
        }
        Err(Handshake::Disconnected) => {
            debug!("WebSocket client left before identifying");
            lifecycle.enter(ConnectionState::Closed);
            return;
        }
    };
    lifecycle.enter(ConnectionState::Authenticated);

    // Step 2: Queue Ready ahead of anything routed to us, then join the room
    handle.send(GatewayEvent::Ready {
        user_id: identity.id,
        username: identity.username.clone(),
    });
    router.presence().join(identity.id, handle.clone()).await;
    lifecycle.enter(ConnectionState::Joined);
    info!("{} ({}) connected to gateway", identity.username, identity.id);

    run_connection_loop(sender, receiver, user_rx, &handle, &router, &identity, &config).await;

    router.presence().leave(identity.id, &handle).await;
    lifecycle.enter(ConnectionState::Closed);
    info!("{} ({}) disconnected from gateway", identity.username, identity.id);
}

async fn reject(sender: &mut SplitSink<WebSocket, Message>, err: AuthError) {
    let event = GatewayEvent::InvalidSession {
        reason: err.reason().to_string(),
    };
    if let Ok(text) = serde_json::to_string(&event) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    close(sender, err.reason()).await;
}

async fn close(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_UNAUTHORIZED,
            reason: reason.into(),
        })))
        .await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>,
    handle: &ConnectionHandle,
    router: &MessageRouter,
    identity: &Identity,
    config: &GatewayConfig,
) {
    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();
    let heartbeat_interval = config.heartbeat_interval;

    // Spawn task to forward routed events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client. Each send is awaited before the next frame
    // is read, so one connection's messages are persisted in order.
    let router = router.clone();
    let handle = handle.clone();
    let identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&router, &handle, &identity, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            identity.username,
                            identity.id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Why a connection never reached `Authenticated`.
enum Handshake {
    Rejected(AuthError),
    TimedOut,
    Disconnected,
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    config: &GatewayConfig,
) -> Result<Identity, Handshake> {
    let handshake = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match parse_identify(&text) {
                    Some(Ok(token)) => {
                        return token::validate(&token, &config.jwt_secret, chrono::Utc::now())
                            .map_err(Handshake::Rejected);
                    }
                    Some(Err(e)) => return Err(Handshake::Rejected(e)),
                    None => debug!("Ignoring frame before Identify"),
                },
                Message::Close(_) => return Err(Handshake::Disconnected),
                _ => {}
            }
        }
        Err(Handshake::Disconnected)
    };

    tokio::time::timeout(config.handshake_timeout, handshake)
        .await
        .unwrap_or(Err(Handshake::TimedOut))
}

/// Token carried by an `Identify` frame. `None` for any other frame; an
/// `Identify` whose data does not decode is a malformed token.
fn parse_identify(text: &str) -> Option<Result<String, AuthError>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("Identify") {
        return None;
    }
    match serde_json::from_value::<GatewayCommand>(value) {
        Ok(GatewayCommand::Identify { token }) => Some(Ok(token)),
        _ => Some(Err(AuthError::Malformed)),
    }
}

async fn handle_command(
    router: &MessageRouter,
    handle: &ConnectionHandle,
    identity: &Identity,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {
            debug!("{} ({}) sent Identify after handshake, ignoring", identity.username, identity.id);
        }

        GatewayCommand::SendMessage { receiver_id, body } => {
            match router.route(identity.id, receiver_id, &body).await {
                Ok(_) => {}
                Err(RouterError::InvalidPayload(reason)) => {
                    warn!("{} ({}) dropped send: {}", identity.username, identity.id, reason);
                }
                Err(RouterError::StoreUnavailable(_)) => {
                    handle.send(GatewayEvent::SendFailed {
                        reason: "store_unavailable".into(),
                    });
                }
            }
        }
    }
}
