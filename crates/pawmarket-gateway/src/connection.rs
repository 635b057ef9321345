use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use pawmarket_db::StoreError;
use pawmarket_types::events::{IdentifyFrame, InboundFrame, OutboundFrame};
use pawmarket_types::models::ConversationId;

use crate::registry::Membership;
use crate::{ChatError, ChatService, Identity};

pub const CLOSE_UNAUTHORIZED: u16 = 4401;
pub const CLOSE_FORBIDDEN: u16 = 4403;
pub const CLOSE_AUTH_TIMEOUT: u16 = 4408;
const CLOSE_INTERNAL: u16 = 1011;

/// How long the writer may keep flushing after the reader has stopped.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Window for an unauthenticated socket to present a credential.
    pub auth_timeout: Duration,
    /// Ping interval; two missed pongs drop the connection.
    pub heartbeat_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Rejected,
}

/// Tracks one connection through Connecting -> Open -> Closing -> Closed,
/// or Connecting -> Rejected. Closed and Rejected are terminal.
#[derive(Debug)]
pub struct Lifecycle {
    state: ConnectionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn open(&mut self) -> bool {
        self.advance(ConnectionState::Connecting, ConnectionState::Open)
    }

    pub fn reject(&mut self) -> bool {
        self.advance(ConnectionState::Connecting, ConnectionState::Rejected)
    }

    /// Begin closing. Returns true only the first time it is called on an
    /// open connection, i.e. when a group seat has to be released.
    pub fn close(&mut self) -> bool {
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                true
            }
            ConnectionState::Connecting => {
                self.state = ConnectionState::Closed;
                false
            }
            _ => false,
        }
    }

    pub fn finish(&mut self) {
        self.advance(ConnectionState::Closing, ConnectionState::Closed);
    }

    fn advance(&mut self, from: ConnectionState, to: ConnectionState) -> bool {
        if self.state == from {
            self.state = to;
            true
        } else {
            false
        }
    }
}

/// Resolve the credential and check the caller is a participant.
pub async fn authorize(
    service: &ChatService,
    credential: &str,
    conversation_id: ConversationId,
) -> Result<Identity, ChatError> {
    let identity = service.authenticate(credential).await?;
    service.authorize(conversation_id, identity.user_id).await?;
    Ok(identity)
}

pub fn rejection_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
        e if e.is_transient() => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::FORBIDDEN,
    }
}

/// Upgrade handler for `/ws/chat/{conversation_id}`.
///
/// A credential in the address is checked before the upgrade, so a rejected
/// client never gets a socket. Without one, the socket is upgraded and must
/// identify itself within the authorization window.
pub async fn accept(
    ws: WebSocketUpgrade,
    service: ChatService,
    conversation_id: ConversationId,
    credential: Option<String>,
    config: GatewayConfig,
) -> Response {
    let identity = match credential {
        Some(token) => {
            let attempt = authorize(&service, &token, conversation_id);
            match tokio::time::timeout(config.auth_timeout, attempt).await {
                Ok(Ok(identity)) => Some(identity),
                Ok(Err(e)) => {
                    warn!("Rejected connection to conversation {}: {}", conversation_id, e);
                    return rejection_status(&e).into_response();
                }
                Err(_) => {
                    warn!("Credential for conversation {} not resolved in time", conversation_id);
                    return StatusCode::REQUEST_TIMEOUT.into_response();
                }
            }
        }
        None => None,
    };

    ws.on_upgrade(move |socket| handle_connection(socket, service, conversation_id, identity, config))
}

enum Rejection {
    Timeout,
    Denied(ChatError),
    Gone,
}

/// Drive one upgraded socket until it closes.
pub async fn handle_connection(
    mut socket: WebSocket,
    service: ChatService,
    conversation_id: ConversationId,
    identity: Option<Identity>,
    config: GatewayConfig,
) {
    let mut lifecycle = Lifecycle::new();

    let identity = match identity {
        Some(identity) => identity,
        None => match wait_for_identify(&mut socket, &service, conversation_id, config.auth_timeout).await {
            Ok(identity) => identity,
            Err(Rejection::Gone) => {
                lifecycle.close();
                debug!("Socket for conversation {} closed before identifying", conversation_id);
                return;
            }
            Err(rejection) => {
                lifecycle.reject();
                let (code, reason) = match &rejection {
                    Rejection::Timeout => (CLOSE_AUTH_TIMEOUT, "authorization timed out"),
                    Rejection::Denied(ChatError::Auth(_)) => (CLOSE_UNAUTHORIZED, "invalid credential"),
                    Rejection::Denied(e) if e.is_transient() => (CLOSE_INTERNAL, "internal error"),
                    _ => (CLOSE_FORBIDDEN, "not a participant"),
                };
                if let Rejection::Denied(e) = &rejection {
                    warn!("Rejected connection to conversation {}: {}", conversation_id, e);
                } else {
                    warn!("Connection to conversation {} failed to identify in time", conversation_id);
                }
                let _ = socket.send(close_message(code, reason)).await;
                return;
            }
        },
    };

    run_connection_loop(socket, service, conversation_id, identity, config, lifecycle).await;
}

async fn wait_for_identify(
    socket: &mut WebSocket,
    service: &ChatService,
    conversation_id: ConversationId,
    window: Duration,
) -> Result<Identity, Rejection> {
    let attempt = async {
        while let Some(Ok(msg)) = socket.recv().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<IdentifyFrame>(&text) {
                    Ok(frame) => {
                        return authorize(service, &frame.token, conversation_id)
                            .await
                            .map_err(Rejection::Denied);
                    }
                    Err(_) => debug!("Ignoring frame before identify on conversation {}", conversation_id),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(Rejection::Gone)
    };

    tokio::time::timeout(window, attempt)
        .await
        .unwrap_or(Err(Rejection::Timeout))
}

async fn run_connection_loop(
    socket: WebSocket,
    service: ChatService,
    conversation_id: ConversationId,
    identity: Identity,
    config: GatewayConfig,
    mut lifecycle: Lifecycle,
) {
    let Membership {
        conn_id,
        rx: mut group_rx,
    } = service.registry().join(conversation_id, identity.user_id).await;
    lifecycle.open();

    info!(
        "{} ({}) connected to conversation {}",
        identity.username, identity.user_id, conversation_id
    );

    let (mut sender, mut receiver) = socket.split();

    // Frames for this connection only (error notices, close frames)
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<Message>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Writer: group broadcasts + direct frames -> client, with heartbeat
    let heartbeat_interval = config.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;
        let mut group_open = true;
        let mut direct_open = true;

        while group_open || direct_open {
            tokio::select! {
                frame = group_rx.recv(), if group_open => match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    None => group_open = false,
                },
                msg = direct_rx.recv(), if direct_open => match msg {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if sender.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    None => direct_open = false,
                },
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

        let _ = sender.close().await;
    });

    // Ends the reader once the writer is gone. Only checked between frames,
    // so a send that has reached the store always runs to completion.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Reader: one frame at a time, persisted and broadcast before the next read
    let recv_service = service.clone();
    let user_id = identity.user_id;
    let username = identity.username.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                msg = receiver.next() => msg,
            };
            let Some(Ok(msg)) = msg else { break };

            match msg {
                Message::Text(raw) => {
                    let frame = match serde_json::from_str::<InboundFrame>(&raw) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(
                                "{} ({}) bad frame: {} -- raw: {}",
                                username,
                                user_id,
                                e,
                                raw.chars().take(200).collect::<String>()
                            );
                            continue;
                        }
                    };

                    let text = frame.text.trim();
                    if text.is_empty() {
                        debug!("{} ({}) sent an empty message, ignoring", username, user_id);
                        continue;
                    }

                    match recv_service.send_message(conversation_id, user_id, text).await {
                        Ok(message) => {
                            trace!("{} ({}) stored message {}", username, user_id, message.id);
                        }
                        Err(ChatError::Store(StoreError::EmptyText)) => {}
                        Err(e) if e.is_transient() => {
                            error!(
                                "Storage failure for {} ({}) in conversation {}: {}",
                                username, user_id, conversation_id, e
                            );
                            let notice = OutboundFrame::Error {
                                code: "storage_error".into(),
                                message: "message could not be stored".into(),
                            };
                            if let Ok(json) = notice.to_json() {
                                let _ = direct_tx.send(Message::Text(json.into()));
                            }
                            let _ = direct_tx.send(close_message(CLOSE_INTERNAL, "storage failure"));
                            return;
                        }
                        Err(e) => {
                            warn!(
                                "{} ({}) denied in conversation {}: {}",
                                username, user_id, conversation_id, e
                            );
                            let _ = direct_tx.send(close_message(CLOSE_FORBIDDEN, "not a participant"));
                            return;
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            let _ = shutdown_tx.send(true);
            let _ = (&mut recv_task).await;
        }
        _ = &mut recv_task => {
            // Releasing the seat closes the group queue, so the writer
            // drains what is left and stops
            service.registry().leave(conversation_id, conn_id).await;
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    if lifecycle.close() {
        service.registry().leave(conversation_id, conn_id).await;
    }
    lifecycle.finish();

    info!(
        "{} ({}) disconnected from conversation {}",
        identity.username, identity.user_id, conversation_id
    );
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
