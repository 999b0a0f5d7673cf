//! WebSocket upgrade handler for live relay connections.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection
//! lifecycle:
//! 1. Upgrade to WebSocket and register with the hub
//! 2. Bridge hub frames to the socket through an mpsc-backed sink
//! 3. Dispatch inbound client frames to hub operations
//! 4. Clean up hub registration on disconnect

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header::USER_AGENT,
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::domain::channel::ChannelName;
use crate::domain::foundation::{ConnectionId, DomainError, ErrorCode};
use crate::ports::ClientSink;

use super::connections::{ClientInfo, ConnectionHub};
use super::messages::{ClientMessage, ServerMessage};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct HubSocketState {
    pub hub: Arc<ConnectionHub>,
}

impl HubSocketState {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }
}

/// Sink feeding one socket's write half through a channel.
///
/// The hub sends from many tasks; the socket's write half lives in a
/// single forwarding task, so the sink is just the channel sender.
struct SocketSink {
    tx: mpsc::UnboundedSender<JsonValue>,
}

#[async_trait]
impl ClientSink for SocketSink {
    async fn send(&self, frame: JsonValue) -> Result<(), DomainError> {
        self.tx
            .send(frame)
            .map_err(|_| DomainError::new(ErrorCode::ConnectionClosed, "socket closed"))
    }
}

/// Handle WebSocket upgrade requests for live event delivery.
///
/// Route: `GET /live`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<HubSocketState>,
) -> Response {
    let info = ClientInfo {
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        remote_addr: None,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, info))
}

/// Handle an established WebSocket connection.
///
/// Runs for the lifetime of the connection: registers with the hub,
/// forwards hub frames out, dispatches client frames in, and leaves
/// the hub on either side closing.
async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>, info: ClientInfo) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<JsonValue>();
    let connection_id = hub.connect(Arc::new(SocketSink { tx }), info).await;

    // Forward hub frames to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(frame.to_string())).await {
                tracing::debug!(error = %e, "socket send failed, closing");
                break;
            }
        }
    });

    // Dispatch client frames to the hub.
    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    handle_client_frame(&recv_hub, connection_id, &text).await;
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %connection_id, "client sent close frame");
                    break;
                }
                // Protocol-level ping/pong is handled by axum; binary
                // frames are not part of the protocol.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "socket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(connection_id).await;
}

/// Applies one inbound client frame to the hub.
async fn handle_client_frame(hub: &ConnectionHub, connection_id: ConnectionId, text: &str) {
    hub.touch(connection_id).await;

    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let _ = hub
                .send_to(
                    connection_id,
                    ServerMessage::error("INVALID_MESSAGE", e.to_string()),
                )
                .await;
            return;
        }
    };

    match message {
        ClientMessage::SubscribeChannel { channel } => match ChannelName::new(channel) {
            Ok(channel) => {
                if hub.subscribe(connection_id, channel.clone()).await.is_ok() {
                    let _ = hub
                        .send_to(
                            connection_id,
                            ServerMessage::subscription_confirmed(vec![channel.to_string()]),
                        )
                        .await;
                }
            }
            Err(e) => {
                let _ = hub
                    .send_to(
                        connection_id,
                        ServerMessage::error("INVALID_CHANNEL", e.to_string()),
                    )
                    .await;
            }
        },

        ClientMessage::SubscribeMany { channels } => {
            let mut valid = Vec::new();
            for raw in channels {
                match ChannelName::new(raw) {
                    Ok(channel) => valid.push(channel),
                    Err(e) => {
                        let _ = hub
                            .send_to(
                                connection_id,
                                ServerMessage::error("INVALID_CHANNEL", e.to_string()),
                            )
                            .await;
                    }
                }
            }
            if !valid.is_empty() {
                let names: Vec<String> = valid.iter().map(|c| c.to_string()).collect();
                if hub.subscribe_many(connection_id, valid).await.is_ok() {
                    let _ = hub
                        .send_to(connection_id, ServerMessage::subscription_confirmed(names))
                        .await;
                }
            }
        }

        ClientMessage::UnsubscribeChannel { channel } => {
            if let Ok(channel) = ChannelName::new(channel) {
                let _ = hub.unsubscribe(connection_id, &channel).await;
            }
        }

        ClientMessage::Ping => {
            let _ = hub.send_to(connection_id, ServerMessage::pong()).await;
        }
    }
}

/// Create an axum router for the live connection endpoint.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .nest("/relay", hub_router())
///     .with_state(HubSocketState::new(hub));
/// ```
pub fn hub_router() -> axum::Router<HubSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/live", get(ws_handler))
}
