//! Wire protocol for live client connections.
//!
//! Defines the frames exchanged between the hub and connected clients:
//! - Client → Hub: channel subscription management and pings
//! - Hub → Client: connection status, fanned-out events, heartbeats

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::envelope::MessageEnvelope;
use crate::domain::foundation::{ConnectionId, Timestamp};

// ============================================
// Hub → Client Messages
// ============================================

/// All frame types the hub sends to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection registered; carries the id the client is known by.
    ConnectionEstablished {
        connection_id: String,
        timestamp: String,
    },

    /// An event fanned out to a subscribed channel.
    Event {
        channel: String,
        message_id: String,
        payload: JsonValue,
        timestamp: String,
    },

    /// Channel subscription(s) applied.
    SubscriptionConfirmed {
        channels: Vec<String>,
        timestamp: String,
    },

    /// Something the client sent could not be honored.
    Error {
        code: String,
        message: String,
        timestamp: String,
    },

    /// Periodic liveness signal.
    Heartbeat { timestamp: String },

    /// Reply to a client ping.
    Pong { timestamp: String },
}

impl ServerMessage {
    pub fn connection_established(connection_id: ConnectionId) -> Self {
        Self::ConnectionEstablished {
            connection_id: connection_id.to_string(),
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn event(envelope: &MessageEnvelope) -> Self {
        Self::Event {
            channel: envelope.channel.to_string(),
            message_id: envelope.message_id.to_string(),
            payload: envelope.payload.clone(),
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn subscription_confirmed(channels: Vec<String>) -> Self {
        Self::SubscriptionConfirmed {
            channels,
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Timestamp::now().to_rfc3339(),
        }
    }

    /// Serializes the frame for a [`crate::ports::ClientSink`].
    pub fn to_frame(&self) -> JsonValue {
        serde_json::to_value(self).expect("ServerMessage serialization should not fail")
    }
}

// ============================================
// Client → Hub Messages
// ============================================

/// All frame types a client can send to the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe this connection to one channel.
    SubscribeChannel { channel: String },

    /// Unsubscribe this connection from one channel.
    UnsubscribeChannel { channel: String },

    /// Subscribe this connection to several channels at once.
    SubscribeMany { channels: Vec<String> },

    /// Heartbeat request; answered with a pong.
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_serializes_with_type_tag() {
        let msg = ServerMessage::connection_established(ConnectionId::new());
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains(r#""type":"connection_established""#));
        assert!(json.contains("connection_id"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn event_frame_carries_channel_and_payload() {
        let envelope = MessageEnvelope::test_fixture("events.billing.created");
        let msg = ServerMessage::event(&envelope);
        let frame = msg.to_frame();

        assert_eq!(frame["type"], "event");
        assert_eq!(frame["channel"], "events.billing.created");
        assert_eq!(frame["payload"], envelope.payload);
        assert_eq!(frame["message_id"], envelope.message_id.to_string());
    }

    #[test]
    fn heartbeat_and_pong_have_timestamps() {
        let heartbeat = ServerMessage::heartbeat().to_frame();
        let pong = ServerMessage::pong().to_frame();

        assert_eq!(heartbeat["type"], "heartbeat");
        assert_eq!(pong["type"], "pong");
        assert!(heartbeat["timestamp"].is_string());
        assert!(pong["timestamp"].is_string());
    }

    #[test]
    fn error_frame_serializes_code_and_message() {
        let frame = ServerMessage::error("INVALID_CHANNEL", "bad channel name").to_frame();

        assert_eq!(frame["type"], "error");
        assert_eq!(frame["code"], "INVALID_CHANNEL");
        assert_eq!(frame["message"], "bad channel name");
    }

    #[test]
    fn client_message_deserializes_subscribe_channel() {
        let json = r#"{"type": "subscribe_channel", "channel": "kpi.calculated.mrr.42.2026-07"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        assert!(matches!(
            msg,
            ClientMessage::SubscribeChannel { ref channel } if channel == "kpi.calculated.mrr.42.2026-07"
        ));
    }

    #[test]
    fn client_message_deserializes_subscribe_many() {
        let json = r#"{"type": "subscribe_many", "channels": ["events.a", "events.b"]}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();

        assert!(matches!(
            msg,
            ClientMessage::SubscribeMany { ref channels } if channels.len() == 2
        ));
    }

    #[test]
    fn client_message_deserializes_ping() {
        let json = r#"{"type": "ping"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn client_message_rejects_unknown_type() {
        let json = r#"{"type": "teleport"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
