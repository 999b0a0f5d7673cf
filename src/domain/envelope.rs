//! Message envelope - transport wrapper for bus messages.
//!
//! This module provides the types carried on the bus wire and through
//! delivery queues:
//! - `MessageId` based identity for deduplication and acknowledgement
//! - `MessageMetadata` - correlation and origin context
//! - `MessageEnvelope` - the routed unit of delivery

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::channel::ChannelName;
use super::foundation::{MessageId, Timestamp};

/// Metadata for tracing and correlation.
///
/// Flows with the message through the bus, delivery queues, and webhook
/// bodies:
/// - `correlation_id` - links related messages across a request
/// - `origin_service` - the service that published the message
/// - `timestamp` - when the message was published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// ID linking related messages across a single request or session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Service that published the message.
    pub origin_service: String,

    /// When the message was published.
    pub timestamp: Timestamp,
}

impl MessageMetadata {
    /// Creates metadata stamped with the current time.
    pub fn new(origin_service: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            origin_service: origin_service.into(),
            timestamp: Timestamp::now(),
        }
    }

    /// Add a correlation ID for request tracing.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Transport envelope for bus messages.
///
/// Created once per publish, then cloned per matching subscription so
/// each subscription owns an independent delivery timeline. Immutable
/// except `delivery_attempt`, which is incremented on retry; the
/// envelope is dropped on terminal delivery or dead-letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique ID for this message instance.
    pub message_id: MessageId,

    /// Concrete channel the message was published on.
    pub channel: ChannelName,

    /// Message payload as JSON.
    pub payload: JsonValue,

    /// Tracing and correlation metadata.
    pub metadata: MessageMetadata,

    /// Current delivery attempt, starting at 1.
    pub delivery_attempt: u32,

    /// Attempt ceiling before the message is dead-lettered.
    pub max_attempts: u32,
}

impl MessageEnvelope {
    /// Default attempt ceiling applied on publish; subscriptions
    /// override it with their own `max_delivery_attempts`.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Creates a new envelope for a freshly published message.
    pub fn new(channel: ChannelName, payload: JsonValue, metadata: MessageMetadata) -> Self {
        Self {
            message_id: MessageId::new(),
            channel,
            payload,
            metadata,
            delivery_attempt: 1,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Rebinds the envelope to a subscription's attempt ceiling,
    /// resetting the attempt counter for that subscription's timeline.
    pub fn for_subscription(&self, max_attempts: u32) -> Self {
        Self {
            delivery_attempt: 1,
            max_attempts,
            ..self.clone()
        }
    }

    /// True once the attempt counter has reached the ceiling.
    pub fn is_final_attempt(&self) -> bool {
        self.delivery_attempt >= self.max_attempts
    }

    /// Increments the attempt counter for a retry.
    pub fn next_attempt(&mut self) {
        self.delivery_attempt += 1;
    }

    /// Deserialize the payload to a concrete type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
impl MessageEnvelope {
    /// Creates a test fixture envelope.
    pub fn test_fixture(channel: &str) -> Self {
        Self::new(
            ChannelName::new(channel).unwrap(),
            serde_json::json!({"test": "data"}),
            MessageMetadata::new("test-service"),
        )
    }
}
