//! ClientSink port - Interface for pushing frames to one live client.
//!
//! The connection hub fans events out to many concurrently connected
//! clients; this port abstracts a single client's outbound half so the
//! hub never depends on the socket implementation (and tests can use
//! recording or failing sinks).

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::domain::foundation::DomainError;

/// Outbound half of one live client connection.
///
/// A send failure means the client is gone: the hub disconnects and
/// prunes the connection, it never retries.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Push one protocol frame to the client.
    async fn send(&self, frame: JsonValue) -> Result<(), DomainError>;
}
