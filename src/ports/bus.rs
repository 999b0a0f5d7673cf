//! MessageBus port - Interface for the external publish/subscribe store.
//!
//! This port defines how the relay publishes and receives messages
//! without knowing about the underlying transport (in-memory, Redis).

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::channel::{ChannelName, ChannelPattern};
use crate::domain::envelope::MessageEnvelope;
use crate::domain::foundation::DomainError;

/// Handler invoked for messages arriving on a subscribed channel.
///
/// Implementations should be:
/// - **Quick** - long operations belong on a queue, not in dispatch
/// - **Isolated** - errors are logged per handler and never affect
///   other handlers or the dispatch loop
///
/// Both immediately-returning and suspending consumers implement this
/// one method; the dispatcher treats them uniformly.
#[async_trait]
pub trait BusHandler: Send + Sync {
    /// Process one inbound message.
    async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), DomainError>;

    /// Handler name for logging and metrics.
    fn name(&self) -> &'static str;
}

/// Opaque handle identifying one handler registration on the bus.
///
/// Returned by `subscribe`/`subscribe_pattern`; pass it back to
/// `unsubscribe` to withdraw the registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberToken(u64);

impl SubscriberToken {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Port for the channel-based publish/subscribe bus.
///
/// Implementations own exactly one dispatch loop (`run`) which holds
/// the underlying connection, resolves direct and pattern matches, and
/// invokes every matching handler. Publishing is fire-and-forget with
/// respect to subscribers: a failed downstream delivery never surfaces
/// to the publisher.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a concrete channel.
    ///
    /// The bus wraps the payload in a [`MessageEnvelope`] stamped with
    /// the publishing service and the current time.
    async fn publish(&self, channel: &ChannelName, payload: JsonValue)
        -> Result<(), DomainError>;

    /// Publish a pre-built envelope (relays and tests).
    async fn publish_envelope(&self, envelope: MessageEnvelope) -> Result<(), DomainError>;

    /// Register a handler for one concrete channel.
    async fn subscribe(
        &self,
        channel: ChannelName,
        handler: Arc<dyn BusHandler>,
    ) -> Result<SubscriberToken, DomainError>;

    /// Register a handler for a glob pattern of channels.
    async fn subscribe_pattern(
        &self,
        pattern: ChannelPattern,
        handler: Arc<dyn BusHandler>,
    ) -> Result<SubscriberToken, DomainError>;

    /// Withdraw a registration. Unknown tokens are ignored.
    async fn unsubscribe(&self, token: SubscriberToken) -> Result<(), DomainError>;

    /// Run the dispatch loop until the shutdown signal flips to true.
    ///
    /// Reconnecting transports back off and reissue all live
    /// registrations here; in-process implementations simply wait for
    /// shutdown.
    async fn run(&self, shutdown: watch::Receiver<bool>);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time check that traits are object-safe
    #[allow(dead_code)]
    fn assert_handler_object_safe(_: &dyn BusHandler) {}

    #[allow(dead_code)]
    fn assert_bus_object_safe(_: &dyn MessageBus) {}

    #[test]
    fn subscriber_tokens_compare_by_value() {
        assert_eq!(SubscriberToken::new(7), SubscriberToken::new(7));
        assert_ne!(SubscriberToken::new(7), SubscriberToken::new(8));
    }
}
