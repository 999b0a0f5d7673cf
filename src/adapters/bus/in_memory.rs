//! In-memory bus implementation for testing.
//!
//! Provides synchronous, deterministic message delivery for unit and
//! integration tests.
//!
//! # Security Note
//!
//! This adapter is for **testing only** and should not be used in
//! production. It uses `.expect()` on lock operations which will panic
//! if locks are poisoned. Production code should use the redis bus
//! adapter.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

use crate::domain::channel::{ChannelName, ChannelPattern};
use crate::domain::envelope::{MessageEnvelope, MessageMetadata};
use crate::domain::foundation::DomainError;
use crate::ports::{BusHandler, MessageBus, SubscriberToken};

struct Registration {
    route: ChannelPattern,
    handler: Arc<dyn BusHandler>,
}

/// In-memory bus for testing.
///
/// Features:
/// - Synchronous delivery (deterministic for tests)
/// - Exact and glob-pattern routing through `ChannelPattern`
/// - Message capture for assertions
///
/// Handler errors are logged under the handler's name and isolated, so
/// one failing handler never affects the others; the capture helpers
/// let tests assert on what was published regardless.
pub struct InMemoryBus {
    registrations: RwLock<HashMap<SubscriberToken, Registration>>,
    published: RwLock<Vec<MessageEnvelope>>,
    next_token: AtomicU64,
    origin: String,
}

impl InMemoryBus {
    /// Creates a new empty bus stamping envelopes as `test-origin`.
    pub fn new() -> Self {
        Self::with_origin("test-origin")
    }

    /// Creates a bus stamping envelopes with the given origin service.
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            published: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
            origin: origin.into(),
        }
    }

    fn insert_registration(&self, route: ChannelPattern, handler: Arc<dyn BusHandler>) -> SubscriberToken {
        let token = SubscriberToken::new(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.registrations
            .write()
            .expect("InMemoryBus: registrations write lock poisoned")
            .insert(token, Registration { route, handler });
        token
    }

    // === Test Helpers ===

    /// Returns all published envelopes (for test assertions).
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn published_envelopes(&self) -> Vec<MessageEnvelope> {
        self.published
            .read()
            .expect("InMemoryBus: published lock poisoned")
            .clone()
    }

    /// Returns count of published messages.
    pub fn message_count(&self) -> usize {
        self.published
            .read()
            .expect("InMemoryBus: published lock poisoned")
            .len()
    }

    /// Checks if any message was published on the given channel.
    pub fn has_message(&self, channel: &str) -> bool {
        self.published
            .read()
            .expect("InMemoryBus: published lock poisoned")
            .iter()
            .any(|e| e.channel.as_str() == channel)
    }

    /// Clears all captured messages (for test isolation).
    pub fn clear(&self) {
        self.published
            .write()
            .expect("InMemoryBus: published write lock poisoned")
            .clear();
    }

    /// Returns count of live registrations.
    pub fn registration_count(&self) -> usize {
        self.registrations
            .read()
            .expect("InMemoryBus: registrations lock poisoned")
            .len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(
        &self,
        channel: &ChannelName,
        payload: JsonValue,
    ) -> Result<(), DomainError> {
        let envelope = MessageEnvelope::new(
            channel.clone(),
            payload,
            MessageMetadata::new(self.origin.clone()),
        );
        self.publish_envelope(envelope).await
    }

    async fn publish_envelope(&self, envelope: MessageEnvelope) -> Result<(), DomainError> {
        // Store for test assertions
        self.published
            .write()
            .expect("InMemoryBus: published write lock poisoned")
            .push(envelope.clone());

        // Clone matching handlers to release lock before await points
        let matching: Vec<(&'static str, Arc<dyn BusHandler>)> = {
            let registrations = self
                .registrations
                .read()
                .expect("InMemoryBus: registrations lock poisoned");
            registrations
                .values()
                .filter(|r| r.route.matches(&envelope.channel))
                .map(|r| (r.handler.name(), Arc::clone(&r.handler)))
                .collect()
        };

        // Invoke handlers (lock is released); errors are isolated
        for (name, handler) in matching {
            if let Err(e) = handler.on_message(envelope.clone()).await {
                tracing::warn!(handler = name, error = %e, "bus handler failed");
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        channel: ChannelName,
        handler: Arc<dyn BusHandler>,
    ) -> Result<SubscriberToken, DomainError> {
        Ok(self.insert_registration(channel.into(), handler))
    }

    async fn subscribe_pattern(
        &self,
        pattern: ChannelPattern,
        handler: Arc<dyn BusHandler>,
    ) -> Result<SubscriberToken, DomainError> {
        Ok(self.insert_registration(pattern, handler))
    }

    async fn unsubscribe(&self, token: SubscriberToken) -> Result<(), DomainError> {
        self.registrations
            .write()
            .expect("InMemoryBus: registrations write lock poisoned")
            .remove(&token);
        Ok(())
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        // No connection to tend; just wait for shutdown.
        while shutdown.changed().await.is_ok() {
            if *shutdown.borrow() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl BusHandler for CountingHandler {
        async fn on_message(&self, _: MessageEnvelope) -> Result<(), DomainError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &'static str {
            "CountingHandler"
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl BusHandler for FailingHandler {
        async fn on_message(&self, _: MessageEnvelope) -> Result<(), DomainError> {
            Err(DomainError::new(
                crate::domain::foundation::ErrorCode::InternalError,
                "handler failed",
            ))
        }
        fn name(&self) -> &'static str {
            "FailingHandler"
        }
    }

    fn channel(name: &str) -> ChannelName {
        ChannelName::new(name).unwrap()
    }

    #[tokio::test]
    async fn publish_stores_envelope() {
        let bus = InMemoryBus::new();

        bus.publish(&channel("events.billing.created"), json!({"id": 1}))
            .await
            .unwrap();

        assert_eq!(bus.message_count(), 1);
        assert!(bus.has_message("events.billing.created"));
    }

    #[tokio::test]
    async fn publish_stamps_origin_and_first_attempt() {
        let bus = InMemoryBus::with_origin("kpi-engine");

        bus.publish(&channel("kpi.calculated.mrr.1.2026-07"), json!({}))
            .await
            .unwrap();

        let published = bus.published_envelopes();
        assert_eq!(published[0].metadata.origin_service, "kpi-engine");
        assert_eq!(published[0].delivery_attempt, 1);
    }

    #[tokio::test]
    async fn exact_subscriber_receives_matching_message() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(channel("events.a"), Arc::new(CountingHandler(counter.clone())))
            .await
            .unwrap();

        bus.publish(&channel("events.a"), json!({})).await.unwrap();
        bus.publish(&channel("events.b"), json!({})).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pattern_subscriber_receives_matching_family() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe_pattern(
            ChannelPattern::new("responses.*").unwrap(),
            Arc::new(CountingHandler(counter.clone())),
        )
        .await
        .unwrap();

        bus.publish(&channel("responses.123"), json!({})).await.unwrap();
        bus.publish(&channel("responses.456"), json!({})).await.unwrap();
        bus.publish(&channel("commands.svc"), json!({})).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        bus.subscribe(channel("events.a"), Arc::new(FailingHandler))
            .await
            .unwrap();
        bus.subscribe(channel("events.a"), Arc::new(CountingHandler(counter.clone())))
            .await
            .unwrap();

        let result = bus.publish(&channel("events.a"), json!({})).await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let token = bus
            .subscribe(channel("events.a"), Arc::new(CountingHandler(counter.clone())))
            .await
            .unwrap();

        bus.publish(&channel("events.a"), json!({})).await.unwrap();
        bus.unsubscribe(token).await.unwrap();
        bus.publish(&channel("events.a"), json!({})).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.registration_count(), 0);
    }

    #[tokio::test]
    async fn clear_removes_captured_messages() {
        let bus = InMemoryBus::new();

        bus.publish(&channel("events.a"), json!({})).await.unwrap();
        bus.publish(&channel("events.b"), json!({})).await.unwrap();
        assert_eq!(bus.message_count(), 2);

        bus.clear();

        assert_eq!(bus.message_count(), 0);
    }

    #[tokio::test]
    async fn run_returns_on_shutdown_signal() {
        let bus = Arc::new(InMemoryBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let bus = bus.clone();
            async move { bus.run(shutdown_rx).await }
        });

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
