//! Relay service - explicit lifecycle root.
//!
//! Wires the bus adapter, delivery manager, and connection hub into one
//! explicitly constructed, explicitly started and stopped service. No
//! ambient globals: dependents receive the service (or the components
//! it exposes) by injection.
//!
//! `start()` spawns the bus dispatch loop and the hub's heartbeat and
//! idle-cleanup loops, and bridges bus events into the hub. `stop()`
//! flips the shutdown signal, cancels every delivery subscription, and
//! joins the background tasks; in-flight work finishes cooperatively.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::adapters::delivery::{CreateSubscriptionRequest, DeliveryManager, SubscriptionInfo, WebhookTransport};
use crate::adapters::hub::{ConnectionHub, HubStats, ServerMessage};
use crate::config::AppConfig;
use crate::domain::channel::{ChannelName, ChannelPattern};
use crate::domain::envelope::MessageEnvelope;
use crate::domain::foundation::{DomainError, MessageId, SubscriptionId};
use crate::ports::{BusHandler, MessageBus, SubscriberToken};

/// Channel families fanned out to live hub connections.
///
/// Dashboards and interactive clients subscribe to concrete channels in
/// these families; everything else on the bus stays webhook-only.
pub const BRIDGED_CHANNEL_FAMILIES: &[&str] = &["events.*", "kpi.*", "responses.*"];

/// Bridge between the bus and the connection hub.
///
/// Receives bus messages on the bridged families and broadcasts them to
/// every live connection subscribed to the matching channel.
struct HubEventBridge {
    hub: Arc<ConnectionHub>,
}

#[async_trait]
impl BusHandler for HubEventBridge {
    async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), DomainError> {
        let channel = envelope.channel.clone();
        self.hub
            .broadcast_to_channel(&channel, ServerMessage::event(&envelope))
            .await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HubEventBridge"
    }
}

/// The real-time relay: bus adapter + delivery manager + connection hub
/// behind one lifecycle.
pub struct RelayService {
    bus: Arc<dyn MessageBus>,
    delivery: Arc<DeliveryManager>,
    hub: Arc<ConnectionHub>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    bridge_tokens: Mutex<Vec<SubscriberToken>>,
    started: AtomicBool,
}

impl RelayService {
    /// Builds the service from configuration and an injected bus.
    pub fn new(config: &AppConfig, bus: Arc<dyn MessageBus>) -> Result<Self, DomainError> {
        let transport = Arc::new(WebhookTransport::new(config.delivery.webhook_timeout())?);
        let delivery = Arc::new(DeliveryManager::new(
            bus.clone(),
            transport,
            config.delivery.clone(),
        ));
        let hub = Arc::new(ConnectionHub::new(config.hub.clone()));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            bus,
            delivery,
            hub,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            bridge_tokens: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Spawns the dispatch and hub loops and bridges bus events to the
    /// hub. Calling `start` twice is a no-op.
    pub async fn start(&self) -> Result<(), DomainError> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("relay service already started");
            return Ok(());
        }

        {
            let mut tasks = self.tasks.lock().await;

            let bus = self.bus.clone();
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { bus.run(shutdown).await }));

            let hub = self.hub.clone();
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { hub.run_heartbeat(shutdown).await }));

            let hub = self.hub.clone();
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { hub.run_idle_cleanup(shutdown).await }));
        }

        let bridge = Arc::new(HubEventBridge { hub: self.hub.clone() });
        let mut tokens = self.bridge_tokens.lock().await;
        for family in BRIDGED_CHANNEL_FAMILIES {
            let pattern = ChannelPattern::new(*family).map_err(DomainError::from)?;
            tokens.push(self.bus.subscribe_pattern(pattern, bridge.clone()).await?);
        }

        tracing::info!("relay service started");
        Ok(())
    }

    /// Stops the service: cancels subscriptions, withdraws the hub
    /// bridge, and joins every background task.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.delivery.shutdown().await;

        for token in self.bridge_tokens.lock().await.drain(..) {
            let _ = self.bus.unsubscribe(token).await;
        }

        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.lock().await.drain(..) {
            let _ = task.await;
        }

        tracing::info!("relay service stopped");
    }

    // === Administrative surface (consumed by the HTTP layer) ===

    /// Publishes a payload, fire-and-forget. Returns whether the write
    /// reached the bus; failures are logged, never raised.
    pub async fn publish(&self, channel: &str, payload: JsonValue) -> bool {
        let channel = match ChannelName::new(channel) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(error = %e, "publish rejected: invalid channel");
                return false;
            }
        };

        match self.bus.publish(&channel, payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "publish failed");
                false
            }
        }
    }

    pub async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<SubscriptionInfo, DomainError> {
        self.delivery.create_subscription(request).await
    }

    pub async fn cancel_subscription(&self, id: SubscriptionId) -> Result<(), DomainError> {
        self.delivery.cancel_subscription(id).await
    }

    pub async fn acknowledge_message(
        &self,
        subscription_id: SubscriptionId,
        message_id: MessageId,
        success: bool,
        error: Option<String>,
    ) -> Result<(), DomainError> {
        self.delivery
            .acknowledge_message(subscription_id, message_id, success, error)
            .await
    }

    pub async fn get_subscription_info(
        &self,
        id: SubscriptionId,
    ) -> Result<SubscriptionInfo, DomainError> {
        self.delivery.get_subscription_info(id).await
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.delivery.list_subscriptions().await
    }

    pub async fn get_stats(&self) -> HubStats {
        self.hub.get_stats().await
    }

    // === Component access for embedding ===

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn delivery(&self) -> &Arc<DeliveryManager> {
        &self.delivery
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::bus::InMemoryBus;
    use crate::adapters::hub::ClientInfo;
    use crate::ports::ClientSink;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    struct RecordingSink {
        frames: AsyncMutex<Vec<JsonValue>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { frames: AsyncMutex::new(Vec::new()) })
        }

        async fn frames(&self) -> Vec<JsonValue> {
            self.frames.lock().await.clone()
        }
    }

    #[async_trait]
    impl ClientSink for RecordingSink {
        async fn send(&self, frame: JsonValue) -> Result<(), DomainError> {
            self.frames.lock().await.push(frame);
            Ok(())
        }
    }

    fn service() -> (RelayService, Arc<InMemoryBus>) {
        let bus = Arc::new(InMemoryBus::new());
        let service = RelayService::new(&AppConfig::test_fixture(), bus.clone()).unwrap();
        (service, bus)
    }

    async fn wait_until_async<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn publish_returns_true_on_success_and_false_on_bad_channel() {
        let (service, bus) = service();

        assert!(service.publish("events.billing.created", json!({"id": 1})).await);
        assert!(!service.publish("events.*", json!({})).await);
        assert_eq!(bus.message_count(), 1);
    }

    #[tokio::test]
    async fn started_service_bridges_events_to_hub_subscribers() {
        let (service, _bus) = service();
        service.start().await.unwrap();

        let sink = RecordingSink::new();
        let connection_id = service.hub().connect(sink.clone(), ClientInfo::default()).await;
        service
            .hub()
            .subscribe(connection_id, ChannelName::new("kpi.calculated.mrr.42.2026-07").unwrap())
            .await
            .unwrap();

        service
            .publish("kpi.calculated.mrr.42.2026-07", json!({"value": 11.5}))
            .await;

        {
            let sink = sink.clone();
            wait_until_async(|| {
                let sink = sink.clone();
                async move {
                    sink.frames()
                        .await
                        .iter()
                        .any(|f| f["type"] == "event" && f["payload"]["value"] == json!(11.5))
                }
            })
            .await;
        }

        service.stop().await;
    }

    #[tokio::test]
    async fn bridge_ignores_unrelated_channel_families() {
        let (service, _bus) = service();
        service.start().await.unwrap();

        let sink = RecordingSink::new();
        let connection_id = service.hub().connect(sink.clone(), ClientInfo::default()).await;
        service
            .hub()
            .subscribe(connection_id, ChannelName::new("commands.recalculate").unwrap())
            .await
            .unwrap();

        service.publish("commands.recalculate", json!({})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the greeting: commands.* is not a bridged family.
        assert_eq!(sink.frames().await.len(), 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_delivery_subscriptions() {
        let (service, bus) = service();
        service.start().await.unwrap();

        service
            .create_subscription(CreateSubscriptionRequest::new(
                ChannelPattern::new("events.*").unwrap(),
                "reporting-service",
            ))
            .await
            .unwrap();
        assert_eq!(service.list_subscriptions().await.len(), 1);

        service.stop().await;

        assert!(service.list_subscriptions().await.is_empty());
        // Bridge registrations were withdrawn too.
        assert_eq!(bus.registration_count(), 0);
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let (service, _bus) = service();

        service.start().await.unwrap();
        service.start().await.unwrap();

        service.stop().await;
    }
}
