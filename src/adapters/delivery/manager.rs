//! Delivery manager - subscription registry and acknowledgement surface.
//!
//! Owns every subscription: registers its pattern on the bus, spawns its
//! three workers (queue processor, ack-timeout watchdog, heartbeat), and
//! exposes the administrative operations the platform's HTTP layer
//! consumes: create, cancel, acknowledge, inspect.
//!
//! Each subscription has a private FIFO queue, so one slow or failing
//! consumer never stalls another's timeline.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::DeliveryConfig;
use crate::domain::channel::ChannelPattern;
use crate::domain::envelope::MessageEnvelope;
use crate::domain::foundation::{DomainError, ErrorCode, MessageId, SubscriptionId, Timestamp};
use crate::domain::subscription::{Subscription, SubscriptionStatus};
use crate::ports::{BusHandler, DeliveryTarget, DeliveryTransport, MessageBus, SubscriberToken};

use super::worker::{run_heartbeat, run_queue_worker, run_watchdog, SharedSubscription};

/// Parameters for registering a new subscription.
///
/// Defaults match the platform contract: three delivery attempts, a
/// 30 second acknowledgement timeout, single-message batches, manual
/// acknowledgement.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub channel_pattern: ChannelPattern,
    pub owner_service: String,
    pub delivery_target: DeliveryTarget,
    pub max_delivery_attempts: u32,
    pub ack_timeout: Duration,
    pub batch_size: usize,
    pub auto_ack: bool,
}

impl CreateSubscriptionRequest {
    pub fn new(channel_pattern: ChannelPattern, owner_service: impl Into<String>) -> Self {
        Self {
            channel_pattern,
            owner_service: owner_service.into(),
            delivery_target: DeliveryTarget::None,
            max_delivery_attempts: 3,
            ack_timeout: Duration::from_secs(30),
            batch_size: 1,
            auto_ack: false,
        }
    }

    /// Deliver via webhook POST to the given URL.
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.delivery_target = DeliveryTarget::Webhook(url.into());
        self
    }

    /// Deliver to an in-process consumer.
    pub fn with_callback(mut self, handler: Arc<dyn BusHandler>) -> Self {
        self.delivery_target = DeliveryTarget::Callback(handler);
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }
}

/// Read-only projection of one subscription for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub subscription_id: SubscriptionId,
    pub channel_pattern: String,
    pub owner_service: String,
    pub delivery_target: Option<String>,
    pub status: SubscriptionStatus,
    pub auto_ack: bool,
    pub max_delivery_attempts: u32,
    pub ack_timeout_secs: u64,
    pub batch_size: usize,
    pub created_at: Timestamp,
    pub last_heartbeat: Timestamp,
    pub pending_count: usize,
    pub delivered_count: u64,
    pub dead_letter_count: u64,
}

fn info_from(sub: &Subscription, target: &DeliveryTarget) -> SubscriptionInfo {
    SubscriptionInfo {
        subscription_id: sub.subscription_id,
        channel_pattern: sub.channel_pattern.as_str().to_string(),
        owner_service: sub.owner_service.clone(),
        delivery_target: target.describe(),
        status: sub.status,
        auto_ack: sub.auto_ack,
        max_delivery_attempts: sub.max_delivery_attempts,
        ack_timeout_secs: sub.ack_timeout.as_secs(),
        batch_size: sub.batch_size,
        created_at: sub.created_at,
        last_heartbeat: sub.last_heartbeat,
        pending_count: sub.pending_count(),
        delivered_count: sub.delivered_count(),
        dead_letter_count: sub.dead_letter_count(),
    }
}

struct SubscriptionHandle {
    state: SharedSubscription,
    target: DeliveryTarget,
    bus_token: SubscriberToken,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Bus handler that feeds one subscription's private queue.
///
/// Every ACTIVE subscription whose pattern matches a published channel
/// gets exactly one enqueued delivery attempt through its own router.
struct SubscriptionRouter {
    state: SharedSubscription,
    queue_tx: mpsc::UnboundedSender<MessageEnvelope>,
}

#[async_trait]
impl BusHandler for SubscriptionRouter {
    async fn on_message(&self, envelope: MessageEnvelope) -> Result<(), DomainError> {
        let max_attempts = {
            let sub = self.state.lock().await;
            if !sub.is_active() {
                return Ok(());
            }
            sub.max_delivery_attempts
        };

        self.queue_tx
            .send(envelope.for_subscription(max_attempts))
            .map_err(|_| DomainError::new(ErrorCode::QueueClosed, "delivery queue closed"))
    }

    fn name(&self) -> &'static str {
        "SubscriptionRouter"
    }
}

/// Registry and lifecycle owner for delivery subscriptions.
pub struct DeliveryManager {
    bus: Arc<dyn MessageBus>,
    transport: Arc<dyn DeliveryTransport>,
    config: DeliveryConfig,
    subscriptions: RwLock<HashMap<SubscriptionId, SubscriptionHandle>>,
}

impl DeliveryManager {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        transport: Arc<dyn DeliveryTransport>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            bus,
            transport,
            config,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a subscription, subscribes its pattern on the bus, and
    /// starts its delivery workers.
    pub async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<SubscriptionInfo, DomainError> {
        if request.max_delivery_attempts == 0 {
            return Err(DomainError::validation(
                "max_delivery_attempts",
                "must be at least 1",
            ));
        }

        let subscription_id = SubscriptionId::new();
        let state: SharedSubscription = Arc::new(Mutex::new(Subscription::new(
            subscription_id,
            request.channel_pattern.clone(),
            request.owner_service,
            request.max_delivery_attempts,
            request.ack_timeout,
            request.batch_size,
            request.auto_ack,
        )));

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let router = Arc::new(SubscriptionRouter {
            state: state.clone(),
            queue_tx: queue_tx.clone(),
        });
        let bus_token = self
            .bus
            .subscribe_pattern(request.channel_pattern.clone(), router)
            .await?;

        let tasks = vec![
            tokio::spawn(run_queue_worker(
                state.clone(),
                queue_rx,
                request.delivery_target.clone(),
                self.transport.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_watchdog(
                state.clone(),
                queue_tx,
                self.config.watchdog_interval(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(run_heartbeat(
                state.clone(),
                self.config.heartbeat_interval(),
                shutdown_rx,
            )),
        ];

        let info = info_from(&*state.lock().await, &request.delivery_target);

        self.subscriptions.write().await.insert(
            subscription_id,
            SubscriptionHandle {
                state,
                target: request.delivery_target,
                bus_token,
                shutdown_tx,
                tasks,
            },
        );

        tracing::info!(
            subscription_id = %subscription_id,
            pattern = %request.channel_pattern,
            "subscription created"
        );
        Ok(info)
    }

    /// Cancels a subscription: unsubscribes from the bus, drains the
    /// queue, and stops the workers. Idempotent.
    pub async fn cancel_subscription(&self, id: SubscriptionId) -> Result<(), DomainError> {
        let Some(handle) = self.subscriptions.write().await.remove(&id) else {
            return Ok(());
        };

        {
            let mut sub = handle.state.lock().await;
            sub.cancel();
            sub.clear_pending();
        }

        if let Err(e) = self.bus.unsubscribe(handle.bus_token).await {
            tracing::warn!(subscription_id = %id, error = %e, "bus unsubscribe failed");
        }

        let _ = handle.shutdown_tx.send(true);
        for task in handle.tasks {
            let _ = task.await;
        }

        tracing::info!(subscription_id = %id, "subscription cancelled");
        Ok(())
    }

    /// Settles a pending message, from a manual-ack consumer or the
    /// internal dead-letter path. Idempotent per message.
    pub async fn acknowledge_message(
        &self,
        subscription_id: SubscriptionId,
        message_id: MessageId,
        success: bool,
        error: Option<String>,
    ) -> Result<(), DomainError> {
        let state = {
            let subscriptions = self.subscriptions.read().await;
            let handle = subscriptions.get(&subscription_id).ok_or_else(|| {
                DomainError::new(ErrorCode::SubscriptionNotFound, "unknown subscription")
                    .with_detail("subscription_id", subscription_id.to_string())
            })?;
            handle.state.clone()
        };

        let settled = state.lock().await.acknowledge(&message_id, success);
        match settled {
            Some(_) if success => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    message_id = %message_id,
                    "message acknowledged"
                );
            }
            Some(_) => {
                tracing::warn!(
                    subscription_id = %subscription_id,
                    message_id = %message_id,
                    error = error.as_deref().unwrap_or("unspecified"),
                    "message settled as failed"
                );
            }
            None => {
                tracing::debug!(
                    subscription_id = %subscription_id,
                    message_id = %message_id,
                    "acknowledgement for already-settled message ignored"
                );
            }
        }
        Ok(())
    }

    /// Read-only projection of one subscription.
    pub async fn get_subscription_info(
        &self,
        id: SubscriptionId,
    ) -> Result<SubscriptionInfo, DomainError> {
        let (state, target) = {
            let subscriptions = self.subscriptions.read().await;
            let handle = subscriptions.get(&id).ok_or_else(|| {
                DomainError::new(ErrorCode::SubscriptionNotFound, "unknown subscription")
                    .with_detail("subscription_id", id.to_string())
            })?;
            (handle.state.clone(), handle.target.clone())
        };

        let sub = state.lock().await;
        Ok(info_from(&sub, &target))
    }

    /// Read-only projections of every registered subscription.
    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let handles: Vec<(SharedSubscription, DeliveryTarget)> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .values()
                .map(|h| (h.state.clone(), h.target.clone()))
                .collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for (state, target) in handles {
            let sub = state.lock().await;
            infos.push(info_from(&sub, &target));
        }
        infos
    }

    /// Cancels every subscription; used on service shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<SubscriptionId> = self.subscriptions.read().await.keys().copied().collect();
        for id in ids {
            let _ = self.cancel_subscription(id).await;
        }
    }
}
