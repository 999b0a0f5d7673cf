//! Redis bus adapter - pub/sub over a single reconnecting connection.
//!
//! One dispatch loop owns the pub/sub connection: it resolves direct
//! and pattern matches for every inbound frame and invokes the
//! registered handlers, isolating their failures. On connection loss it
//! backs off and reconnects, reissuing every live SUBSCRIBE/PSUBSCRIBE.
//! Publishes go through a separate auto-reconnecting connection and are
//! fire-and-forget with respect to subscribers.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::BusConfig;
use crate::domain::channel::{ChannelName, ChannelPattern};
use crate::domain::envelope::{MessageEnvelope, MessageMetadata};
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::{BusHandler, MessageBus, SubscriberToken};

struct Registration {
    route: ChannelPattern,
    handler: Arc<dyn BusHandler>,
}

/// Redis-backed implementation of the [`MessageBus`] port.
pub struct RedisBusAdapter {
    client: redis::Client,
    config: BusConfig,
    origin: String,
    registrations: RwLock<HashMap<SubscriberToken, Registration>>,
    next_token: AtomicU64,
    resync_tx: mpsc::UnboundedSender<()>,
    resync_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    publisher: Mutex<Option<ConnectionManager>>,
}

impl RedisBusAdapter {
    /// Creates an adapter for the configured redis instance.
    ///
    /// No connection is opened here; the dispatch loop and the first
    /// publish each establish their own.
    pub fn new(config: &BusConfig, origin: impl Into<String>) -> Result<Self, DomainError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            DomainError::new(ErrorCode::BusUnavailable, format!("invalid bus URL: {}", e))
        })?;
        let (resync_tx, resync_rx) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            config: config.clone(),
            origin: origin.into(),
            registrations: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            resync_tx,
            resync_rx: Mutex::new(Some(resync_rx)),
            publisher: Mutex::new(None),
        })
    }

    fn insert_registration(
        &self,
        route: ChannelPattern,
        handler: Arc<dyn BusHandler>,
    ) -> SubscriberToken {
        let token = SubscriberToken::new(self.next_token.fetch_add(1, Ordering::SeqCst));
        self.registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(token, Registration { route, handler });
        // Nudge the dispatch loop so the new route takes effect without
        // waiting for a reconnect.
        let _ = self.resync_tx.send(());
        token
    }

    fn desired_routes(&self) -> HashSet<ChannelPattern> {
        self.registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|r| r.route.clone())
            .collect()
    }

    async fn publisher(&self) -> Result<ConnectionManager, DomainError> {
        let mut guard = self.publisher.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| {
                DomainError::new(ErrorCode::BusUnavailable, format!("bus connect failed: {}", e))
            })?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Routes one inbound frame to every matching handler.
    async fn dispatch(&self, channel_str: &str, body: &str) {
        let channel = match ChannelName::new(channel_str) {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(channel = channel_str, error = %e, "dropping frame on invalid channel");
                return;
            }
        };

        let envelope: MessageEnvelope = match serde_json::from_str(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(channel = channel_str, error = %e, "dropping malformed payload");
                return;
            }
        };

        // Match on the frame's concrete channel; pattern deliveries
        // arrive with the pattern already resolved by redis, and our
        // matcher is stricter than the redis glob.
        let matching: Vec<(&'static str, Arc<dyn BusHandler>)> = {
            let registrations = self
                .registrations
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registrations
                .values()
                .filter(|r| r.route.matches(&channel))
                .map(|r| (r.handler.name(), Arc::clone(&r.handler)))
                .collect()
        };

        for (name, handler) in matching {
            if let Err(e) = handler.on_message(envelope.clone()).await {
                tracing::warn!(handler = name, channel = channel_str, error = %e, "bus handler failed");
            }
        }
    }

    /// Sleeps for the backoff period; returns true if shutdown was
    /// requested while waiting.
    async fn wait_backoff(shutdown: &mut watch::Receiver<bool>, backoff: Duration) -> bool {
        tokio::select! {
            _ = shutdown.changed() => *shutdown.borrow(),
            _ = tokio::time::sleep(backoff) => false,
        }
    }
}

/// Brings the pub/sub connection's subscriptions in line with the
/// registration table.
async fn sync_routes(
    pubsub: &mut redis::aio::PubSub,
    active: &mut HashSet<ChannelPattern>,
    desired: HashSet<ChannelPattern>,
) -> redis::RedisResult<()> {
    for stale in active.difference(&desired).cloned().collect::<Vec<_>>() {
        if stale.is_glob() {
            pubsub.punsubscribe(stale.as_str()).await?;
        } else {
            pubsub.unsubscribe(stale.as_str()).await?;
        }
        active.remove(&stale);
    }
    for fresh in desired.difference(active).cloned().collect::<Vec<_>>() {
        if fresh.is_glob() {
            pubsub.psubscribe(fresh.as_str()).await?;
        } else {
            pubsub.subscribe(fresh.as_str()).await?;
        }
        active.insert(fresh);
    }
    Ok(())
}

enum Step {
    Frame(String, String),
    Skip,
    Resync,
    Lost,
    Shutdown,
}

#[async_trait]
impl MessageBus for RedisBusAdapter {
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
        let body = serde_json::to_string(&envelope).map_err(|e| {
            DomainError::new(
                ErrorCode::SerializationFailed,
                format!("envelope serialization failed: {}", e),
            )
        })?;

        let mut conn = self.publisher().await?;
        let _: i64 = conn
            .publish(envelope.channel.as_str(), body)
            .await
            .map_err(|e| {
                DomainError::new(ErrorCode::BusUnavailable, format!("publish failed: {}", e))
            })?;
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
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&token);
        let _ = self.resync_tx.send(());
        Ok(())
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut resync_rx) = self.resync_rx.lock().await.take() else {
            tracing::error!("bus dispatch loop already running");
            return;
        };

        let mut backoff = self.config.reconnect_initial();

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }

            let conn = match self.client.get_async_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "bus connect failed, backing off");
                    if Self::wait_backoff(&mut shutdown, backoff).await {
                        break 'outer;
                    }
                    backoff = (backoff * 2).min(self.config.reconnect_max());
                    continue;
                }
            };

            let mut pubsub = conn.into_pubsub();
            let mut active = HashSet::new();
            if let Err(e) = sync_routes(&mut pubsub, &mut active, self.desired_routes()).await {
                tracing::warn!(error = %e, "bus subscribe failed, reconnecting");
                if Self::wait_backoff(&mut shutdown, backoff).await {
                    break 'outer;
                }
                backoff = (backoff * 2).min(self.config.reconnect_max());
                continue;
            }

            backoff = self.config.reconnect_initial();
            tracing::info!(routes = active.len(), "bus dispatch loop connected");

            loop {
                // The message stream borrows the pub/sub connection, so
                // it is scoped per step; route changes re-enter through
                // the resync nudge once the stream is dropped.
                let step = {
                    let mut stream = pubsub.on_message();
                    tokio::select! {
                        _ = shutdown.changed() => Step::Shutdown,
                        nudge = resync_rx.recv() => match nudge {
                            Some(()) => Step::Resync,
                            None => Step::Shutdown,
                        },
                        msg = stream.next() => match msg {
                            Some(msg) => {
                                let channel = msg.get_channel_name().to_string();
                                match msg.get_payload::<String>() {
                                    Ok(body) => Step::Frame(channel, body),
                                    Err(e) => {
                                        tracing::warn!(channel = %channel, error = %e, "dropping undecodable frame");
                                        Step::Skip
                                    }
                                }
                            }
                            None => Step::Lost,
                        },
                    }
                };

                match step {
                    Step::Frame(channel, body) => self.dispatch(&channel, &body).await,
                    Step::Skip => {}
                    Step::Resync => {
                        // Collapse queued nudges into one resync pass.
                        while resync_rx.try_recv().is_ok() {}
                        if let Err(e) =
                            sync_routes(&mut pubsub, &mut active, self.desired_routes()).await
                        {
                            tracing::warn!(error = %e, "bus resubscribe failed, reconnecting");
                            break;
                        }
                    }
                    Step::Lost => {
                        tracing::warn!("bus connection lost, reconnecting");
                        break;
                    }
                    Step::Shutdown => {
                        if *shutdown.borrow() {
                            break 'outer;
                        }
                    }
                }
            }

            if Self::wait_backoff(&mut shutdown, backoff).await {
                break 'outer;
            }
            backoff = (backoff * 2).min(self.config.reconnect_max());
        }

        tracing::info!("bus dispatch loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BusConfig {
        BusConfig {
            url: "redis://localhost:6379".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn adapter_rejects_invalid_url() {
        let config = BusConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(RedisBusAdapter::new(&config, "relay").is_err());
    }

    #[tokio::test]
    async fn registrations_track_subscribe_and_unsubscribe() {
        struct NoopHandler;

        #[async_trait]
        impl BusHandler for NoopHandler {
            async fn on_message(&self, _: MessageEnvelope) -> Result<(), DomainError> {
                Ok(())
            }
            fn name(&self) -> &'static str {
                "NoopHandler"
            }
        }

        let adapter = RedisBusAdapter::new(&test_config(), "relay").unwrap();

        let token = adapter
            .subscribe_pattern(
                ChannelPattern::new("events.*").unwrap(),
                Arc::new(NoopHandler),
            )
            .await
            .unwrap();
        assert_eq!(adapter.desired_routes().len(), 1);

        adapter.unsubscribe(token).await.unwrap();
        assert!(adapter.desired_routes().is_empty());
    }

    #[tokio::test]
    async fn dispatch_drops_malformed_payload() {
        // Invalid JSON must be logged and dropped, never panic.
        let adapter = RedisBusAdapter::new(&test_config(), "relay").unwrap();
        adapter.dispatch("events.billing.created", "{not json").await;
        adapter.dispatch("bad channel name", "{}").await;
    }
}
