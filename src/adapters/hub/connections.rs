//! Connection hub - fan-out to live client connections.
//!
//! Tracks every connected client and a reverse index from channel to
//! subscriber ids:
//!
//! ```text
//! connections: id -> {sink, subscriptions, last_activity, ...}
//! channels:    channel -> {id, id, ...}
//! ```
//!
//! Both maps live behind one mutex and are only mutated inside the same
//! critical section, which keeps them mirror images of each other and
//! makes `broadcast_to_channel` proportional to subscriber count rather
//! than total connection count. Sends happen outside the lock; a failed
//! send disconnects that client after the broadcast completes, so one
//! broken connection never blocks delivery to healthy ones.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::config::HubConfig;
use crate::domain::channel::ChannelName;
use crate::domain::foundation::{ConnectionId, DomainError, ErrorCode, Timestamp};
use crate::ports::ClientSink;

use super::messages::ServerMessage;

/// Free-form description of the connecting client, for observability.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub remote_addr: Option<String>,
}

struct ConnectionEntry {
    sink: Arc<dyn ClientSink>,
    #[allow(dead_code)]
    info: ClientInfo,
    subscriptions: HashSet<ChannelName>,
    connected_at: Timestamp,
    last_activity: Timestamp,
    message_count: u64,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<ChannelName, HashSet<ConnectionId>>,
    messages_sent: u64,
}

/// Connection and subscriber counts for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub channels: usize,
    pub subscriptions: usize,
    pub messages_sent: u64,
}

/// Manages live client connections and fans events out to them.
pub struct ConnectionHub {
    state: Mutex<HubState>,
    config: HubConfig,
}

impl ConnectionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            config,
        }
    }

    /// Registers a connection with an empty subscription set and greets
    /// the client.
    pub async fn connect(&self, sink: Arc<dyn ClientSink>, info: ClientInfo) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let now = Timestamp::now();

        self.state.lock().await.connections.insert(
            connection_id,
            ConnectionEntry {
                sink: sink.clone(),
                info,
                subscriptions: HashSet::new(),
                connected_at: now,
                last_activity: now,
                message_count: 0,
            },
        );

        tracing::debug!(connection_id = %connection_id, "client connected");

        let greeting = ServerMessage::connection_established(connection_id).to_frame();
        if let Err(e) = sink.send(greeting).await {
            tracing::debug!(connection_id = %connection_id, error = %e, "greeting failed, dropping connection");
            self.disconnect(connection_id).await;
        }

        connection_id
    }

    /// Removes a connection and prunes it from every channel's
    /// subscriber set. Idempotent.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.connections.remove(&connection_id) else {
            return false;
        };

        for channel in &entry.subscriptions {
            if let Some(subscribers) = state.channels.get_mut(channel) {
                subscribers.remove(&connection_id);
                if subscribers.is_empty() {
                    state.channels.remove(channel);
                }
            }
        }

        tracing::debug!(connection_id = %connection_id, "client disconnected");
        true
    }

    /// Subscribes a connection to one channel.
    ///
    /// The connection's set and the reverse index are updated in the
    /// same critical section.
    pub async fn subscribe(
        &self,
        connection_id: ConnectionId,
        channel: ChannelName,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let entry = state.connections.get_mut(&connection_id).ok_or_else(|| {
            DomainError::new(ErrorCode::ConnectionNotFound, "unknown connection")
                .with_detail("connection_id", connection_id.to_string())
        })?;

        entry.last_activity = Timestamp::now();
        entry.subscriptions.insert(channel.clone());
        state.channels.entry(channel).or_default().insert(connection_id);
        Ok(())
    }

    /// Subscribes a connection to several channels in one critical
    /// section.
    pub async fn subscribe_many(
        &self,
        connection_id: ConnectionId,
        channels: Vec<ChannelName>,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let entry = state.connections.get_mut(&connection_id).ok_or_else(|| {
            DomainError::new(ErrorCode::ConnectionNotFound, "unknown connection")
                .with_detail("connection_id", connection_id.to_string())
        })?;

        entry.last_activity = Timestamp::now();
        for channel in &channels {
            entry.subscriptions.insert(channel.clone());
        }
        for channel in channels {
            state.channels.entry(channel).or_default().insert(connection_id);
        }
        Ok(())
    }

    /// Unsubscribes a connection from one channel.
    pub async fn unsubscribe(
        &self,
        connection_id: ConnectionId,
        channel: &ChannelName,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().await;
        let entry = state.connections.get_mut(&connection_id).ok_or_else(|| {
            DomainError::new(ErrorCode::ConnectionNotFound, "unknown connection")
                .with_detail("connection_id", connection_id.to_string())
        })?;

        entry.last_activity = Timestamp::now();
        entry.subscriptions.remove(channel);
        if let Some(subscribers) = state.channels.get_mut(channel) {
            subscribers.remove(&connection_id);
            if subscribers.is_empty() {
                state.channels.remove(channel);
            }
        }
        Ok(())
    }

    /// Sends a frame to every connection subscribed to `channel`.
    ///
    /// Failed sends are collected and those connections disconnected
    /// after the broadcast completes. Returns the delivered count.
    pub async fn broadcast_to_channel(
        &self,
        channel: &ChannelName,
        message: ServerMessage,
    ) -> usize {
        let recipients: Vec<(ConnectionId, Arc<dyn ClientSink>)> = {
            let state = self.state.lock().await;
            let Some(subscribers) = state.channels.get(channel) else {
                return 0;
            };
            subscribers
                .iter()
                .filter_map(|id| state.connections.get(id).map(|e| (*id, e.sink.clone())))
                .collect()
        };

        let frame = message.to_frame();
        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (connection_id, sink) in recipients {
            match sink.send(frame.clone()).await {
                Ok(()) => delivered.push(connection_id),
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "broadcast send failed");
                    failed.push(connection_id);
                }
            }
        }

        {
            let mut state = self.state.lock().await;
            state.messages_sent += delivered.len() as u64;
            for connection_id in &delivered {
                if let Some(entry) = state.connections.get_mut(connection_id) {
                    entry.message_count += 1;
                }
            }
        }

        for connection_id in &failed {
            self.disconnect(*connection_id).await;
        }

        delivered.len()
    }

    /// Sends a frame to one connection, disconnecting it on failure.
    pub async fn send_to(
        &self,
        connection_id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), DomainError> {
        let sink = {
            let state = self.state.lock().await;
            state
                .connections
                .get(&connection_id)
                .map(|e| e.sink.clone())
                .ok_or_else(|| {
                    DomainError::new(ErrorCode::ConnectionNotFound, "unknown connection")
                })?
        };

        if let Err(e) = sink.send(message.to_frame()).await {
            self.disconnect(connection_id).await;
            return Err(
                DomainError::new(ErrorCode::ConnectionClosed, "client send failed")
                    .with_detail("cause", e.to_string()),
            );
        }

        let mut state = self.state.lock().await;
        state.messages_sent += 1;
        if let Some(entry) = state.connections.get_mut(&connection_id) {
            entry.message_count += 1;
        }
        Ok(())
    }

    /// Marks a connection as active; every inbound client frame counts.
    pub async fn touch(&self, connection_id: ConnectionId) {
        if let Some(entry) = self.state.lock().await.connections.get_mut(&connection_id) {
            entry.last_activity = Timestamp::now();
        }
    }

    /// Connection, channel, and subscriber counts for observability.
    pub async fn get_stats(&self) -> HubStats {
        let state = self.state.lock().await;
        HubStats {
            connections: state.connections.len(),
            channels: state.channels.len(),
            subscriptions: state.channels.values().map(|s| s.len()).sum(),
            messages_sent: state.messages_sent,
        }
    }

    /// How long a connection has been registered; None if unknown.
    pub async fn connection_age(&self, connection_id: ConnectionId) -> Option<std::time::Duration> {
        let state = self.state.lock().await;
        state
            .connections
            .get(&connection_id)
            .map(|e| e.connected_at.elapsed())
    }

    /// Periodic liveness ping to all connections.
    pub async fn run_heartbeat(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let sinks: Vec<(ConnectionId, Arc<dyn ClientSink>)> = {
                        let state = self.state.lock().await;
                        state
                            .connections
                            .iter()
                            .map(|(id, e)| (*id, e.sink.clone()))
                            .collect()
                    };

                    let frame = ServerMessage::heartbeat().to_frame();
                    for (connection_id, sink) in sinks {
                        if sink.send(frame.clone()).await.is_err() {
                            tracing::debug!(connection_id = %connection_id, "heartbeat failed, dropping connection");
                            self.disconnect(connection_id).await;
                        }
                    }
                }
            }
        }
    }

    /// Periodically evicts connections idle past the configured
    /// timeout, reclaiming their subscriptions.
    pub async fn run_idle_cleanup(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval());
        let idle_timeout = self.config.idle_timeout();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let idle: Vec<ConnectionId> = {
                        let state = self.state.lock().await;
                        state
                            .connections
                            .iter()
                            .filter(|(_, e)| e.last_activity.elapsed() > idle_timeout)
                            .map(|(id, _)| *id)
                            .collect()
                    };

                    for connection_id in idle {
                        tracing::info!(connection_id = %connection_id, "evicting idle connection");
                        self.disconnect(connection_id).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
impl ConnectionHub {
    /// Backdates a connection's activity so idle eviction can be tested
    /// without sleeping.
    pub async fn backdate_activity(&self, connection_id: ConnectionId, secs: u64) {
        if let Some(entry) = self.state.lock().await.connections.get_mut(&connection_id) {
            entry.last_activity = entry.last_activity.minus_secs(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::time::Duration;

    /// Sink that records every frame it is asked to send.
    struct RecordingSink {
        frames: Mutex<Vec<JsonValue>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { frames: Mutex::new(Vec::new()) })
        }

        async fn frames(&self) -> Vec<JsonValue> {
            self.frames.lock().await.clone()
        }

        async fn frame_types(&self) -> Vec<String> {
            self.frames()
                .await
                .iter()
                .map(|f| f["type"].as_str().unwrap_or("?").to_string())
                .collect()
        }
    }

    #[async_trait]
    impl ClientSink for RecordingSink {
        async fn send(&self, frame: JsonValue) -> Result<(), DomainError> {
            self.frames.lock().await.push(frame);
            Ok(())
        }
    }

    /// Sink whose client has gone away.
    struct FailingSink;

    #[async_trait]
    impl ClientSink for FailingSink {
        async fn send(&self, _frame: JsonValue) -> Result<(), DomainError> {
            Err(DomainError::new(ErrorCode::ConnectionClosed, "gone"))
        }
    }

    /// Sink that accepts the greeting, then fails every later send.
    struct BreaksAfterGreeting {
        sends: std::sync::atomic::AtomicUsize,
    }

    impl BreaksAfterGreeting {
        fn new() -> Arc<Self> {
            Arc::new(Self { sends: std::sync::atomic::AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl ClientSink for BreaksAfterGreeting {
        async fn send(&self, _frame: JsonValue) -> Result<(), DomainError> {
            let call = self.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                Ok(())
            } else {
                Err(DomainError::new(ErrorCode::ConnectionClosed, "gone"))
            }
        }
    }

    fn hub() -> ConnectionHub {
        ConnectionHub::new(HubConfig::default())
    }

    fn channel(s: &str) -> ChannelName {
        ChannelName::new(s).unwrap()
    }

    #[tokio::test]
    async fn connect_greets_client_and_registers() {
        let hub = hub();
        let sink = RecordingSink::new();

        let id = hub.connect(sink.clone(), ClientInfo::default()).await;

        assert_eq!(hub.get_stats().await.connections, 1);
        assert!(hub.connection_age(id).await.is_some());
        assert_eq!(sink.frame_types().await, vec!["connection_established"]);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_subscribers() {
        let hub = hub();
        let subscribed = RecordingSink::new();
        let other = RecordingSink::new();

        let id1 = hub.connect(subscribed.clone(), ClientInfo::default()).await;
        let _id2 = hub.connect(other.clone(), ClientInfo::default()).await;
        hub.subscribe(id1, channel("kpi.calculated.mrr.42.2026-07")).await.unwrap();

        let delivered = hub
            .broadcast_to_channel(
                &channel("kpi.calculated.mrr.42.2026-07"),
                ServerMessage::heartbeat(),
            )
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(subscribed.frames().await.len(), 2); // greeting + broadcast
        assert_eq!(other.frames().await.len(), 1); // greeting only
    }

    #[tokio::test]
    async fn broadcast_with_failing_connection_delivers_to_the_rest() {
        let hub = hub();
        let healthy1 = RecordingSink::new();
        let healthy2 = RecordingSink::new();

        let id1 = hub.connect(healthy1.clone(), ClientInfo::default()).await;
        let id2 = hub.connect(healthy2.clone(), ClientInfo::default()).await;
        let broken = hub
            .connect(BreaksAfterGreeting::new(), ClientInfo::default())
            .await;
        hub.subscribe(id1, channel("events.a")).await.unwrap();
        hub.subscribe(id2, channel("events.a")).await.unwrap();
        hub.subscribe(broken, channel("events.a")).await.unwrap();

        let delivered = hub
            .broadcast_to_channel(&channel("events.a"), ServerMessage::heartbeat())
            .await;

        assert_eq!(delivered, 2);
        // The failing connection was pruned after the broadcast.
        let stats = hub.get_stats().await;
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.subscriptions, 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_broadcasts() {
        let hub = hub();
        let sink = RecordingSink::new();

        let id = hub.connect(sink.clone(), ClientInfo::default()).await;
        hub.subscribe(id, channel("events.a")).await.unwrap();
        hub.unsubscribe(id, &channel("events.a")).await.unwrap();

        let delivered = hub
            .broadcast_to_channel(&channel("events.a"), ServerMessage::heartbeat())
            .await;

        assert_eq!(delivered, 0);
        // Empty channel entries are pruned.
        assert_eq!(hub.get_stats().await.channels, 0);
    }

    #[tokio::test]
    async fn subscribe_many_applies_all_channels_at_once() {
        let hub = hub();
        let sink = RecordingSink::new();

        let id = hub.connect(sink, ClientInfo::default()).await;
        hub.subscribe_many(id, vec![channel("events.a"), channel("events.b")])
            .await
            .unwrap();

        let stats = hub.get_stats().await;
        assert_eq!(stats.channels, 2);
        assert_eq!(stats.subscriptions, 2);
    }

    #[tokio::test]
    async fn disconnect_prunes_reverse_index() {
        let hub = hub();
        let sink = RecordingSink::new();

        let id = hub.connect(sink, ClientInfo::default()).await;
        hub.subscribe(id, channel("events.a")).await.unwrap();
        hub.subscribe(id, channel("events.b")).await.unwrap();

        assert!(hub.disconnect(id).await);
        assert!(!hub.disconnect(id).await);

        let stats = hub.get_stats().await;
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.channels, 0);
        assert_eq!(stats.subscriptions, 0);
    }

    #[tokio::test]
    async fn subscribe_on_unknown_connection_errors() {
        let hub = hub();
        let result = hub.subscribe(ConnectionId::new(), channel("events.a")).await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionNotFound);
    }

    #[tokio::test]
    async fn send_to_failing_connection_disconnects_it() {
        let hub = hub();
        // FailingSink rejects the greeting, so connect already pruned it.
        let id = hub.connect(Arc::new(FailingSink), ClientInfo::default()).await;

        assert_eq!(hub.get_stats().await.connections, 0);
        assert!(hub.send_to(id, ServerMessage::pong()).await.is_err());
    }

    #[tokio::test]
    async fn idle_cleanup_evicts_stale_connections() {
        let config = HubConfig {
            cleanup_interval_secs: 1,
            idle_timeout_secs: 30,
            ..Default::default()
        };
        let hub = Arc::new(ConnectionHub::new(config));
        let stale_sink = RecordingSink::new();
        let fresh_sink = RecordingSink::new();

        let stale = hub.connect(stale_sink, ClientInfo::default()).await;
        let fresh = hub.connect(fresh_sink, ClientInfo::default()).await;
        hub.subscribe(stale, channel("events.a")).await.unwrap();
        hub.subscribe(fresh, channel("events.a")).await.unwrap();

        hub.backdate_activity(stale, 60).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleaner = tokio::spawn({
            let hub = hub.clone();
            async move { hub.run_idle_cleanup(shutdown_rx).await }
        });

        // First tick fires immediately.
        for _ in 0..100 {
            if hub.get_stats().await.connections == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = hub.get_stats().await;
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.subscriptions, 1);

        shutdown_tx.send(true).unwrap();
        cleaner.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_loop_pings_connections() {
        let config = HubConfig {
            heartbeat_interval_secs: 1,
            ..Default::default()
        };
        let hub = Arc::new(ConnectionHub::new(config));
        let sink = RecordingSink::new();
        let _id = hub.connect(sink.clone(), ClientInfo::default()).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = tokio::spawn({
            let hub = hub.clone();
            async move { hub.run_heartbeat(shutdown_rx).await }
        });

        for _ in 0..100 {
            if sink.frame_types().await.contains(&"heartbeat".to_string()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(sink.frame_types().await.contains(&"heartbeat".to_string()));

        shutdown_tx.send(true).unwrap();
        heartbeat.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_counts_messages_in_stats() {
        let hub = hub();
        let sink = RecordingSink::new();

        let id = hub.connect(sink, ClientInfo::default()).await;
        hub.subscribe(id, channel("events.a")).await.unwrap();

        hub.broadcast_to_channel(&channel("events.a"), ServerMessage::heartbeat())
            .await;
        hub.broadcast_to_channel(&channel("events.a"), ServerMessage::heartbeat())
            .await;

        assert_eq!(hub.get_stats().await.messages_sent, 2);
    }
}
