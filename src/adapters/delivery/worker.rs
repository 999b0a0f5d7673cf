//! Background workers owned by one subscription.
//!
//! `create_subscription` spawns three of these per subscription:
//!
//! - the queue worker pops the private FIFO queue and delivers
//! - the ack-timeout watchdog retries or dead-letters expired messages
//! - the heartbeat worker refreshes the subscription's liveness marker
//!
//! Each worker holds a `watch` shutdown receiver and exits cooperatively
//! at its next suspension point; the manager joins them on cancel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

use crate::domain::envelope::MessageEnvelope;
use crate::domain::subscription::{RetryDecision, Subscription};
use crate::ports::{DeliveryTarget, DeliveryTransport};

/// Subscription state shared between the manager and its workers.
pub(crate) type SharedSubscription = Arc<Mutex<Subscription>>;

/// Pops the subscription's queue and delivers, up to `batch_size`
/// messages per cycle.
pub(crate) async fn run_queue_worker(
    state: SharedSubscription,
    mut queue_rx: mpsc::UnboundedReceiver<MessageEnvelope>,
    target: DeliveryTarget,
    transport: Arc<dyn DeliveryTransport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            maybe = queue_rx.recv() => {
                let Some(envelope) = maybe else { break };

                let batch_size = { state.lock().await.batch_size.max(1) };
                let mut batch = vec![envelope];
                while batch.len() < batch_size {
                    match queue_rx.try_recv() {
                        Ok(envelope) => batch.push(envelope),
                        Err(_) => break,
                    }
                }

                for envelope in batch {
                    deliver_one(&state, &target, &transport, envelope).await;
                }
            }
        }
    }

    // Drain a cancelled subscription's queue without delivering.
    while queue_rx.try_recv().is_ok() {}
}

/// Delivers one envelope and settles or parks its pending entry.
async fn deliver_one(
    state: &SharedSubscription,
    target: &DeliveryTarget,
    transport: &Arc<dyn DeliveryTransport>,
    envelope: MessageEnvelope,
) {
    let subscription_id = {
        let mut sub = state.lock().await;
        if !sub.is_active() {
            return;
        }
        if sub.auto_ack {
            sub.record_delivered();
            return;
        }
        sub.record_attempt(&envelope);
        sub.subscription_id
    };

    let result = match target {
        DeliveryTarget::Webhook(url) => transport.deliver(subscription_id, url, &envelope).await,
        DeliveryTarget::Callback(handler) => handler.on_message(envelope.clone()).await,
        // No push target: the pending entry waits for a manual
        // acknowledgement (or the watchdog).
        DeliveryTarget::None => return,
    };

    match result {
        Ok(()) => {
            state.lock().await.acknowledge(&envelope.message_id, true);
            tracing::debug!(
                subscription_id = %subscription_id,
                message_id = %envelope.message_id,
                attempt = envelope.delivery_attempt,
                "message delivered"
            );
        }
        Err(e) => {
            tracing::warn!(
                subscription_id = %subscription_id,
                message_id = %envelope.message_id,
                attempt = envelope.delivery_attempt,
                error = %e,
                "delivery failed, watchdog will retry"
            );
        }
    }
}

/// Scans pending messages and retries or dead-letters the expired ones.
pub(crate) async fn run_watchdog(
    state: SharedSubscription,
    queue_tx: mpsc::UnboundedSender<MessageEnvelope>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let mut sub = state.lock().await;
                if !sub.is_active() {
                    continue;
                }

                for message_id in sub.expired_pending() {
                    match sub.prepare_retry(&message_id) {
                        RetryDecision::Retry(envelope) => {
                            tracing::debug!(
                                subscription_id = %sub.subscription_id,
                                message_id = %message_id,
                                attempt = envelope.delivery_attempt,
                                "ack timeout, re-enqueueing"
                            );
                            if queue_tx.send(envelope).is_err() {
                                tracing::warn!(
                                    subscription_id = %sub.subscription_id,
                                    "delivery queue closed, dropping retry"
                                );
                            }
                        }
                        RetryDecision::DeadLetter => {
                            if sub.acknowledge(&message_id, false).is_some() {
                                tracing::warn!(
                                    subscription_id = %sub.subscription_id,
                                    message_id = %message_id,
                                    error = "Max delivery attempts exceeded",
                                    "message dead-lettered"
                                );
                            }
                        }
                        RetryDecision::Unknown => {}
                    }
                }
            }
        }
    }
}

/// Refreshes the subscription's liveness marker.
pub(crate) async fn run_heartbeat(
    state: SharedSubscription,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let mut sub = state.lock().await;
                if sub.is_active() {
                    sub.touch_heartbeat();
                    tracing::debug!(subscription_id = %sub.subscription_id, "subscription heartbeat");
                }
            }
        }
    }
}
