//! Subscription entity and the per-message delivery state machine.
//!
//! A message delivered to a subscription moves through:
//!
//! ```text
//! Pending(k) --delivery ok--------------> Acked (terminal)
//! Pending(k) --fail/timeout, k < max----> Pending(k + 1)
//! Pending(max) --timeout----------------> DeadLettered (terminal)
//! ```
//!
//! The transitions live here as synchronous methods so they can be
//! tested without workers or clocks; the delivery workers drive them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::channel::ChannelPattern;
use super::envelope::MessageEnvelope;
use super::foundation::{MessageId, SubscriptionId, Timestamp};

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

/// A message awaiting acknowledgement for one subscription.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    /// The envelope to re-enqueue on retry.
    pub envelope: MessageEnvelope,

    /// When the message was last handed to the delivery worker.
    pub enqueued_at: Timestamp,

    /// Attempts made so far; mirrors `envelope.delivery_attempt`.
    pub attempts: u32,
}

/// Outcome of the watchdog's look at an expired pending message.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Attempt ceiling not reached: re-enqueue this refreshed envelope.
    Retry(MessageEnvelope),

    /// Attempt ceiling reached: dead-letter via the acknowledgement path.
    DeadLetter,

    /// The message was acknowledged concurrently; nothing to do.
    Unknown,
}

/// A registered delivery subscription.
///
/// Owns the pending-message map for its private delivery timeline. The
/// delivery target handle (webhook client or in-process callback) lives
/// with the manager; this entity tracks status, attempts, pending
/// acknowledgements, and the delivered/dead-letter counters.
#[derive(Debug)]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub channel_pattern: ChannelPattern,
    pub owner_service: String,
    pub max_delivery_attempts: u32,
    pub ack_timeout: Duration,
    pub batch_size: usize,
    pub auto_ack: bool,
    pub status: SubscriptionStatus,
    pub created_at: Timestamp,
    pub last_heartbeat: Timestamp,
    pending_messages: HashMap<MessageId, PendingMessage>,
    delivered_count: u64,
    dead_letter_count: u64,
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscription_id: SubscriptionId,
        channel_pattern: ChannelPattern,
        owner_service: impl Into<String>,
        max_delivery_attempts: u32,
        ack_timeout: Duration,
        batch_size: usize,
        auto_ack: bool,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            subscription_id,
            channel_pattern,
            owner_service: owner_service.into(),
            max_delivery_attempts,
            ack_timeout,
            batch_size,
            auto_ack,
            status: SubscriptionStatus::Active,
            created_at: now,
            last_heartbeat: now,
            pending_messages: HashMap::new(),
            delivered_count: 0,
            dead_letter_count: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Marks the subscription cancelled. Idempotent.
    pub fn cancel(&mut self) {
        self.status = SubscriptionStatus::Cancelled;
    }

    /// Refreshes the liveness marker; called by the heartbeat worker.
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Timestamp::now();
    }

    /// Records a delivery attempt for a message.
    ///
    /// Inserts the pending entry on first delivery, refreshes the
    /// in-flight clock on a retry. `attempts` always mirrors the
    /// envelope's `delivery_attempt`.
    pub fn record_attempt(&mut self, envelope: &MessageEnvelope) {
        let entry = self
            .pending_messages
            .entry(envelope.message_id)
            .or_insert_with(|| PendingMessage {
                envelope: envelope.clone(),
                enqueued_at: Timestamp::now(),
                attempts: envelope.delivery_attempt,
            });
        entry.enqueued_at = Timestamp::now();
        entry.attempts = entry.attempts.max(envelope.delivery_attempt);
    }

    /// Records a delivery that needs no acknowledgement (auto-ack).
    pub fn record_delivered(&mut self) {
        self.delivered_count += 1;
    }

    /// Removes a pending message, settling its terminal outcome.
    ///
    /// Idempotent: acknowledging an unknown or already-settled message
    /// returns `None` and changes nothing.
    pub fn acknowledge(&mut self, message_id: &MessageId, success: bool) -> Option<PendingMessage> {
        let settled = self.pending_messages.remove(message_id)?;
        if success {
            self.delivered_count += 1;
        } else {
            self.dead_letter_count += 1;
        }
        Some(settled)
    }

    /// Returns the ids of pending messages whose time in flight exceeds
    /// the subscription's acknowledgement timeout.
    pub fn expired_pending(&self) -> Vec<MessageId> {
        self.pending_messages
            .iter()
            .filter(|(_, pending)| pending.enqueued_at.elapsed() > self.ack_timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Decides the fate of one expired pending message.
    ///
    /// Below the attempt ceiling the entry is bumped in place and the
    /// refreshed envelope returned for re-enqueueing; at the ceiling
    /// the caller must settle it through [`Self::acknowledge`] with
    /// `success = false`.
    pub fn prepare_retry(&mut self, message_id: &MessageId) -> RetryDecision {
        let Some(pending) = self.pending_messages.get_mut(message_id) else {
            return RetryDecision::Unknown;
        };

        if pending.attempts < self.max_delivery_attempts {
            pending.attempts += 1;
            pending.envelope.next_attempt();
            pending.enqueued_at = Timestamp::now();
            RetryDecision::Retry(pending.envelope.clone())
        } else {
            RetryDecision::DeadLetter
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_messages.len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    pub fn dead_letter_count(&self) -> u64 {
        self.dead_letter_count
    }

    /// Drops every pending entry; used when draining a cancelled
    /// subscription.
    pub fn clear_pending(&mut self) {
        self.pending_messages.clear();
    }
}

#[cfg(test)]
impl Subscription {
    /// Backdates a pending entry so expiry can be tested without sleeping.
    pub fn backdate_pending(&mut self, message_id: &MessageId, secs: u64) {
        if let Some(pending) = self.pending_messages.get_mut(message_id) {
            pending.enqueued_at = pending.enqueued_at.minus_secs(secs);
        }
    }
}
