//! DeliveryTransport port - Interface for pushing messages to
//! subscriber-owned endpoints.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::domain::envelope::MessageEnvelope;
use crate::domain::foundation::{DomainError, SubscriptionId};

use super::bus::BusHandler;

/// Where a subscription's messages are pushed.
#[derive(Clone)]
pub enum DeliveryTarget {
    /// POST each message to a subscriber-owned HTTP endpoint; any 2xx
    /// response acknowledges it.
    Webhook(String),

    /// Invoke an in-process consumer directly.
    Callback(Arc<dyn BusHandler>),

    /// No push target: the consumer acknowledges manually (or the
    /// subscription runs with `auto_ack`).
    None,
}

impl DeliveryTarget {
    /// Human-readable description for projections and logs.
    pub fn describe(&self) -> Option<String> {
        match self {
            DeliveryTarget::Webhook(url) => Some(url.clone()),
            DeliveryTarget::Callback(handler) => Some(format!("callback:{}", handler.name())),
            DeliveryTarget::None => None,
        }
    }
}

impl fmt::Debug for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryTarget::Webhook(url) => f.debug_tuple("Webhook").field(url).finish(),
            DeliveryTarget::Callback(handler) => {
                f.debug_tuple("Callback").field(&handler.name()).finish()
            }
            DeliveryTarget::None => write!(f, "None"),
        }
    }
}

/// Port for webhook-style message delivery.
///
/// Implementations must treat any 2xx response as success and
/// everything else, including transport failures, as a delivery
/// failure the retry machinery will handle.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Deliver one envelope to a webhook URL on behalf of a
    /// subscription.
    async fn deliver(
        &self,
        subscription_id: SubscriptionId,
        url: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), DomainError>;
}
