//! Webhook delivery transport.
//!
//! POSTs messages to subscriber-owned HTTP endpoints. Any 2xx response
//! acknowledges the delivery; every other status, timeout, or transport
//! failure is a delivery failure left to the retry machinery.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

use crate::domain::envelope::MessageEnvelope;
use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp};
use crate::ports::DeliveryTransport;

/// HTTP implementation of the [`DeliveryTransport`] port.
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Creates a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                DomainError::new(
                    ErrorCode::InternalError,
                    format!("webhook client build failed: {}", e),
                )
            })?;
        Ok(Self { client })
    }
}

/// Builds the webhook POST body for one delivery attempt.
fn webhook_body(subscription_id: SubscriptionId, envelope: &MessageEnvelope) -> JsonValue {
    json!({
        "message_id": envelope.message_id,
        "subscription_id": subscription_id,
        "channel": envelope.channel,
        "payload": envelope.payload,
        "metadata": envelope.metadata,
        "delivery_attempt": envelope.delivery_attempt,
        "delivered_at": Timestamp::now(),
    })
}

#[async_trait]
impl DeliveryTransport for WebhookTransport {
    async fn deliver(
        &self,
        subscription_id: SubscriptionId,
        url: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), DomainError> {
        let body = webhook_body(subscription_id, envelope);

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                DomainError::new(ErrorCode::DeliveryFailed, format!("webhook unreachable: {}", e))
                    .with_detail("target", url)
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(
                DomainError::new(ErrorCode::DeliveryFailed, "webhook rejected delivery")
                    .with_detail("target", url)
                    .with_detail("status", status.as_str()),
            )
        }
    }
}
