//! Delivery adapters.
//!
//! The subscription/delivery manager and its supporting pieces:
//!
//! - `DeliveryManager` - Subscription registry and admin surface
//! - `WebhookTransport` - HTTP push with 2xx acknowledgement
//! - per-subscription workers (queue processor, watchdog, heartbeat)

mod manager;
mod webhook;
mod worker;

pub use manager::{CreateSubscriptionRequest, DeliveryManager, SubscriptionInfo};
pub use webhook::WebhookTransport;
