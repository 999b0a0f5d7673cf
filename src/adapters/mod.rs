//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `bus` - Message bus implementations (in-memory, redis)
//! - `delivery` - Subscription delivery manager and webhook transport
//! - `hub` - Live client connection hub and WebSocket glue

pub mod bus;
pub mod delivery;
pub mod hub;

pub use bus::{InMemoryBus, RedisBusAdapter};
pub use delivery::{CreateSubscriptionRequest, DeliveryManager, SubscriptionInfo, WebhookTransport};
pub use hub::{ClientInfo, ConnectionHub, HubSocketState, HubStats};
