//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! ## Bus Ports
//!
//! - `MessageBus` - Publish/subscribe over the external bus
//! - `BusHandler` - Handler that processes inbound messages
//!
//! ## Delivery Ports
//!
//! - `DeliveryTransport` - Webhook push with 2xx acknowledgement
//! - `DeliveryTarget` - Where a subscription's messages go
//!
//! ## Connection Ports
//!
//! - `ClientSink` - Outbound half of one live client connection

mod bus;
mod connection;
mod delivery;

pub use bus::{BusHandler, MessageBus, SubscriberToken};
pub use connection::ClientSink;
pub use delivery::{DeliveryTarget, DeliveryTransport};
