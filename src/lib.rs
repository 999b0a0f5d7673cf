//! Insight Relay - Real-time messaging for the Insight analytics platform
//!
//! This crate implements the platform's event relay: a channel-based
//! publish/subscribe bus adapter, an at-least-once webhook delivery
//! manager with acknowledgement, retry, and dead-lettering, and a
//! connection hub that fans events out to live dashboard clients.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;
pub mod telemetry;

pub use service::RelayService;
