//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `INSIGHT_RELAY_` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use insight_relay::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod bus;
mod delivery;
mod error;
mod hub;

pub use bus::BusConfig;
pub use delivery::DeliveryConfig;
pub use error::{ConfigError, ValidationError};
pub use hub::HubConfig;

use serde::Deserialize;

/// Root relay configuration
///
/// Contains all configuration sections for the relay service.
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Name the relay stamps on envelopes it publishes
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Bus configuration (redis pub/sub connection)
    pub bus: BusConfig,

    /// Delivery manager configuration (watchdog, heartbeat, webhook client)
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Connection hub configuration (heartbeat, idle eviction)
    #[serde(default)]
    pub hub: HubConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `INSIGHT_RELAY` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `INSIGHT_RELAY__BUS__URL=redis://...` -> `bus.url = ...`
    /// - `INSIGHT_RELAY__HUB__IDLE_TIMEOUT_SECS=600` -> `hub.idle_timeout_secs = 600`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required environment variables are
    /// missing or values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("INSIGHT_RELAY")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.service_name.is_empty() {
            return Err(ValidationError::MissingRequired("SERVICE_NAME"));
        }
        self.bus.validate()?;
        self.delivery.validate()?;
        self.hub.validate()?;
        Ok(())
    }
}

#[cfg(test)]
impl AppConfig {
    /// Builds a config for tests without touching the environment.
    pub fn test_fixture() -> Self {
        Self {
            service_name: default_service_name(),
            bus: BusConfig {
                url: "redis://localhost:6379".to_string(),
                ..Default::default()
            },
            delivery: DeliveryConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "insight-relay".to_string()
}
