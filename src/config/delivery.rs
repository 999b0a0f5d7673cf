//! Delivery manager configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Configuration for subscription delivery workers
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// How often the ack-timeout watchdog scans pending messages, in milliseconds
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Subscription heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Webhook request timeout in seconds
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
}

impl DeliveryConfig {
    /// Get the watchdog scan interval as a Duration
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    /// Get the heartbeat interval as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Get the webhook timeout as a Duration
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Validate delivery configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.watchdog_interval_ms == 0 || self.heartbeat_interval_secs == 0 {
            return Err(ValidationError::InvalidInterval);
        }
        if self.webhook_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: default_watchdog_interval_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            webhook_timeout_secs: default_webhook_timeout_secs(),
        }
    }
}

fn default_watchdog_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_webhook_timeout_secs() -> u64 {
    10
}
