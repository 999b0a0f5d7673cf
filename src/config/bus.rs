//! Bus adapter configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Configuration for the redis-backed message bus
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Redis connection URL
    pub url: String,

    /// Initial reconnect backoff in milliseconds
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Reconnect backoff ceiling in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl BusConfig {
    /// Get the initial reconnect backoff as a Duration
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    /// Get the reconnect backoff ceiling as a Duration
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    /// Validate bus configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("BUS_URL"));
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ValidationError::InvalidBusUrl);
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(ValidationError::InvalidInterval);
        }
        Ok(())
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_reconnect_initial_ms() -> u64 {
    250
}

fn default_reconnect_max_ms() -> u64 {
    15_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_config_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.reconnect_initial_ms, 250);
        assert_eq!(config.reconnect_max_ms, 15_000);
    }

    #[test]
    fn test_reconnect_durations() {
        let config = BusConfig {
            reconnect_initial_ms: 100,
            reconnect_max_ms: 5_000,
            ..Default::default()
        };
        assert_eq!(config.reconnect_initial(), Duration::from_millis(100));
        assert_eq!(config.reconnect_max(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_missing_url() {
        let config = BusConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let config = BusConfig {
            url: "http://localhost:6379".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_redis_url() {
        let config = BusConfig {
            url: "redis://localhost:6379".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let config = BusConfig {
            url: "redis://localhost:6379".to_string(),
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 100,
        };
        assert!(config.validate().is_err());
    }
}
