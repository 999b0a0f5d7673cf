//! Tracing setup for hosts and tests.
//!
//! The relay logs through `tracing`; the embedding process decides where
//! those logs go. This module provides the standard wiring: env-filtered
//! (`RUST_LOG`), human-readable by default, JSON for production log
//! shipping.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global env-filtered subscriber.
///
/// Safe to call more than once; only the first call installs. Returns
/// whether this call installed the subscriber.
pub fn init() -> bool {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .is_ok()
}

/// Installs a global subscriber emitting one JSON object per line, for
/// production log shipping.
pub fn init_json() -> bool {
    fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .is_ok()
}
