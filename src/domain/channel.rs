//! Channel naming and pattern matching.
//!
//! Channels are opaque dot-segmented routing strings
//! (`events.billing.invoice_paid`, `kpi.calculated.mrr.42.2026-07`).
//! Subscriptions may use a pattern with a trailing `*` that matches any
//! suffix at that segment boundary: `responses.*` matches `responses.123`
//! and `responses.123.chunk` but not `responsesx` and not `responses`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::foundation::ValidationError;

/// A concrete channel name used as a routing key.
///
/// Never persisted; validated on construction so the rest of the crate
/// can treat it as a well-formed routing string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Creates a channel name, rejecting empty strings, whitespace,
    /// and wildcard characters.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::empty_field("channel"));
        }
        if name.contains(char::is_whitespace) {
            return Err(ValidationError::invalid_format(
                "channel",
                "must not contain whitespace",
            ));
        }
        if name.contains('*') {
            return Err(ValidationError::invalid_format(
                "channel",
                "wildcards are only valid in subscription patterns",
            ));
        }
        Ok(Self(name))
    }

    /// Returns the channel name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A subscription routing key: either an exact channel name or a glob
/// with a single trailing `*`.
///
/// This is the one matching implementation in the crate; the in-memory
/// bus, the delivery manager, and the redis adapter's dispatch table all
/// route through it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelPattern(String);

impl ChannelPattern {
    /// Creates a pattern, rejecting empty strings, whitespace, and any
    /// `*` that is not a lone trailing segment (`*` or `prefix.*`).
    pub fn new(pattern: impl Into<String>) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(ValidationError::empty_field("pattern"));
        }
        if pattern.contains(char::is_whitespace) {
            return Err(ValidationError::invalid_format(
                "pattern",
                "must not contain whitespace",
            ));
        }
        match pattern.find('*') {
            None => {}
            Some(pos) if pos == pattern.len() - 1 => {
                // `*` alone matches everything; otherwise the wildcard
                // must sit at a segment boundary.
                if pattern != "*" && !pattern.ends_with(".*") {
                    return Err(ValidationError::invalid_format(
                        "pattern",
                        "wildcard must follow a '.' segment boundary",
                    ));
                }
            }
            Some(_) => {
                return Err(ValidationError::invalid_format(
                    "pattern",
                    "wildcard is only valid as the trailing segment",
                ));
            }
        }
        Ok(Self(pattern))
    }

    /// Returns the pattern as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the pattern contains a wildcard segment.
    pub fn is_glob(&self) -> bool {
        self.0.ends_with('*')
    }

    /// Tests a concrete channel name against this pattern.
    pub fn matches(&self, channel: &ChannelName) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) if prefix.is_empty() => true,
            Some(prefix) => {
                channel.as_str().starts_with(prefix)
                    && channel.as_str().len() > prefix.len()
            }
            None => self.0 == channel.as_str(),
        }
    }
}

impl fmt::Display for ChannelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ChannelName> for ChannelPattern {
    fn from(name: ChannelName) -> Self {
        Self(name.0)
    }
}

impl FromStr for ChannelPattern {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
