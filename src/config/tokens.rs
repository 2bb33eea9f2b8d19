//! Token system configuration.

use serde::Deserialize;

use super::types::{ConfigError, default_true};

/// Configuration for the time-limited access token system.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Whether token checks are enforced at all. When false, every caller
    /// passes validation (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Token time-to-live in hours from creation (default: 24).
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl TokenConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_hours == 0 {
            return Err(ConfigError::Invalid("tokens.ttl_hours must be > 0".into()));
        }
        Ok(())
    }

    /// TTL as a chrono duration.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours as i64)
    }
}

fn default_ttl_hours() -> u64 {
    24
}
