//! Admission queue configuration.

use std::time::Duration;

use serde::Deserialize;

use super::types::ConfigError;

/// Configuration for the tiered admission queue.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Ceiling on total outstanding items across both lanes (default: 100).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Accepted regular-lane requests allowed per caller within the rolling
    /// window (default: 3).
    #[serde(default = "default_rate_limit_count")]
    pub rate_limit_count: u32,
    /// Rolling rate-limit window in seconds (default: 60).
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,
    /// Maximum seconds a regular-lane item may wait before it is promoted
    /// ahead of younger priority items (default: 300).
    #[serde(default = "default_max_regular_wait")]
    pub max_regular_wait_secs: u64,
    /// Assumed per-item service time in seconds, used for wait estimates
    /// until an observed average is available (default: 15).
    #[serde(default = "default_service_time")]
    pub service_time_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            rate_limit_count: default_rate_limit_count(),
            rate_limit_window_secs: default_rate_limit_window(),
            max_regular_wait_secs: default_max_regular_wait(),
            service_time_secs: default_service_time(),
        }
    }
}

impl AdmissionConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("admission.capacity must be > 0".into()));
        }
        if self.rate_limit_count == 0 {
            return Err(ConfigError::Invalid(
                "admission.rate_limit_count must be > 0".into(),
            ));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "admission.rate_limit_window_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Rolling rate-limit window.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Starvation bound for the regular lane.
    pub fn max_regular_wait(&self) -> Duration {
        Duration::from_secs(self.max_regular_wait_secs)
    }

    /// Configured per-item service time.
    pub fn service_time(&self) -> Duration {
        Duration::from_secs(self.service_time_secs)
    }
}

fn default_capacity() -> usize {
    100
}

fn default_rate_limit_count() -> u32 {
    3
}

fn default_rate_limit_window() -> u64 {
    60
}

fn default_max_regular_wait() -> u64 {
    300
}

fn default_service_time() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = AdmissionConfig::default();
        assert_eq!(config.capacity, 100);
        assert_eq!(config.rate_limit_count, 3);
        assert_eq!(config.rate_limit_window_secs, 60);
        assert_eq!(config.max_regular_wait_secs, 300);
        assert_eq!(config.service_time_secs, 15);
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let config = AdmissionConfig {
            capacity: 0,
            ..AdmissionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_convert() {
        let config = AdmissionConfig::default();
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.max_regular_wait(), Duration::from_secs(300));
        assert_eq!(config.service_time(), Duration::from_secs(15));
    }
}
