//! Root configuration struct and loading.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use super::admission::AdmissionConfig;
use super::tokens::TokenConfig;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identifier of the owner. The owner bypasses token checks and can
    /// never be banned.
    pub owner_id: String,
    /// Token system configuration.
    #[serde(default)]
    pub tokens: TokenConfig,
    /// Admission queue configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner_id.is_empty() {
            return Err(ConfigError::Invalid("owner_id must not be empty".into()));
        }
        self.admission.validate()?;
        self.tokens.validate()?;
        Ok(())
    }
}

pub(super) fn default_true() -> bool {
    true
}
