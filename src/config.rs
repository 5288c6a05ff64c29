//! Configuration loading and management.

use crate::creds::Credentials;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Gateway tuning.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Accounts seeded into the credential store at startup.
    #[serde(default)]
    pub account: Vec<Credentials>,
}

/// Gateway tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Seconds a backend handshake may take before the job fails.
    #[serde(default = "GatewayConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl GatewayConfig {
    fn default_connect_timeout_secs() -> u64 {
        30
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Self::default_connect_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
