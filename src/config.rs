//! Service configuration loaded from TOML.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [discovery]
//! default_budget_ms = 2000
//! chains = ["Starbucks", "McDonald's"]
//!
//! [discovery.providers.nominatim]
//! requests_per_minute = 60
//! ```
//!
//! Every section is optional; missing fields take their defaults.

use std::path::Path;

use placescout_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| HostError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the built-in defaults.
    ///
    /// # Errors
    ///
    /// Same as [`AppConfig::from_file`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Checks the server section and the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(HostError::Config("server.host must not be empty".into()));
        }
        self.discovery
            .validate()
            .map_err(|e| HostError::Config(e.to_string()))
    }
}
