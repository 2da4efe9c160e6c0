//! Runtime configuration (svm.toml)
//!
//! ```toml
//! gas_metering = true
//! gas_limit = 1000000
//! import_namespace = "host"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a runtime configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Settings forwarded to every VM entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Whether the VM meters gas
    pub gas_metering: bool,

    /// Gas limit handed to the VM; only meaningful with metering on
    pub gas_limit: u64,

    /// Namespace host imports are registered under
    pub import_namespace: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gas_metering: false,
            gas_limit: 0,
            import_namespace: "host".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Metered configuration with the given limit
    pub fn metered(gas_limit: u64) -> Self {
        Self {
            gas_metering: true,
            gas_limit,
            ..Self::default()
        }
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gas_metering && self.gas_limit == 0 {
            return Err(ConfigError::ValidationError(
                "gas metering is enabled but gas_limit is 0".to_string(),
            ));
        }

        if self.import_namespace.is_empty() {
            return Err(ConfigError::ValidationError(
                "import_namespace cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
