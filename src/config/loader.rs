use crate::config::error::{ConfigError, ConfigResult};
use crate::config::types::{HarnessConfig, RelayConfig};
use std::path::Path;

impl HarnessConfig {
    /// Parse configuration from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if self.window == 0 {
            return Err(ConfigError::Invalid("window must be >= 1".into()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid("handshake_timeout_ms must be > 0".into()));
        }
        if self.chunk_limit == Some(0) {
            return Err(ConfigError::Invalid("chunk_limit must be > 0 when set".into()));
        }
        Ok(())
    }
}

impl RelayConfig {
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        if !config.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "relay path must start with '/': {}",
                config.path
            )));
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }
}
