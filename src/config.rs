//! Configuration for a [`Graft`](crate::Graft) handle.
//!
//! Handles loading `graft.toml`:
//!
//! ```toml
//! provider = "sqlite"
//! connectionString = "./app.db"
//! preambleMode = "concurrent"
//! ```

use compact_str::CompactString;
use graft_core::error::GraftError;
use graft_core::preamble::PreambleMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "graft.toml";

/// Provider selection and execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraftConfig {
    /// Registered provider name, e.g. `sqlite` or `memory`.
    pub provider: CompactString,
    pub connection_string: String,
    #[serde(default)]
    pub preamble_mode: PreambleMode,
}

impl GraftConfig {
    pub fn new(provider: impl Into<CompactString>, connection_string: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            connection_string: connection_string.into(),
            preamble_mode: PreambleMode::default(),
        }
    }

    pub fn with_preamble_mode(mut self, mode: PreambleMode) -> Self {
        self.preamble_mode = mode;
        self
    }

    /// Load from [`CONFIG_FILE`] in the working directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.into())
            } else {
                ConfigError::Io(path.into(), e)
            }
        })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.into(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(PathBuf::from("<string>"), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::Invalid("provider must not be empty".into()));
        }
        if self.connection_string.is_empty() {
            return Err(ConfigError::Invalid("connectionString must not be empty".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for GraftError {
    fn from(e: ConfigError) -> Self {
        GraftError::Config(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_sequential_preambles() {
        let cfg = GraftConfig::from_toml_str(
            r#"
            provider = "sqlite"
            connectionString = "./dev.db"
        "#,
        )
        .unwrap();
        assert_eq!(cfg, GraftConfig::new("sqlite", "./dev.db"));
        assert_eq!(cfg.preamble_mode, PreambleMode::Sequential);
    }

    #[test]
    fn concurrent_mode() {
        let cfg = GraftConfig::from_toml_str(
            r#"
            provider = "memory"
            connectionString = "main"
            preambleMode = "concurrent"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.preamble_mode, PreambleMode::Concurrent);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GraftConfig::from_toml_str(
            r#"
            provider = "sqlite"
            connectionString = "./dev.db"
            retries = 3
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
    }

    #[test]
    fn empty_provider_is_invalid() {
        let err = GraftConfig::from_toml_str(
            r#"
            provider = " "
            connectionString = "./dev.db"
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
