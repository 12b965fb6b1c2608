//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to load or accept an annoqueue configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No config file at {}", .0.display())]
    NotFound(PathBuf),

    /// A value failed validation; `field` is the dotted TOML path.
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Config references unset environment variable ${{{0}}}")]
    EnvVarNotSet(String),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Dotted path of the offending setting, when the error names one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}
