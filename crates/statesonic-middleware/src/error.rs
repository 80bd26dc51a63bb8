//! Error types for statesonic-middleware

use thiserror::Error;

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading, saving or validating middleware configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid anomaly detection settings
    #[error("Invalid anomaly detection settings: {0}")]
    Anomaly(#[from] statesonic_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
