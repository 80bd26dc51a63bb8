//! Error types for the statesonic-core crate.

use thiserror::Error;

/// Errors raised while compiling pipeline configuration.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An anomaly path pattern is not a valid regular expression.
    #[error("Invalid path pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An anomaly threshold is out of range.
    #[error("Invalid anomaly threshold: {0}")]
    InvalidThreshold(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
