//! Error types shared across docbridge crates

use thiserror::Error;

/// Result type alias for docbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised while loading configuration, catalogs and other local inputs
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid catalog: {0}")]
    Catalog(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BridgeError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config(message.into())
    }

    /// Shorthand for a catalog validation error
    pub fn catalog(message: impl Into<String>) -> Self {
        BridgeError::Catalog(message.into())
    }
}
