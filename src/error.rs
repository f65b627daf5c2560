//! Custom error types for keepsake

use thiserror::Error;

/// Main error type for keepsake operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("Unable to encode image: {0}")]
    Encoding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist memory index: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("Invalid memory: {0}")]
    InvalidMemory(String),

    #[error("Fallback image unavailable: {0}")]
    Fallback(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("Memory store is closed")]
    StoreClosed,
}

impl Error {
    /// True when the error means the referenced memory does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias for keepsake
pub type Result<T> = std::result::Result<T, Error>;
