//! Error types for jetfinder-core

use thiserror::Error;

/// Main error type for the jetfinder-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the game backend
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Backend answered with a non-success status
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Backend payload could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Progress was requested before the game config was loaded
    #[error("game config is not loaded")]
    GameConfigMissing,
}

/// Result type alias for jetfinder-core
pub type Result<T> = std::result::Result<T, Error>;
