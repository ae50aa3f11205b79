//! Error types for printwatch-core

use thiserror::Error;

/// Main error type for the printwatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Collector/API error
    #[error("collector error: {0}")]
    Collector(String),

    /// Host network lookup error
    #[error("network info error: {0}")]
    Network(String),

    /// Pending queue error
    #[error("pending queue error: {0}")]
    Queue(String),
}

/// Result type alias for printwatch-core
pub type Result<T> = std::result::Result<T, Error>;
