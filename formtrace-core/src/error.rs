//! Error types for formtrace-core

use thiserror::Error;

/// Main error type for the formtrace-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Persisted queue database error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Batch could not be delivered (transport error or non-2xx status)
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Unknown event kind passed to a manual tracking call
    #[error("invalid event kind: {0}")]
    InvalidEventKind(String),

    /// No async runtime available to drive timers and sends
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for formtrace-core
pub type Result<T> = std::result::Result<T, Error>;
