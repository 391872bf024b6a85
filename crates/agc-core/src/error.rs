//! Error types for the analysis engine

use thiserror::Error;

/// Analysis engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid setup detected before any event is read (unknown backend,
    /// variation on an undefined column, bad binning, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Expression parse error
    #[error("Expression error: {0}")]
    Expression(String),

    /// Unreadable or malformed input (catalog entries, event files, columns).
    #[error("Input error: {0}")]
    Input(String),

    /// Failure during the event loop (worker crash, malformed event data).
    #[error("Execution error: {0}")]
    Execution(String),

    /// Histogram arithmetic error (incompatible binning, bad slice window)
    #[error("Histogram error: {0}")]
    Histogram(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
