//! Memanchor error types

use thiserror::Error;

/// Memanchor error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Extraction rule error (invalid pattern, empty table)
    #[error("Rule error: {0}")]
    Rule(String),

    /// Transcript parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Anchor index error (snapshot import/export)
    #[error("Index error: {0}")]
    Index(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Memanchor operations
pub type Result<T> = std::result::Result<T, Error>;
