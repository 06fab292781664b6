//! Error types for the Metanoia adaptive learning core
//!
//! This module provides structured error handling using thiserror. The
//! taxonomy follows the propagation policy of the core: malformed input and
//! authoritative-store write failures surface to the caller; provider and
//! replication failures are recovered locally by the component that saw them.

use thiserror::Error;

/// Main error type for Metanoia operations
#[derive(Error, Debug)]
pub enum MetanoiaError {
    /// Malformed input (e.g. merging zero units, vector dimension mismatch).
    /// Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Local store call failed on the authoritative path
    #[error("Store error: {0}")]
    Store(String),

    /// Local store was never initialized; read-heavy operations degrade
    /// to neutral results instead of raising this
    #[error("Store unavailable")]
    StoreUnavailable,

    /// LLM provider request failed
    #[error("LLM provider error: {0}")]
    Llm(String),

    /// Embedding provider request failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid identifier format
    #[error("Invalid unit ID: {0}")]
    InvalidUnitId(#[from] uuid::Error),

    /// Requested unit does not exist
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Metanoia operations
pub type Result<T> = std::result::Result<T, MetanoiaError>;

/// Convert anyhow::Error to MetanoiaError
impl From<anyhow::Error> for MetanoiaError {
    fn from(err: anyhow::Error) -> Self {
        MetanoiaError::Other(err.to_string())
    }
}
