//! Error types for HeartSync Core

use thiserror::Error;

/// Errors that can end an aggregation pass or a parse call.
///
/// Per-record anomalies (missing keys, non-numeric values, NaN) are never
/// reported here; they are skipped where they occur.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Record source failed: {0}")]
    Source(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse records: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Aggregation pass cancelled")]
    Cancelled,
}

impl AggregateError {
    /// True for the cooperative-cancellation case, which callers treat
    /// differently from a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AggregateError::Cancelled)
    }
}
