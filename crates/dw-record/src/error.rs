//! Error types for record operations.

use thiserror::Error;

/// Errors that can occur while reading or writing entry records.
#[derive(Error, Debug)]
pub enum RecordError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No record file exists for this entry.
    #[error("no record at {0}")]
    Missing(String),

    /// Record written by an unknown, newer layout.
    #[error("unsupported record schema version {version} (supported: {supported})")]
    UnsupportedVersion { version: u32, supported: u32 },
}

/// Result type alias for record operations.
pub type Result<T> = std::result::Result<T, RecordError>;
