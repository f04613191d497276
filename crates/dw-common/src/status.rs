//! Dump entry operation status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a dump entry.
///
/// The transition is one-way: an entry moves from `InProgress` to
/// `Completed` exactly once and never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Capture or correlation has not finished; size and timestamp are
    /// not yet final.
    InProgress,
    /// Size and timestamp are final and the artifact (if local) exists.
    Completed,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationStatus::InProgress => write!(f, "in_progress"),
            OperationStatus::Completed => write!(f, "completed"),
        }
    }
}
