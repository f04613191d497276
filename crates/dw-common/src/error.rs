//! Error types for Dump Warden.
//!
//! Every public management operation either succeeds or fails with one of
//! the named kinds below. Codes are stable for machine parsing; categories
//! group related kinds for structured logging and metrics.
//!
//! # Agent-Facing Output
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 13,
//!   "category": "capacity",
//!   "message": "quota exceeded: not enough space, delete old dumps"
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for Dump Warden operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed request parameters.
    Request,
    /// Operation forbidden in the current state or by preconditions.
    State,
    /// Storage quota exhausted with no eviction policy configured.
    Capacity,
    /// Unexpected local fault (spawn failure, registry corruption).
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Request => write!(f, "request"),
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::Capacity => write!(f, "capacity"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Unified error type for Dump Warden management operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A request parameter was missing, mistyped, or out of range.
    #[error("invalid argument {parameter}: {value}")]
    InvalidArgument { parameter: String, value: String },

    /// The operation is forbidden in the current state.
    #[error("not allowed: {reason}")]
    NotAllowed { reason: String },

    /// A conflicting operation is in flight or a collaborator is down.
    #[error("unavailable: {reason}")]
    Unavailable { reason: String },

    /// Storage quota exhausted and no eviction policy is configured.
    #[error("quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    /// Unexpected local fault.
    #[error("internal failure: {context}")]
    InternalFailure { context: String },
}

impl Error {
    /// Returns the stable error code for this error kind.
    ///
    /// Codes are stable across releases:
    /// - 10: InvalidArgument
    /// - 11: NotAllowed
    /// - 12: Unavailable
    /// - 13: QuotaExceeded
    /// - 14: InternalFailure
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidArgument { .. } => 10,
            Error::NotAllowed { .. } => 11,
            Error::Unavailable { .. } => 12,
            Error::QuotaExceeded { .. } => 13,
            Error::InternalFailure { .. } => 14,
        }
    }

    /// Returns the category for this error kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidArgument { .. } => ErrorCategory::Request,
            Error::NotAllowed { .. } | Error::Unavailable { .. } => ErrorCategory::State,
            Error::QuotaExceeded { .. } => ErrorCategory::Capacity,
            Error::InternalFailure { .. } => ErrorCategory::Internal,
        }
    }

    /// Convenience constructor for [`Error::InvalidArgument`].
    pub fn invalid_argument(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Error::InvalidArgument {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for [`Error::NotAllowed`].
    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Error::NotAllowed {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Error::Unavailable {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::QuotaExceeded`].
    pub fn quota_exceeded(reason: impl Into<String>) -> Self {
        Error::QuotaExceeded {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::InternalFailure`].
    pub fn internal(context: impl Into<String>) -> Self {
        Error::InternalFailure {
            context: context.into(),
        }
    }

    /// Serialize to the structured JSON form used across the API boundary.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "category": self.category(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::invalid_argument("DumpType", "bogus").code(), 10);
        assert_eq!(Error::not_allowed("host is off").code(), 11);
        assert_eq!(Error::unavailable("capture in flight").code(), 12);
        assert_eq!(Error::quota_exceeded("no space").code(), 13);
        assert_eq!(Error::internal("spawn failed").code(), 14);
    }

    #[test]
    fn categories_group_kinds() {
        assert_eq!(
            Error::not_allowed("x").category(),
            Error::unavailable("y").category()
        );
        assert_eq!(
            Error::quota_exceeded("z").category(),
            ErrorCategory::Capacity
        );
    }

    #[test]
    fn json_form_carries_code_and_category() {
        let v = Error::quota_exceeded("not enough space").to_json();
        assert_eq!(v["code"], 13);
        assert_eq!(v["category"], "capacity");
    }
}
