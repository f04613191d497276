//! Semantic configuration validation.

use crate::{Config, StoredCategoryConfig};
use thiserror::Error;

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 62,
        }
    }
}

/// Validate the full configuration semantically.
pub fn validate(config: &Config) -> ValidationResult<()> {
    validate_stored("bmc", &config.bmc)?;
    validate_stored("faultlog", &config.faultlog)?;

    for (field, dir) in [
        ("resource.storage_dir", &config.resource.storage_dir),
        ("system.storage_dir", &config.system.storage_dir),
        ("collector.tool", &config.collector.tool),
        ("collector.core_file_dir", &config.collector.core_file_dir),
    ] {
        if !dir.is_absolute() {
            return Err(ValidationError::InvalidValue {
                field: field.to_string(),
                message: format!("must be an absolute path, got {}", dir.display()),
            });
        }
    }

    Ok(())
}

fn validate_stored(category: &str, cfg: &StoredCategoryConfig) -> ValidationResult<()> {
    if !cfg.storage_dir.is_absolute() {
        return Err(ValidationError::InvalidValue {
            field: format!("{category}.storage_dir"),
            message: format!("must be an absolute path, got {}", cfg.storage_dir.display()),
        });
    }
    if cfg.total_bytes == 0 {
        return Err(ValidationError::InvalidValue {
            field: format!("{category}.total_bytes"),
            message: "total quota must be nonzero".to_string(),
        });
    }
    if cfg.min_free_bytes >= cfg.total_bytes {
        return Err(ValidationError::InvalidValue {
            field: format!("{category}.min_free_bytes"),
            message: format!(
                "minimum free space ({}) must be below the total quota ({})",
                cfg.min_free_bytes, cfg.total_bytes
            ),
        });
    }
    if cfg.max_dump_bytes == 0 || cfg.max_dump_bytes > cfg.total_bytes {
        return Err(ValidationError::InvalidValue {
            field: format!("{category}.max_dump_bytes"),
            message: format!(
                "per-capture cap ({}) must be nonzero and within the total quota ({})",
                cfg.max_dump_bytes, cfg.total_bytes
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_free_must_be_below_total() {
        let mut cfg = Config::default();
        cfg.bmc.min_free_bytes = cfg.bmc.total_bytes;
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("bmc.min_free_bytes"));
    }

    #[test]
    fn zero_total_is_rejected() {
        let mut cfg = Config::default();
        cfg.faultlog.total_bytes = 0;
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("faultlog.total_bytes"));
    }

    #[test]
    fn relative_storage_dir_is_rejected() {
        let mut cfg = Config::default();
        cfg.resource.storage_dir = "relative/dir".into();
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("resource.storage_dir"));
    }

    #[test]
    fn per_capture_cap_must_fit_quota() {
        let mut cfg = Config::default();
        cfg.bmc.max_dump_bytes = cfg.bmc.total_bytes + 1;
        assert!(validate(&cfg).is_err());
    }
}
