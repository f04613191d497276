//! Dump Warden configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the daemon's TOML configuration
//! - Config resolution (CLI → env → system path → defaults)
//! - Semantic validation with field-naming errors
//!
//! Quota values are bytes everywhere in this crate; the collection tool's
//! KiB allotment is derived at the call site.

pub mod resolve;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use resolve::{load, ConfigSource};
pub use validate::{validate, ValidationError, ValidationResult};

/// Full daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Locally captured BMC dumps.
    pub bmc: StoredCategoryConfig,
    /// Locally stored fault-log dumps.
    pub faultlog: StoredCategoryConfig,
    /// Host resource dumps (notification-driven, record-backed).
    pub resource: RecordCategoryConfig,
    /// Host system dumps (notification-driven, record-backed).
    pub system: RecordCategoryConfig,
    /// External collection tool settings.
    pub collector: CollectorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bmc: StoredCategoryConfig {
                storage_dir: PathBuf::from("/var/lib/dump-warden/bmc"),
                total_bytes: 20 * 1024 * 1024,
                min_free_bytes: 1024 * 1024,
                max_dump_bytes: 8 * 1024 * 1024,
                evict_oldest: false,
            },
            faultlog: StoredCategoryConfig {
                storage_dir: PathBuf::from("/var/lib/dump-warden/faultlog"),
                total_bytes: 4 * 1024 * 1024,
                min_free_bytes: 256 * 1024,
                max_dump_bytes: 1024 * 1024,
                evict_oldest: true,
            },
            resource: RecordCategoryConfig {
                storage_dir: PathBuf::from("/var/lib/dump-warden/resource"),
            },
            system: RecordCategoryConfig {
                storage_dir: PathBuf::from("/var/lib/dump-warden/system"),
            },
            collector: CollectorConfig::default(),
        }
    }
}

/// Storage and quota settings for a locally stored dump category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoredCategoryConfig {
    /// Directory holding one subdirectory per entry id.
    pub storage_dir: PathBuf,
    /// Total bytes the category may occupy.
    pub total_bytes: u64,
    /// Minimum free bytes required to admit a new capture.
    pub min_free_bytes: u64,
    /// Per-capture size cap in bytes.
    pub max_dump_bytes: u64,
    /// Delete oldest entries to make room instead of failing.
    pub evict_oldest: bool,
}

impl Default for StoredCategoryConfig {
    fn default() -> Self {
        Config::default().bmc
    }
}

/// Storage settings for a record-backed (notification-driven) category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordCategoryConfig {
    /// Directory holding one subdirectory per entry id.
    pub storage_dir: PathBuf,
}

impl Default for RecordCategoryConfig {
    fn default() -> Self {
        Config::default().resource
    }
}

/// External collection tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Path to the collection tool executable.
    pub tool: PathBuf,
    /// Directory swept for `core.*` files at startup.
    pub core_file_dir: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tool: PathBuf::from("/usr/bin/dreport"),
            core_file_dir: PathBuf::from("/var/lib/systemd/coredump"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_semantically_valid() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn toml_round_trip() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.bmc.total_bytes, cfg.bmc.total_bytes);
        assert_eq!(back.collector.tool, cfg.collector.tool);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [bmc]
            total_bytes = 123456789
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bmc.total_bytes, 123_456_789);
        assert_eq!(cfg.faultlog.evict_oldest, true);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = toml::from_str::<Config>("[bmc]\nquota = 5\n");
        assert!(err.is_err());
    }
}
