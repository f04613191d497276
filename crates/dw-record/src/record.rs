//! Entry record types and atomic serialization.

use crate::error::{RecordError, Result};
use chrono::{DateTime, Utc};
use dw_common::{EntryId, OperationStatus, OriginatorType, SourceId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Current record schema version.
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Reserved subdirectory within an entry's directory.
pub const RESERVED_DIR: &str = ".reserved";

/// Record file name within the reserved subdirectory.
pub const RECORD_FILE_NAME: &str = "entry.json";

/// Serialized form of one dump entry.
///
/// Holds the fields that cannot be rebuilt from the dump file name alone:
/// source correlation, provenance, and the resource-dump request inputs.
#[derive(Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Record layout version.
    pub schema_version: u32,

    /// Entry id within the owning manager.
    pub id: EntryId,

    /// Identifier assigned by the external source, if correlated.
    pub source_id: SourceId,

    /// Completion timestamp, microseconds since the epoch (0 while in
    /// progress).
    pub timestamp_us: u64,

    /// Final size in bytes (0 while in progress).
    pub size_bytes: u64,

    /// Entry lifecycle status.
    pub status: OperationStatus,

    /// Identity of the requester.
    pub originator_id: String,

    /// Kind of the requester.
    pub originator_type: OriginatorType,

    /// Offload destination, empty until an offload is requested.
    pub offload_uri: String,

    /// Resource selector forwarded to the host (resource dumps only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_selector: Option<String>,

    /// Host access password (resource dumps only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// When this record was written.
    pub saved_at: DateTime<Utc>,
}

// Manual Debug so the password never reaches logs.
impl std::fmt::Debug for EntryRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRecord")
            .field("schema_version", &self.schema_version)
            .field("id", &self.id)
            .field("source_id", &self.source_id)
            .field("timestamp_us", &self.timestamp_us)
            .field("size_bytes", &self.size_bytes)
            .field("status", &self.status)
            .field("originator_id", &self.originator_id)
            .field("originator_type", &self.originator_type)
            .field("offload_uri", &self.offload_uri)
            .field("resource_selector", &self.resource_selector)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

impl EntryRecord {
    /// Create a record with the current schema version and timestamp.
    pub fn new(id: EntryId, status: OperationStatus) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            id,
            source_id: SourceId::INVALID,
            timestamp_us: 0,
            size_bytes: 0,
            status,
            originator_id: String::new(),
            originator_type: OriginatorType::default(),
            offload_uri: String::new(),
            resource_selector: None,
            password: None,
            saved_at: Utc::now(),
        }
    }

    /// Path of the record file inside `entry_dir`.
    pub fn path_in(entry_dir: &Path) -> PathBuf {
        entry_dir.join(RESERVED_DIR).join(RECORD_FILE_NAME)
    }

    /// Write the record under `entry_dir` atomically.
    ///
    /// The reserved subdirectory is created if needed; the record is
    /// written to a temp file and renamed into place so readers never see
    /// a partial document.
    pub fn write(&self, entry_dir: &Path) -> Result<()> {
        let reserved = entry_dir.join(RESERVED_DIR);
        fs::create_dir_all(&reserved)?;

        let tmp = reserved.join(format!(".{RECORD_FILE_NAME}.tmp"));
        let final_path = reserved.join(RECORD_FILE_NAME);

        let mut doc = self.clone();
        doc.saved_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&doc)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &final_path)?;

        debug!(id = %self.id, path = %final_path.display(), "entry record written");
        Ok(())
    }

    /// Read the record stored under `entry_dir`.
    pub fn read(entry_dir: &Path) -> Result<EntryRecord> {
        let path = Self::path_in(entry_dir);
        if !path.exists() {
            return Err(RecordError::Missing(path.display().to_string()));
        }
        let text = fs::read_to_string(&path)?;
        let record: EntryRecord = serde_json::from_str(&text)?;
        if record.schema_version > RECORD_SCHEMA_VERSION {
            return Err(RecordError::UnsupportedVersion {
                version: record.schema_version,
                supported: RECORD_SCHEMA_VERSION,
            });
        }
        Ok(record)
    }

    /// Whether `entry_dir` holds a record.
    pub fn exists_in(entry_dir: &Path) -> bool {
        Self::path_in(entry_dir).exists()
    }
}
