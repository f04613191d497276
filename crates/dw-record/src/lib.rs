//! Durable entry records for dump categories whose metadata cannot be
//! reconstructed from the filesystem alone.
//!
//! A record is a small versioned JSON document stored in a reserved
//! subdirectory of the entry's storage directory:
//!
//! ```text
//! <storage_dir>/<id>/.reserved/entry.json
//! ```
//!
//! Writes are atomic (temp file + rename) so a crash mid-write never
//! leaves a truncated record behind. Reads check the schema version and
//! refuse records written by a newer, unknown layout.

pub mod error;
pub mod record;

pub use error::{RecordError, Result};
pub use record::{EntryRecord, RECORD_FILE_NAME, RECORD_SCHEMA_VERSION, RESERVED_DIR};
