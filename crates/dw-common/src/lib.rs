//! Dump Warden common types, IDs, and errors.
//!
//! This crate provides foundational types shared across dw-core modules:
//! - Entry and source identifiers with an explicit invalid sentinel
//! - Operation status and originator provenance
//! - The create-request parameter map and typed extractors
//! - The public error taxonomy surfaced by every management operation

pub mod error;
pub mod id;
pub mod originator;
pub mod params;
pub mod status;

pub use error::{Error, ErrorCategory, Result};
pub use id::{EntryId, SourceId};
pub use originator::OriginatorType;
pub use params::{DumpParams, ParamValue};
pub use status::OperationStatus;
