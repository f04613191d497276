//! Shared dump entry state.
//!
//! Every category's entry embeds an [`EntryCore`]; the category modules
//! add their own fields (file path, source correlation, request inputs)
//! and drive the one-way `InProgress → Completed` transition through it.

use dw_common::{EntryId, OperationStatus, OriginatorType, SourceId};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;

/// State common to every dump entry.
#[derive(Debug, Clone)]
pub struct EntryCore {
    pub id: EntryId,
    /// Completion time (creation time while in progress), µs since epoch.
    pub timestamp_us: u64,
    pub size_bytes: u64,
    pub status: OperationStatus,
    pub originator_id: String,
    pub originator_type: OriginatorType,
    /// Offload destination; non-empty means an offload was requested.
    pub offload_uri: String,
    /// An offload was initiated for this entry.
    pub offloaded: bool,
    /// The transport has not yet confirmed the offload done.
    pub offload_pending: bool,
}

impl EntryCore {
    /// A fresh entry awaiting completion.
    pub fn in_progress(
        id: EntryId,
        timestamp_us: u64,
        originator_id: String,
        originator_type: OriginatorType,
    ) -> Self {
        Self {
            id,
            timestamp_us,
            size_bytes: 0,
            status: OperationStatus::InProgress,
            originator_id,
            originator_type,
            offload_uri: String::new(),
            offloaded: false,
            offload_pending: false,
        }
    }

    /// An entry born complete (restore, or a notification with no
    /// preceding request).
    pub fn completed(
        id: EntryId,
        timestamp_us: u64,
        size_bytes: u64,
        originator_id: String,
        originator_type: OriginatorType,
    ) -> Self {
        Self {
            id,
            timestamp_us,
            size_bytes,
            status: OperationStatus::Completed,
            originator_id,
            originator_type,
            offload_uri: String::new(),
            offloaded: false,
            offload_pending: false,
        }
    }

    /// Finalize the entry. Returns `false` (and leaves every field
    /// untouched) if it already completed; finalized entries are never
    /// overwritten.
    pub fn complete(&mut self, timestamp_us: u64, size_bytes: u64) -> bool {
        if self.status == OperationStatus::Completed {
            error!(
                id = %self.id,
                "update on a completed entry ignored, finalized fields retained"
            );
            return false;
        }
        self.timestamp_us = timestamp_us;
        self.size_bytes = size_bytes;
        self.status = OperationStatus::Completed;
        true
    }

    /// Whether an offload has been requested and not yet confirmed done.
    pub fn offload_in_flight(&self) -> bool {
        self.offload_pending
    }

    /// Record an accepted offload request; it stays in flight until
    /// [`EntryCore::confirm_offload`].
    pub fn mark_offloaded(&mut self, uri: String) {
        self.offload_uri = uri;
        self.offloaded = true;
        self.offload_pending = true;
    }

    /// The transport confirmed the offload done; deletion is allowed
    /// again.
    pub fn confirm_offload(&mut self) {
        self.offload_pending = false;
    }
}

/// Read-only view of an entry, as returned across the management API.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub status: OperationStatus,
    pub timestamp_us: u64,
    pub size_bytes: u64,
    pub originator_id: String,
    pub originator_type: OriginatorType,
    pub offload_uri: String,
    /// Source correlation, for notification-driven categories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<SourceId>,
    /// Local artifact path, for locally stored categories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl EntrySnapshot {
    pub(crate) fn from_core(core: &EntryCore) -> Self {
        Self {
            id: core.id,
            status: core.status,
            timestamp_us: core.timestamp_us,
            size_bytes: core.size_bytes,
            originator_id: core.originator_id.clone(),
            originator_type: core.originator_type.clone(),
            offload_uri: core.offload_uri.clone(),
            source_id: None,
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> EntryCore {
        EntryCore::in_progress(EntryId(1), 100, String::new(), OriginatorType::Internal)
    }

    #[test]
    fn complete_is_one_way() {
        let mut e = fresh();
        assert!(e.complete(2_000, 512));
        assert_eq!(e.status, OperationStatus::Completed);
        assert_eq!(e.size_bytes, 512);

        // A second update must not disturb the finalized fields.
        assert!(!e.complete(9_999, 4096));
        assert_eq!(e.timestamp_us, 2_000);
        assert_eq!(e.size_bytes, 512);
    }

    #[test]
    fn offload_flags() {
        let mut e = fresh();
        assert!(!e.offload_in_flight());
        e.mark_offloaded("nbd://0".into());
        assert!(e.offload_in_flight());
        assert!(e.offloaded);

        e.confirm_offload();
        assert!(!e.offload_in_flight());
        assert_eq!(e.offload_uri, "nbd://0");
    }
}
