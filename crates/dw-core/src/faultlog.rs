//! Fault-log dump manager: locally stored fault payloads.
//!
//! Unlike BMC dumps there is no collection subprocess: the payload
//! arrives in the create request itself and is written synchronously, so
//! the entry is born completed. Storage layout, filename contract, quota
//! enforcement, and restore all share the BMC machinery.

use crate::entry::{EntryCore, EntrySnapshot};
use crate::quota::QuotaPolicy;
use crate::store::{self, LocalEntry, LocalRegistry, StoredEviction};
use crate::{epoch_now_us, filename, Result};
use dw_common::params::{self, DumpParams, KEY_FAULT_DATA};
use dw_common::{Error, EntryId};
use dw_config::StoredCategoryConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Filename prefix of the stored-name contract for this category.
pub const FAULTLOG_PREFIX: &str = "faultlog";

/// Management object path root for fault-log entries.
const BASE_ENTRY_PATH: &str = "/dump/faultlog/entry";

/// Owner of the fault-log dump registry.
pub struct FaultLogManager {
    storage_dir: PathBuf,
    quota: QuotaPolicy,
    entries: LocalRegistry,
    last_entry_id: u32,
}

impl FaultLogManager {
    /// Build the manager and ensure its storage directory exists.
    pub fn new(cfg: &StoredCategoryConfig) -> std::io::Result<Self> {
        fs::create_dir_all(&cfg.storage_dir)?;
        Ok(Self {
            storage_dir: cfg.storage_dir.clone(),
            quota: QuotaPolicy::from(cfg),
            entries: LocalRegistry::new(),
            last_entry_id: 0,
        })
    }

    /// Store a fault payload as a new, immediately completed entry.
    pub fn create_dump(&mut self, params: &DumpParams) -> Result<String> {
        let payload = params::optional_str(params, KEY_FAULT_DATA)?
            .ok_or_else(|| Error::invalid_argument(KEY_FAULT_DATA, "missing"))?
            .as_bytes()
            .to_vec();
        let (originator_id, originator_type) = params::extract_originator(params)?;

        let allowed = self.quota.allowed_size(
            &self.storage_dir,
            &mut StoredEviction {
                storage_dir: &self.storage_dir,
                entries: &mut self.entries,
            },
        )?;
        if payload.len() as u64 > allowed {
            return Err(Error::quota_exceeded(format!(
                "fault payload of {} bytes exceeds the allowed {} bytes",
                payload.len(),
                allowed
            )));
        }

        let id = EntryId(self.last_entry_id + 1);
        let timestamp_us = epoch_now_us();
        let entry_dir = self.storage_dir.join(id.to_string());
        let file = entry_dir.join(filename::format_stored(
            FAULTLOG_PREFIX,
            id.0,
            timestamp_us,
            "log",
        ));

        if let Err(e) = fs::create_dir_all(&entry_dir).and_then(|()| fs::write(&file, &payload)) {
            error!(id = %id, error = %e, "failed to store fault payload");
            // Leave nothing behind for the failed request.
            store::remove_entry_dir(&self.storage_dir, id);
            return Err(Error::internal(format!("storing fault payload: {e}")));
        }

        let core = EntryCore::completed(
            id,
            timestamp_us,
            payload.len() as u64,
            originator_id,
            originator_type,
        );
        self.entries.insert(id.0, LocalEntry { core, file });
        self.last_entry_id = id.0;

        info!(id = %id, size_bytes = payload.len(), "fault-log dump stored");
        Ok(entry_path(id))
    }

    /// Apply a batch of filesystem events to the registry (files placed
    /// by hand or by other tooling are adopted like any other).
    pub fn handle_watch(&mut self, batch: &crate::watch::WatchBatch) {
        for (path, kind) in batch {
            if *kind == crate::watch::WatchEventKind::ClosedForWrite && !path.is_dir() {
                if let Some(id) = store::adopt_file(&mut self.entries, FAULTLOG_PREFIX, path) {
                    self.last_entry_id = self.last_entry_id.max(id.0);
                }
            }
        }
    }

    /// Rebuild the registry from the storage directory after a restart.
    pub fn restore(&mut self) {
        let max_id = store::restore(&mut self.entries, FAULTLOG_PREFIX, &self.storage_dir);
        self.last_entry_id = self.last_entry_id.max(max_id);
    }

    /// Delete an entry and its artifact tree.
    pub fn delete(&mut self, id: EntryId) -> Result<()> {
        let entry = self
            .entries
            .get(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", id.to_string()))?;
        if entry.core.offload_in_flight() {
            return Err(Error::not_allowed(
                "dump offload is in progress, please try later",
            ));
        }
        store::remove_entry_dir(&self.storage_dir, id);
        self.entries.remove(&id.0);
        info!(id = %id, "fault-log dump entry deleted");
        Ok(())
    }

    /// Hand the fault log off to the caller-supplied URI (synchronous,
    /// confirmed before return).
    pub fn initiate_offload(&mut self, id: EntryId, uri: String) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", id.to_string()))?;
        if entry.core.offload_in_flight() {
            return Err(Error::not_allowed("an offload for this dump is already in flight"));
        }
        info!(id = %id, uri = %uri, "fault-log offload requested");
        entry.core.mark_offloaded(uri);
        entry.core.confirm_offload();
        Ok(())
    }

    /// Read-only view of the registry, ordered by id.
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        self.entries.values().map(LocalEntry::snapshot).collect()
    }

    /// The high-water mark of assigned ids.
    pub fn last_entry_id(&self) -> u32 {
        self.last_entry_id
    }

    /// Storage root, for wiring the watcher.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }
}

/// Object path for one entry.
fn entry_path(id: EntryId) -> String {
    format!("{BASE_ENTRY_PATH}/{id}")
}
