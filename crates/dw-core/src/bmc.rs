//! BMC dump manager: locally captured controller dumps.
//!
//! A create request admits the capture against the storage quota, spawns
//! the external collection tool into `storageDir/<id>`, and returns
//! immediately with the new entry in progress. Completion arrives through
//! the filesystem watch (the finished file's name carries id and
//! timestamp); the tool's exit only clears the single-flight gate for
//! user-requested dumps.

use crate::entry::{EntryCore, EntrySnapshot};
use crate::quota::QuotaPolicy;
use crate::store::{self, LocalEntry, LocalRegistry, StoredEviction};
use crate::supervise::{self, ExitEvent};
use crate::{epoch_now_us, Result};
use dw_common::params::{self, DumpParams, KEY_DUMP_TYPE};
use dw_common::{Error, EntryId};
use dw_config::{CollectorConfig, StoredCategoryConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Filename prefix of the stored-name contract for this category.
pub const BMC_DUMP_PREFIX: &str = "obmcdump";

/// Management object path root for BMC dump entries.
const BASE_ENTRY_PATH: &str = "/dump/bmc/entry";

/// Most parameters a create request may carry before the surplus is
/// ignored with a warning.
const MAX_CREATE_PARAMS: usize = 4;

/// BMC dump sub-type, mapped to the collection tool's type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmcDumpType {
    UserRequested,
    ApplicationCored,
    ErrorLog,
    Checkstop,
    Ramoops,
}

impl BmcDumpType {
    /// Tag handed to the collection tool via `-t`.
    pub fn tool_tag(self) -> &'static str {
        match self {
            BmcDumpType::UserRequested => "user",
            BmcDumpType::ApplicationCored => "core",
            BmcDumpType::ErrorLog => "elog",
            BmcDumpType::Checkstop => "checkstop",
            BmcDumpType::Ramoops => "ramoops",
        }
    }

    /// Parse the request-map form (same strings as the tool tags).
    pub fn parse(s: &str) -> Option<BmcDumpType> {
        match s {
            "user" => Some(BmcDumpType::UserRequested),
            "core" => Some(BmcDumpType::ApplicationCored),
            "elog" => Some(BmcDumpType::ErrorLog),
            "checkstop" => Some(BmcDumpType::Checkstop),
            "ramoops" => Some(BmcDumpType::Ramoops),
            _ => None,
        }
    }
}

/// Owner of the BMC dump registry and capture pipeline.
pub struct BmcManager {
    storage_dir: PathBuf,
    quota: QuotaPolicy,
    collector: CollectorConfig,
    entries: LocalRegistry,
    last_entry_id: u32,
    /// Single-flight gate for user-requested captures; instance state,
    /// never shared between managers.
    user_dump_in_progress: bool,
    /// Sub-type per supervised child, keyed by pid.
    pending: HashMap<u32, BmcDumpType>,
    on_exit: Arc<dyn Fn(ExitEvent) + Send + Sync>,
}

impl BmcManager {
    /// Build the manager and ensure its storage directory exists.
    pub fn new(
        cfg: &StoredCategoryConfig,
        collector: &CollectorConfig,
        on_exit: Arc<dyn Fn(ExitEvent) + Send + Sync>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&cfg.storage_dir)?;
        Ok(Self {
            storage_dir: cfg.storage_dir.clone(),
            quota: QuotaPolicy::from(cfg),
            collector: collector.clone(),
            entries: LocalRegistry::new(),
            last_entry_id: 0,
            user_dump_in_progress: false,
            pending: HashMap::new(),
            on_exit,
        })
    }

    /// Create a new BMC dump. Returns the entry's object path; the dump
    /// itself completes asynchronously.
    pub fn create_dump(&mut self, params: &DumpParams) -> Result<String> {
        if params.len() > MAX_CREATE_PARAMS {
            warn!(
                count = params.len(),
                max = MAX_CREATE_PARAMS,
                "BMC dump create request carries surplus parameters, ignoring extras"
            );
        }

        // Category-wide gate: the collection tool is a single-instance
        // resource, so every API-level create is rejected while a
        // user-requested capture runs. Internal captures (core sweep)
        // do not pass through here.
        if self.user_dump_in_progress {
            return Err(Error::unavailable(
                "a BMC dump is already in progress",
            ));
        }

        let dump_type = match params::optional_str(params, KEY_DUMP_TYPE)? {
            Some(s) => {
                BmcDumpType::parse(s).ok_or_else(|| Error::invalid_argument(KEY_DUMP_TYPE, s))?
            }
            None => BmcDumpType::UserRequested,
        };

        let (originator_id, originator_type) = params::extract_originator(params)?;

        let id = self.capture(dump_type, &[])?;
        self.entries.insert(
            id.0,
            LocalEntry {
                core: EntryCore::in_progress(id, epoch_now_us(), originator_id, originator_type),
                file: PathBuf::new(),
            },
        );
        if dump_type == BmcDumpType::UserRequested {
            self.user_dump_in_progress = true;
        }

        info!(id = %id, dump_type = dump_type.tool_tag(), "BMC dump capture started");
        Ok(entry_path(id))
    }

    /// Sweep the core-file directory and start one `core` capture if any
    /// `core.*` files are present. Returns the capture's entry id.
    pub fn sweep_core_files(&mut self) -> Result<Option<EntryId>> {
        let dir = self.collector.core_file_dir.clone();
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut files = Vec::new();
        for dirent in std::fs::read_dir(&dir)
            .map_err(|e| Error::internal(format!("reading {}: {e}", dir.display())))?
        {
            let dirent = dirent.map_err(|e| Error::internal(e.to_string()))?;
            let path = dirent.path();
            let is_core = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("core."));
            if is_core && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Ok(None);
        }

        info!(count = files.len(), "core files found, capturing application core dump");
        self.capture(BmcDumpType::ApplicationCored, &files).map(Some)
    }

    /// Admit against quota and start the collection tool.
    fn capture(&mut self, dump_type: BmcDumpType, files: &[PathBuf]) -> Result<EntryId> {
        let allowed = self.quota.allowed_size(
            &self.storage_dir,
            &mut StoredEviction {
                storage_dir: &self.storage_dir,
                entries: &mut self.entries,
            },
        )?;

        let id = EntryId(self.last_entry_id + 1);
        let dump_dir = self.storage_dir.join(id.to_string());

        let mut cmd = Command::new(&self.collector.tool);
        cmd.arg("-d")
            .arg(&dump_dir)
            .arg("-i")
            .arg(id.to_string())
            .arg("-s")
            .arg((allowed / 1024).to_string())
            .arg("-q")
            .arg("-v")
            .arg("-t")
            .arg(dump_type.tool_tag());
        for file in files {
            cmd.arg("-p").arg(file);
        }

        let callback = Arc::clone(&self.on_exit);
        let handle = supervise::spawn(&mut cmd, move |exit| callback(exit)).map_err(|e| {
            Error::internal(format!(
                "failed to start collection tool {}: {e}",
                self.collector.tool.display()
            ))
        })?;

        self.pending.insert(handle.pid, dump_type);
        self.last_entry_id = id.0;
        Ok(id)
    }

    /// The collection tool exited. Only the occurrence matters: the gate
    /// is cleared unconditionally, regardless of exit status or interim
    /// deletion attempts.
    pub fn handle_child_exit(&mut self, exit: ExitEvent) {
        let Some(dump_type) = self.pending.remove(&exit.pid) else {
            debug!(pid = exit.pid, "exit for an unknown child, ignoring");
            return;
        };
        debug!(pid = exit.pid, success = exit.success, dump_type = dump_type.tool_tag(), "capture tool finished");
        if dump_type == BmcDumpType::UserRequested && self.user_dump_in_progress {
            info!("user-requested dump completed, resetting single-flight gate");
            self.user_dump_in_progress = false;
        }
    }

    /// Apply a batch of filesystem events to the registry.
    pub fn handle_watch(&mut self, batch: &crate::watch::WatchBatch) {
        for (path, kind) in batch {
            match kind {
                crate::watch::WatchEventKind::ClosedForWrite if !path.is_dir() => {
                    if let Some(id) = store::adopt_file(&mut self.entries, BMC_DUMP_PREFIX, path) {
                        self.last_entry_id = self.last_entry_id.max(id.0);
                    }
                }
                _ => debug!(path = %path.display(), ?kind, "watch event needs no registry change"),
            }
        }
    }

    /// Rebuild the registry from the storage directory after a restart.
    pub fn restore(&mut self) {
        let max_id = store::restore(&mut self.entries, BMC_DUMP_PREFIX, &self.storage_dir);
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
        info!(id = %id, "BMC dump entry deleted");
        Ok(())
    }

    /// Hand the dump file off to the caller-supplied URI.
    ///
    /// The local hand-off is synchronous, so the offload is confirmed
    /// before this returns and a later delete is not blocked by it.
    pub fn initiate_offload(&mut self, id: EntryId, uri: String) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", id.to_string()))?;
        if entry.core.offload_in_flight() {
            return Err(Error::not_allowed("an offload for this dump is already in flight"));
        }
        if entry.core.status != dw_common::OperationStatus::Completed {
            return Err(Error::not_allowed("dump is not yet completed"));
        }
        info!(id = %id, uri = %uri, file = %entry.file.display(), "BMC dump offload requested");
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

    /// Whether the user-capture gate is currently held.
    pub fn user_dump_in_progress(&self) -> bool {
        self.user_dump_in_progress
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
