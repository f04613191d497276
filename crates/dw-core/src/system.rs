//! Host system dump manager.
//!
//! System dumps are produced by the platform, reported by notification,
//! and usually held host-side; when the host offloads one into controller
//! storage the file follows the `SYSDUMP.<serial>.<idHex8>.<epochSecs>`
//! contract and is correlated back to its entry by source id. Entry
//! directories and object paths use eight-digit hex ids. Durable records
//! carry what neither contract encodes.

use crate::entry::{EntryCore, EntrySnapshot};
use crate::filename;
use crate::host::{HostControl, HostState, HostTransport, SYSTEM_DUMP_TYPE_TAG};
use crate::{epoch_now_us, Result};
use dw_common::params::{self, DumpParams};
use dw_common::{Error, EntryId, OperationStatus, OriginatorType, SourceId};
use dw_record::EntryRecord;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Management object path root for system dump entries.
const BASE_ENTRY_PATH: &str = "/dump/system/entry";

/// Most parameters a create request may carry before the surplus is
/// ignored with a warning.
const MAX_CREATE_PARAMS: usize = 2;

/// One system dump entry.
#[derive(Debug, Clone)]
pub struct SystemEntry {
    pub core: EntryCore,
    pub source_id: SourceId,
    /// Locally offloaded dump file, when the host has written one.
    pub file: PathBuf,
}

impl SystemEntry {
    fn update(&mut self, timestamp_us: u64, size_bytes: u64, source_id: SourceId) -> bool {
        if !self.core.complete(timestamp_us, size_bytes) {
            return false;
        }
        self.source_id = source_id;
        true
    }

    fn snapshot(&self) -> EntrySnapshot {
        let mut snap = EntrySnapshot::from_core(&self.core);
        snap.source_id = Some(self.source_id);
        if !self.file.as_os_str().is_empty() {
            snap.file = Some(self.file.clone());
        }
        snap
    }

    fn to_record(&self) -> EntryRecord {
        let mut record = EntryRecord::new(self.core.id, self.core.status);
        record.source_id = self.source_id;
        record.timestamp_us = self.core.timestamp_us;
        record.size_bytes = self.core.size_bytes;
        record.originator_id = self.core.originator_id.clone();
        record.originator_type = self.core.originator_type;
        record.offload_uri = self.core.offload_uri.clone();
        record
    }

    fn from_record(record: EntryRecord) -> SystemEntry {
        let mut core = EntryCore::in_progress(
            record.id,
            record.timestamp_us,
            record.originator_id,
            record.originator_type,
        );
        core.status = record.status;
        core.size_bytes = record.size_bytes;
        if !record.offload_uri.is_empty() {
            core.mark_offloaded(record.offload_uri);
        }
        SystemEntry {
            core,
            source_id: record.source_id,
            file: PathBuf::new(),
        }
    }
}

/// Owner of the system dump registry.
pub struct SystemManager {
    storage_dir: PathBuf,
    entries: BTreeMap<u32, SystemEntry>,
    last_entry_id: u32,
    host: Arc<dyn HostControl>,
    transport: Arc<dyn HostTransport>,
}

impl SystemManager {
    /// Build the manager and ensure its storage directory exists.
    pub fn new(
        cfg: &dw_config::RecordCategoryConfig,
        host: Arc<dyn HostControl>,
        transport: Arc<dyn HostTransport>,
    ) -> std::io::Result<Self> {
        fs::create_dir_all(&cfg.storage_dir)?;
        Ok(Self {
            storage_dir: cfg.storage_dir.clone(),
            entries: BTreeMap::new(),
            last_entry_id: 0,
            host,
            transport,
        })
    }

    /// Ask the platform for a system dump and place the awaiting
    /// placeholder.
    pub fn create_dump(&mut self, params: &DumpParams) -> Result<String> {
        if params.len() > MAX_CREATE_PARAMS {
            warn!(
                count = params.len(),
                max = MAX_CREATE_PARAMS,
                "system dump create request carries surplus parameters, ignoring extras"
            );
        }
        if self.host.system_dump_in_progress() {
            return Err(Error::unavailable(
                "another system dump is in progress or awaiting offload",
            ));
        }
        let state = self.host.state();
        if !matches!(
            state,
            HostState::Running | HostState::Quiesced | HostState::TransitioningToOff
        ) {
            return Err(Error::not_allowed(
                "system dump can be initiated only when the host is up, quiesced, or starting to power off",
            ));
        }
        if self
            .entries
            .values()
            .any(|e| e.core.status == OperationStatus::InProgress && !e.source_id.is_valid())
        {
            return Err(Error::unavailable(
                "a system dump request is already awaiting completion",
            ));
        }

        let (originator_id, originator_type) = params::extract_originator(params)?;

        // Only now touch the platform; a rejected request must not have
        // started anything host-side.
        self.host.start_platform_dump()?;

        let id = EntryId(self.last_entry_id + 1);
        let entry = SystemEntry {
            core: EntryCore::in_progress(id, epoch_now_us(), originator_id, originator_type),
            source_id: SourceId::INVALID,
            file: PathBuf::new(),
        };
        self.persist_best_effort(&entry);
        self.entries.insert(id.0, entry);
        self.last_entry_id = id.0;

        info!(id = %id, host_state = ?state, "system dump requested, awaiting platform notification");
        Ok(entry_path(id))
    }

    /// The platform reported a completed system dump.
    pub fn notify(&mut self, source_id: SourceId, size_bytes: u64) -> Result<()> {
        let timestamp_us = epoch_now_us();

        let mut awaiting: Option<u32> = None;
        for (key, entry) in &self.entries {
            if entry.source_id == source_id && entry.core.status == OperationStatus::Completed {
                info!(
                    source_id = %source_id,
                    id = %entry.core.id,
                    "system dump with this source id already present, ignoring notification"
                );
                return Ok(());
            }
            if !entry.source_id.is_valid() && awaiting.is_none() {
                awaiting = Some(*key);
            }
        }

        if let Some(key) = awaiting {
            if let Some(entry) = self.entries.get_mut(&key) {
                info!(id = %entry.core.id, source_id = %source_id, size_bytes, "system dump notification correlates placeholder");
                if entry.update(timestamp_us, size_bytes, source_id) {
                    let entry = entry.clone();
                    self.persist_best_effort(&entry);
                }
            }
            return Ok(());
        }

        let id = EntryId(self.last_entry_id + 1);
        info!(id = %id, source_id = %source_id, size_bytes, "system dump notification creates new entry");
        let entry = SystemEntry {
            core: EntryCore::completed(
                id,
                timestamp_us,
                size_bytes,
                String::new(),
                OriginatorType::Internal,
            ),
            source_id,
            file: PathBuf::new(),
        };
        self.persist_best_effort(&entry);
        self.entries.insert(id.0, entry);
        self.last_entry_id = id.0;
        Ok(())
    }

    /// A file appeared in system dump storage: correlate a host-offloaded
    /// `SYSDUMP` artifact back to its entry by source id.
    pub fn handle_watch(&mut self, batch: &crate::watch::WatchBatch) {
        for (path, kind) in batch {
            if *kind != crate::watch::WatchEventKind::ClosedForWrite || path.is_dir() {
                continue;
            }
            self.adopt_sysdump_file(path);
        }
    }

    fn adopt_sysdump_file(&mut self, path: &Path) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let Some(parsed) = filename::parse_system(name) else {
            error!(file = %path.display(), "file name does not match the system dump contract, skipping");
            return;
        };
        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!(file = %path.display(), error = %e, "cannot stat system dump file, skipping");
                return;
            }
        };

        // An entry already correlated with this source wins; otherwise
        // the artifact completes the awaiting placeholder.
        let key = self
            .entries
            .iter()
            .find(|(_, e)| e.source_id == parsed.source_id)
            .or_else(|| self.entries.iter().find(|(_, e)| !e.source_id.is_valid()))
            .map(|(k, _)| *k);
        let Some(entry) = key.and_then(|k| self.entries.get_mut(&k)) else {
            error!(
                source_id = %parsed.source_id,
                file = %path.display(),
                "no entry correlates with offloaded system dump file"
            );
            return;
        };
        if entry.update(parsed.timestamp_us, size, parsed.source_id) {
            entry.file = path.to_path_buf();
            info!(id = %entry.core.id, source_id = %parsed.source_id, size_bytes = size, "system dump file adopted");
            let entry = entry.clone();
            self.persist_best_effort(&entry);
        } else if entry.file.as_os_str().is_empty() {
            // Completed by notification earlier; attach the artifact.
            entry.file = path.to_path_buf();
        }
    }

    /// Ask the host to stream the dump to `uri`.
    pub fn initiate_offload(&mut self, id: EntryId, uri: String) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", format_hex(id)))?;
        if entry.core.offload_in_flight() {
            return Err(Error::not_allowed("an offload for this dump is already in flight"));
        }
        if !self.host.is_running() {
            return Err(Error::not_allowed(
                "this dump can be offloaded only when the host is up",
            ));
        }
        if entry.core.status != OperationStatus::Completed || !entry.source_id.is_valid() {
            return Err(Error::not_allowed("dump is not yet completed by the platform"));
        }

        info!(id = %id, uri = %uri, source_id = %entry.source_id, "system dump offload requested");
        self.transport.request_offload(entry.source_id, id, &uri)?;
        entry.core.mark_offloaded(uri);
        let entry = entry.clone();
        self.persist_best_effort(&entry);
        Ok(())
    }

    /// Delete an entry, issuing the best-effort remote delete first;
    /// local cleanup proceeds even when the remote side fails.
    pub fn delete(&mut self, id: EntryId) -> Result<()> {
        let entry = self
            .entries
            .get(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", format_hex(id)))?;
        if entry.core.offload_in_flight() && self.host.is_running() {
            return Err(Error::unavailable(
                "dump offload is in progress, cannot delete",
            ));
        }

        let mut remote_failure: Option<Error> = None;
        if self.host.is_running() && entry.source_id.is_valid() {
            if let Err(e) = self
                .transport
                .request_delete(entry.source_id, SYSTEM_DUMP_TYPE_TAG)
            {
                error!(id = %id, source_id = %entry.source_id, error = %e, "host-side system dump delete failed");
                remote_failure = Some(e);
            }
        }

        let dir = self.storage_dir.join(format_hex(id));
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(dir = %dir.display(), error = %e, "failed to delete system dump tree");
            }
        }
        self.entries.remove(&id.0);
        info!(id = %id, "system dump entry deleted");

        match remote_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebuild the registry after a restart: hex-named directories, each
    /// with an optional record and optional offloaded `SYSDUMP` files.
    pub fn restore(&mut self) {
        if !self.storage_dir.exists() {
            return;
        }
        let children = match fs::read_dir(&self.storage_dir) {
            Ok(children) => children,
            Err(e) => {
                error!(dir = %self.storage_dir.display(), error = %e, "cannot read system storage directory");
                return;
            }
        };

        for child in children.flatten() {
            let path = child.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| u32::from_str_radix(n, 16).ok())
            else {
                continue;
            };
            if !path.is_dir() {
                continue;
            }
            self.last_entry_id = self.last_entry_id.max(id);

            let entry = match EntryRecord::read(&path) {
                Ok(record) => SystemEntry::from_record(record),
                Err(dw_record::RecordError::Missing(_)) => SystemEntry {
                    core: EntryCore::in_progress(
                        EntryId(id),
                        0,
                        String::new(),
                        OriginatorType::Internal,
                    ),
                    source_id: SourceId::INVALID,
                    file: PathBuf::new(),
                },
                Err(e) => {
                    error!(id, error = %e, "skipping system dump entry with unreadable record");
                    continue;
                }
            };
            self.entries.insert(id, entry);

            // Offloaded artifacts finalize through the same path the
            // watcher uses at runtime.
            if let Ok(files) = fs::read_dir(&path) {
                for file in files.flatten() {
                    let file_path = file.path();
                    if !file_path.is_dir() {
                        self.adopt_sysdump_file(&file_path);
                    }
                }
            }
        }
        info!(
            entries = self.entries.len(),
            last_id = self.last_entry_id,
            "system dump registry restored"
        );
    }

    /// Read-only view of the registry, ordered by id.
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        self.entries.values().map(SystemEntry::snapshot).collect()
    }

    /// The high-water mark of assigned ids.
    pub fn last_entry_id(&self) -> u32 {
        self.last_entry_id
    }

    /// Storage root, for wiring the watcher.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn persist_best_effort(&self, entry: &SystemEntry) {
        let dir = self.storage_dir.join(format_hex(entry.core.id));
        if let Err(e) = entry.to_record().write(&dir) {
            warn!(id = %entry.core.id, error = %e, "entry record write failed, state survives only in memory");
        }
    }
}

fn format_hex(id: EntryId) -> String {
    format!("{:08X}", id.0)
}

/// Object path for one entry.
fn entry_path(id: EntryId) -> String {
    format!("{BASE_ENTRY_PATH}/{}", format_hex(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeHost {
        state: Mutex<HostState>,
        dump_active: AtomicBool,
        platform_calls: AtomicBool,
    }

    impl FakeHost {
        fn with_state(state: HostState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                dump_active: AtomicBool::new(false),
                platform_calls: AtomicBool::new(false),
            })
        }
    }

    impl HostControl for FakeHost {
        fn state(&self) -> HostState {
            *self.state.lock().unwrap()
        }

        fn system_dump_in_progress(&self) -> bool {
            self.dump_active.load(Ordering::SeqCst)
        }

        fn start_platform_dump(&self) -> Result<()> {
            self.platform_calls.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        deletes: Mutex<Vec<(SourceId, u32)>>,
    }

    impl HostTransport for FakeTransport {
        fn request_offload(&self, _source_id: SourceId, _id: EntryId, _uri: &str) -> Result<()> {
            Ok(())
        }

        fn request_delete(&self, source_id: SourceId, type_tag: u32) -> Result<()> {
            self.deletes.lock().unwrap().push((source_id, type_tag));
            Ok(())
        }
    }

    fn manager(dir: &Path, host: Arc<FakeHost>) -> SystemManager {
        SystemManager::new(
            &dw_config::RecordCategoryConfig {
                storage_dir: dir.to_path_buf(),
            },
            host,
            Arc::new(FakeTransport::default()),
        )
        .unwrap()
    }

    #[test]
    fn create_requires_usable_host_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Off));
        let err = mgr.create_dump(&DumpParams::new()).unwrap_err();
        assert!(matches!(err, Error::NotAllowed { .. }));

        for state in [
            HostState::Running,
            HostState::Quiesced,
            HostState::TransitioningToOff,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let host = FakeHost::with_state(state);
            let mut mgr = manager(dir.path(), Arc::clone(&host));
            let path = mgr.create_dump(&DumpParams::new()).unwrap();
            assert_eq!(path, "/dump/system/entry/00000001");
            assert!(host.platform_calls.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn create_is_unavailable_while_platform_dump_active() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::with_state(HostState::Running);
        host.dump_active.store(true, Ordering::SeqCst);
        let mut mgr = manager(dir.path(), Arc::clone(&host));

        let err = mgr.create_dump(&DumpParams::new()).unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        // The platform was never poked for a rejected request.
        assert!(!host.platform_calls.load(Ordering::SeqCst));
    }

    #[test]
    fn notify_correlates_placeholder_then_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Running));
        mgr.create_dump(&DumpParams::new()).unwrap();

        mgr.notify(SourceId(0x2A), 1 << 20).unwrap();
        mgr.notify(SourceId(0x2A), 999).unwrap();

        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_id, Some(SourceId(0x2A)));
        assert_eq!(entries[0].size_bytes, 1 << 20);
    }

    #[test]
    fn offloaded_sysdump_file_is_correlated_by_source_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Running));
        mgr.create_dump(&DumpParams::new()).unwrap();

        let entry_dir = dir.path().join("00000001");
        fs::create_dir_all(&entry_dir).unwrap();
        let file = entry_dir.join("SYSDUMP.13F5D29.0000002A.1700000000");
        fs::write(&file, vec![0u8; 512]).unwrap();

        let mut batch = crate::watch::WatchBatch::new();
        batch.insert(file.clone(), crate::watch::WatchEventKind::ClosedForWrite);
        mgr.handle_watch(&batch);

        let entries = mgr.entries();
        assert_eq!(entries[0].status, OperationStatus::Completed);
        assert_eq!(entries[0].source_id, Some(SourceId(0x2A)));
        assert_eq!(entries[0].size_bytes, 512);
        assert_eq!(entries[0].file.as_deref(), Some(file.as_path()));
    }

    #[test]
    fn malformed_file_names_change_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Running));
        mgr.create_dump(&DumpParams::new()).unwrap();

        let entry_dir = dir.path().join("00000001");
        fs::create_dir_all(&entry_dir).unwrap();
        let file = entry_dir.join("SYSDUMP.not.a.valid.name");
        fs::write(&file, b"x").unwrap();

        let mut batch = crate::watch::WatchBatch::new();
        batch.insert(file, crate::watch::WatchEventKind::ClosedForWrite);
        mgr.handle_watch(&batch);

        assert_eq!(mgr.entries()[0].status, OperationStatus::InProgress);
    }

    #[test]
    fn delete_reaches_the_host_with_the_system_type_tag() {
        let dir = tempfile::tempdir().unwrap();
        let host = FakeHost::with_state(HostState::Running);
        let transport = Arc::new(FakeTransport::default());
        let mut mgr = SystemManager::new(
            &dw_config::RecordCategoryConfig {
                storage_dir: dir.path().to_path_buf(),
            },
            host,
            transport.clone(),
        )
        .unwrap();
        mgr.notify(SourceId(0x2A), 100).unwrap();

        mgr.delete(EntryId(1)).unwrap();
        assert_eq!(
            transport.deletes.lock().unwrap().as_slice(),
            &[(SourceId(0x2A), SYSTEM_DUMP_TYPE_TAG)]
        );
        assert!(mgr.entries().is_empty());
    }

    #[test]
    fn restore_reads_hex_directories_and_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Running));
            mgr.create_dump(&DumpParams::new()).unwrap();
            mgr.notify(SourceId(0x2A), 2048).unwrap();
        }

        let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Running));
        mgr.restore();
        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OperationStatus::Completed);
        assert_eq!(entries[0].source_id, Some(SourceId(0x2A)));
        assert_eq!(mgr.last_entry_id(), 1);
    }

    #[test]
    fn restore_finalizes_from_sysdump_files_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let entry_dir = dir.path().join("00000003");
        fs::create_dir_all(&entry_dir).unwrap();
        fs::write(
            entry_dir.join("SYSDUMP.13F5D29.000000AA.1700000000"),
            vec![0u8; 256],
        )
        .unwrap();

        let mut mgr = manager(dir.path(), FakeHost::with_state(HostState::Running));
        mgr.restore();
        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId(3));
        assert_eq!(entries[0].status, OperationStatus::Completed);
        assert_eq!(entries[0].source_id, Some(SourceId(0xAA)));
        assert_eq!(mgr.last_entry_id(), 3);
    }
}
