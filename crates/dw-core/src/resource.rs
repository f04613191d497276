//! Host resource dump manager.
//!
//! The host owns the dump bytes; the controller owns the entry. A create
//! request places an in-progress placeholder with an invalid source id —
//! the "awaiting correlation" slot, at most one at a time — and the
//! host's out-of-band notification later correlates it. A notification
//! with no placeholder is itself the complete record. Entries survive
//! restarts through durable records, not filenames.

use crate::entry::{EntryCore, EntrySnapshot};
use crate::host::{HostControl, HostTransport, RESOURCE_DUMP_TYPE_TAG};
use crate::{epoch_now_us, Result};
use dw_common::params::{self, DumpParams, KEY_PASSWORD, KEY_RESOURCE_SELECTOR};
use dw_common::{Error, EntryId, OperationStatus, SourceId};
use dw_record::EntryRecord;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Management object path root for resource dump entries.
const BASE_ENTRY_PATH: &str = "/dump/resource/entry";

/// One resource dump entry.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub core: EntryCore,
    pub source_id: SourceId,
    /// Resource selector forwarded to the host; empty selects the host's
    /// default non-disruptive dump.
    pub selector: String,
    password: String,
}

impl ResourceEntry {
    /// Correlate with the source report and finalize.
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
        record.resource_selector = Some(self.selector.clone());
        record.password = Some(self.password.clone());
        record
    }

    fn from_record(record: EntryRecord) -> ResourceEntry {
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
        ResourceEntry {
            core,
            source_id: record.source_id,
            selector: record.resource_selector.unwrap_or_default(),
            password: record.password.unwrap_or_default(),
        }
    }
}

/// Owner of the resource dump registry.
pub struct ResourceManager {
    storage_dir: PathBuf,
    entries: BTreeMap<u32, ResourceEntry>,
    last_entry_id: u32,
    host: Arc<dyn HostControl>,
    transport: Arc<dyn HostTransport>,
}

impl ResourceManager {
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

    /// Place the awaiting-correlation placeholder for a host resource
    /// dump.
    pub fn create_dump(&mut self, params: &DumpParams) -> Result<String> {
        if !self.host.is_running() {
            return Err(Error::not_allowed(
                "resource dump can be initiated only when the host is up",
            ));
        }
        if self
            .entries
            .values()
            .any(|e| e.core.status == OperationStatus::InProgress && !e.source_id.is_valid())
        {
            return Err(Error::unavailable(
                "a resource dump request is already awaiting completion",
            ));
        }

        let selector = match params::optional_str(params, KEY_RESOURCE_SELECTOR)? {
            Some(s) => s.to_string(),
            None => {
                info!("no resource selector given, the host will generate a default non-disruptive dump");
                String::new()
            }
        };
        let password = params::optional_str(params, KEY_PASSWORD)?
            .unwrap_or_default()
            .to_string();
        let (originator_id, originator_type) = params::extract_originator(params)?;

        let id = EntryId(self.last_entry_id + 1);
        let entry = ResourceEntry {
            core: EntryCore::in_progress(id, epoch_now_us(), originator_id, originator_type),
            source_id: SourceId::INVALID,
            selector,
            password,
        };
        self.persist(&entry)?;
        self.entries.insert(id.0, entry);
        self.last_entry_id = id.0;

        info!(id = %id, "resource dump requested, awaiting host notification");
        Ok(entry_path(id))
    }

    /// The host reported a completed resource dump.
    pub fn notify(&mut self, source_id: SourceId, size_bytes: u64) -> Result<()> {
        let timestamp_us = epoch_now_us();

        // A completed entry with this source id means a duplicate
        // notification; scan the whole registry before picking the
        // awaiting slot so the duplicate check always wins.
        let mut awaiting: Option<u32> = None;
        for (key, entry) in &self.entries {
            if entry.source_id == source_id && entry.core.status == OperationStatus::Completed {
                info!(
                    source_id = %source_id,
                    id = %entry.core.id,
                    "resource dump with this source id already present, ignoring notification"
                );
                return Ok(());
            }
            if entry.core.status == OperationStatus::InProgress
                && !entry.source_id.is_valid()
                && awaiting.is_none()
            {
                awaiting = Some(*key);
            }
        }

        if let Some(key) = awaiting {
            if let Some(entry) = self.entries.get_mut(&key) {
                info!(id = %entry.core.id, source_id = %source_id, size_bytes, "resource dump notification correlates placeholder");
                if entry.update(timestamp_us, size_bytes, source_id) {
                    let entry = entry.clone();
                    self.persist_best_effort(&entry);
                }
            }
            return Ok(());
        }

        // No placeholder: the notification is the complete record.
        let id = EntryId(self.last_entry_id + 1);
        info!(id = %id, source_id = %source_id, size_bytes, "resource dump notification creates new entry");
        let entry = ResourceEntry {
            core: EntryCore::completed(
                id,
                timestamp_us,
                size_bytes,
                String::new(),
                dw_common::OriginatorType::Internal,
            ),
            source_id,
            selector: String::new(),
            password: String::new(),
        };
        self.persist_best_effort(&entry);
        self.entries.insert(id.0, entry);
        self.last_entry_id = id.0;
        Ok(())
    }

    /// Ask the host to stream the dump to `uri`.
    ///
    /// The transport call precedes any visible state change; a transport
    /// failure leaves the entry untouched.
    pub fn initiate_offload(&mut self, id: EntryId, uri: String) -> Result<()> {
        let entry = self
            .entries
            .get_mut(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", id.to_string()))?;
        if entry.core.offload_in_flight() {
            return Err(Error::not_allowed("an offload for this dump is already in flight"));
        }
        if !self.host.is_running() {
            return Err(Error::not_allowed(
                "this dump can be offloaded only when the host is up",
            ));
        }
        if entry.core.status != OperationStatus::Completed || !entry.source_id.is_valid() {
            return Err(Error::not_allowed("dump is not yet completed by the host"));
        }

        info!(id = %id, uri = %uri, source_id = %entry.source_id, "resource dump offload requested");
        self.transport.request_offload(entry.source_id, id, &uri)?;
        entry.core.mark_offloaded(uri);
        let entry = self.entries[&id.0].clone();
        self.persist_best_effort(&entry);
        Ok(())
    }

    /// Delete an entry, issuing the best-effort remote delete first.
    ///
    /// Local cleanup proceeds even when the remote side fails — a stale
    /// host-side dump is recoverable, orphaned local storage is not — but
    /// the failure still surfaces to the caller.
    pub fn delete(&mut self, id: EntryId) -> Result<()> {
        let entry = self
            .entries
            .get(&id.0)
            .ok_or_else(|| Error::invalid_argument("EntryId", id.to_string()))?;
        if entry.core.offload_in_flight() && self.host.is_running() {
            return Err(Error::unavailable(
                "dump offload is in progress, cannot delete",
            ));
        }

        let mut remote_failure: Option<Error> = None;
        if self.host.is_running() && entry.source_id.is_valid() {
            if let Err(e) = self
                .transport
                .request_delete(entry.source_id, RESOURCE_DUMP_TYPE_TAG)
            {
                error!(id = %id, source_id = %entry.source_id, error = %e, "host-side resource dump delete failed");
                remote_failure = Some(e);
            }
        }

        crate::store::remove_entry_dir(&self.storage_dir, id);
        self.entries.remove(&id.0);
        info!(id = %id, "resource dump entry deleted");

        match remote_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebuild the registry from durable records after a restart.
    pub fn restore(&mut self) {
        if !self.storage_dir.exists() {
            return;
        }
        let children = match fs::read_dir(&self.storage_dir) {
            Ok(children) => children,
            Err(e) => {
                error!(dir = %self.storage_dir.display(), error = %e, "cannot read resource storage directory");
                return;
            }
        };

        for child in children.flatten() {
            let path = child.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if !path.is_dir() {
                continue;
            }
            // The high-water mark counts every candidate id, even ones
            // whose record turns out unreadable: ids are never reused.
            self.last_entry_id = self.last_entry_id.max(id);

            match EntryRecord::read(&path) {
                Ok(record) => {
                    let entry = ResourceEntry::from_record(record);
                    self.entries.insert(id, entry);
                }
                Err(e) => {
                    error!(id, error = %e, "skipping resource dump entry with unreadable record");
                }
            }
        }
        info!(
            entries = self.entries.len(),
            last_id = self.last_entry_id,
            "resource dump registry restored"
        );
    }

    /// Read-only view of the registry, ordered by id.
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        self.entries.values().map(ResourceEntry::snapshot).collect()
    }

    /// The high-water mark of assigned ids.
    pub fn last_entry_id(&self) -> u32 {
        self.last_entry_id
    }

    fn persist(&self, entry: &ResourceEntry) -> Result<()> {
        let dir = self.storage_dir.join(entry.core.id.to_string());
        entry
            .to_record()
            .write(&dir)
            .map_err(|e| Error::internal(format!("persisting entry {}: {e}", entry.core.id)))
    }

    fn persist_best_effort(&self, entry: &ResourceEntry) {
        if let Err(e) = self.persist(entry) {
            warn!(id = %entry.core.id, error = %e, "entry record write failed, state survives only in memory");
        }
    }
}

/// Object path for one entry.
fn entry_path(id: EntryId) -> String {
    format!("{BASE_ENTRY_PATH}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostState;
    use dw_common::ParamValue;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeHost {
        running: AtomicBool,
    }

    impl FakeHost {
        fn up() -> Arc<Self> {
            Arc::new(Self {
                running: AtomicBool::new(true),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                running: AtomicBool::new(false),
            })
        }
    }

    impl HostControl for FakeHost {
        fn state(&self) -> HostState {
            if self.running.load(Ordering::SeqCst) {
                HostState::Running
            } else {
                HostState::Off
            }
        }

        fn system_dump_in_progress(&self) -> bool {
            false
        }

        fn start_platform_dump(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        fail: AtomicBool,
        offloads: Mutex<Vec<(SourceId, EntryId, String)>>,
        deletes: Mutex<Vec<(SourceId, u32)>>,
    }

    impl HostTransport for FakeTransport {
        fn request_offload(&self, source_id: SourceId, id: EntryId, uri: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::unavailable("transport down"));
            }
            self.offloads.lock().unwrap().push((source_id, id, uri.to_string()));
            Ok(())
        }

        fn request_delete(&self, source_id: SourceId, type_tag: u32) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::unavailable("transport down"));
            }
            self.deletes.lock().unwrap().push((source_id, type_tag));
            Ok(())
        }
    }

    fn manager_with(
        dir: &Path,
        host: Arc<FakeHost>,
        transport: Arc<FakeTransport>,
    ) -> ResourceManager {
        ResourceManager::new(
            &dw_config::RecordCategoryConfig {
                storage_dir: dir.to_path_buf(),
            },
            host,
            transport,
        )
        .unwrap()
    }

    fn selector_params(selector: &str) -> DumpParams {
        [
            (KEY_RESOURCE_SELECTOR.to_string(), ParamValue::from(selector)),
            (KEY_PASSWORD.to_string(), ParamValue::from("secret")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn create_requires_running_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_with(dir.path(), FakeHost::down(), Arc::new(FakeTransport::default()));
        let err = mgr.create_dump(&DumpParams::new()).unwrap_err();
        assert!(matches!(err, Error::NotAllowed { .. }));
        assert!(mgr.entries().is_empty());
    }

    #[test]
    fn only_one_awaiting_slot_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
        mgr.create_dump(&selector_params("proc/lpar1")).unwrap();
        let err = mgr.create_dump(&selector_params("proc/lpar2")).unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        assert_eq!(mgr.entries().len(), 1);
    }

    #[test]
    fn notify_after_create_updates_the_same_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
        mgr.create_dump(&selector_params("proc/lpar1")).unwrap();

        mgr.notify(SourceId(42), 8192).unwrap();
        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId(1));
        assert_eq!(entries[0].status, OperationStatus::Completed);
        assert_eq!(entries[0].source_id, Some(SourceId(42)));
        assert_eq!(entries[0].size_bytes, 8192);
    }

    #[test]
    fn notify_without_placeholder_creates_completed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
        mgr.notify(SourceId(42), 4096).unwrap();

        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, OperationStatus::Completed);
        assert_eq!(entries[0].source_id, Some(SourceId(42)));
    }

    #[test]
    fn duplicate_notification_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
        mgr.create_dump(&selector_params("proc/lpar1")).unwrap();
        mgr.notify(SourceId(42), 100).unwrap();
        mgr.notify(SourceId(42), 999).unwrap();

        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size_bytes, 100);
    }

    #[test]
    fn offload_goes_through_transport_before_state_changes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::default());
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::clone(&transport));
        mgr.create_dump(&selector_params("proc/lpar1")).unwrap();
        mgr.notify(SourceId(7), 100).unwrap();

        transport.fail.store(true, Ordering::SeqCst);
        let err = mgr.initiate_offload(EntryId(1), "nbd://host/0".into()).unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        assert!(mgr.entries()[0].offload_uri.is_empty());

        transport.fail.store(false, Ordering::SeqCst);
        mgr.initiate_offload(EntryId(1), "nbd://host/0".into()).unwrap();
        assert_eq!(mgr.entries()[0].offload_uri, "nbd://host/0");
        assert_eq!(
            transport.offloads.lock().unwrap().as_slice(),
            &[(SourceId(7), EntryId(1), "nbd://host/0".to_string())]
        );
    }

    #[test]
    fn offload_of_uncorrelated_dump_is_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
        mgr.create_dump(&selector_params("proc/lpar1")).unwrap();
        let err = mgr.initiate_offload(EntryId(1), "nbd://host/0".into()).unwrap_err();
        assert!(matches!(err, Error::NotAllowed { .. }));
    }

    #[test]
    fn delete_with_offload_in_flight_is_refused_while_host_up() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::default());
        let host = FakeHost::up();
        let mut mgr = manager_with(dir.path(), Arc::clone(&host), transport);
        mgr.create_dump(&selector_params("proc/lpar1")).unwrap();
        mgr.notify(SourceId(7), 100).unwrap();
        mgr.initiate_offload(EntryId(1), "nbd://host/0".into()).unwrap();

        let err = mgr.delete(EntryId(1)).unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        assert_eq!(mgr.entries().len(), 1);

        // Host going down releases the guard.
        host.running.store(false, Ordering::SeqCst);
        mgr.delete(EntryId(1)).unwrap();
        assert!(mgr.entries().is_empty());
    }

    #[test]
    fn delete_issues_remote_delete_and_cleans_up_even_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::default());
        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::clone(&transport));
        mgr.notify(SourceId(7), 100).unwrap();

        transport.fail.store(true, Ordering::SeqCst);
        let err = mgr.delete(EntryId(1)).unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        // Local cleanup happened regardless of the remote failure.
        assert!(mgr.entries().is_empty());
        assert!(!dir.path().join("1").exists());
    }

    #[test]
    fn restore_round_trips_records_and_skips_corrupt_ones() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut mgr =
                manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
            mgr.create_dump(&selector_params("proc/lpar1")).unwrap();
            mgr.notify(SourceId(42), 100).unwrap();
            mgr.notify(SourceId(43), 200).unwrap();
        }
        // Corrupt the second entry's record.
        fs::write(
            EntryRecord::path_in(&dir.path().join("2")),
            b"{ not json",
        )
        .unwrap();

        let mut mgr = manager_with(dir.path(), FakeHost::up(), Arc::new(FakeTransport::default()));
        mgr.restore();

        let entries = mgr.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source_id, Some(SourceId(42)));
        assert_eq!(entries[0].size_bytes, 100);
        // The bad entry still pushed the high-water mark: no id reuse.
        assert_eq!(mgr.last_entry_id(), 2);

        // Selector survives the round trip.
        let record = EntryRecord::read(&dir.path().join("1")).unwrap();
        assert_eq!(record.resource_selector.as_deref(), Some("proc/lpar1"));
    }
}
