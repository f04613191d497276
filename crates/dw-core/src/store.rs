//! Shared machinery for locally stored dump categories.
//!
//! BMC and fault-log dumps both keep one subdirectory per entry id under
//! their storage root, with the dump file's name carrying id and
//! timestamp. The helpers here implement the pieces the two managers
//! share: adopting a finished file into the registry, the restore walk,
//! and best-effort removal of an entry's on-disk tree.

use crate::entry::{EntryCore, EntrySnapshot};
use crate::filename;
use dw_common::{EntryId, OriginatorType};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// A locally stored dump entry.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub core: EntryCore,
    /// Path of the dump file; empty until capture completes.
    pub file: PathBuf,
}

impl LocalEntry {
    pub fn snapshot(&self) -> EntrySnapshot {
        let mut snap = EntrySnapshot::from_core(&self.core);
        if !self.file.as_os_str().is_empty() {
            snap.file = Some(self.file.clone());
        }
        snap
    }
}

/// Registry of locally stored entries, ordered by id for eviction.
pub type LocalRegistry = BTreeMap<u32, LocalEntry>;

/// Adopt a finished dump file into the registry.
///
/// Called for every close-write the watcher reports and for every file
/// met during restore. The filename is parsed against the stored-name
/// contract with the category's `prefix`; an existing in-progress entry
/// with the embedded id is finalized, an unknown id becomes a new
/// completed entry (restore, or a file arriving with no prior request).
/// Returns the affected id, or `None` when the file was skipped.
pub fn adopt_file(registry: &mut LocalRegistry, prefix: &str, file: &Path) -> Option<EntryId> {
    let name = file.file_name()?.to_str()?;
    let Some(parsed) = filename::parse_stored(name) else {
        error!(file = %file.display(), "invalid dump file name, skipping");
        return None;
    };
    if parsed.prefix != prefix {
        error!(
            file = %file.display(),
            expected = prefix,
            "dump file name carries a foreign prefix, skipping"
        );
        return None;
    }

    let size = match fs::metadata(file) {
        Ok(meta) => meta.len(),
        Err(e) => {
            error!(file = %file.display(), error = %e, "cannot stat dump file, skipping");
            return None;
        }
    };

    if let Some(entry) = registry.get_mut(&parsed.id) {
        if entry.core.complete(parsed.timestamp_us, size) {
            entry.file = file.to_path_buf();
            info!(id = parsed.id, size_bytes = size, "dump entry completed");
        }
        return Some(EntryId(parsed.id));
    }

    let core = EntryCore::completed(
        EntryId(parsed.id),
        parsed.timestamp_us,
        size,
        String::new(),
        OriginatorType::Internal,
    );
    registry.insert(
        parsed.id,
        LocalEntry {
            core,
            file: file.to_path_buf(),
        },
    );
    debug!(id = parsed.id, file = %file.display(), "dump entry adopted from file");
    Some(EntryId(parsed.id))
}

/// Rebuild a registry from the storage directory.
///
/// Immediate children whose name is a decimal id are candidate entries;
/// every regular file inside one goes through [`adopt_file`]. Returns the
/// highest id observed (from directory names and file names both), which
/// the caller folds into its high-water mark. A single bad entry never
/// fails the walk.
pub fn restore(registry: &mut LocalRegistry, prefix: &str, storage_dir: &Path) -> u32 {
    let mut max_id = 0u32;
    if !storage_dir.exists() {
        return max_id;
    }
    let children = match fs::read_dir(storage_dir) {
        Ok(children) => children,
        Err(e) => {
            error!(dir = %storage_dir.display(), error = %e, "cannot read storage directory");
            return max_id;
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
        max_id = max_id.max(id);

        let files = match fs::read_dir(&path) {
            Ok(files) => files,
            Err(e) => {
                error!(dir = %path.display(), error = %e, "cannot read entry directory, skipping");
                continue;
            }
        };
        for file in files.flatten() {
            let file_path = file.path();
            if file_path.is_dir() {
                continue;
            }
            if let Some(adopted) = adopt_file(registry, prefix, &file_path) {
                max_id = max_id.max(adopted.0);
            }
        }
    }

    info!(
        dir = %storage_dir.display(),
        entries = registry.len(),
        last_id = max_id,
        "local dump registry restored"
    );
    max_id
}

/// Eviction source over a local registry: lowest id first, entries with
/// an offload in flight skipped.
pub struct StoredEviction<'a> {
    pub storage_dir: &'a Path,
    pub entries: &'a mut LocalRegistry,
}

impl crate::quota::EvictionSink for StoredEviction<'_> {
    fn evict_oldest(&mut self) -> Option<EntryId> {
        let id = self
            .entries
            .iter()
            .find(|(_, e)| !e.core.offload_in_flight())
            .map(|(id, _)| *id)?;
        self.entries.remove(&id);
        remove_entry_dir(self.storage_dir, EntryId(id));
        Some(EntryId(id))
    }
}

/// Remove an entry's on-disk tree, best-effort.
///
/// An I/O failure here is logged and swallowed: a stale directory is less
/// harmful than a registry entry that refuses to die over a storage
/// fault.
pub fn remove_entry_dir(storage_dir: &Path, id: EntryId) {
    let dir = storage_dir.join(id.to_string());
    if let Err(e) = fs::remove_dir_all(&dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!(dir = %dir.display(), error = %e, "failed to delete dump entry tree");
        }
    }
}
