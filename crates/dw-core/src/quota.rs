//! Storage quota admission and eviction.
//!
//! The enforcer answers one question before a capture is admitted: how
//! many bytes may this dump occupy? It sums the category directory (each
//! file rounded up to a 1 KiB block, the accounting granularity of the
//! collection tool), applies the minimum-free-space threshold, and either
//! fails with `QuotaExceeded` or — when eviction is enabled — deletes the
//! oldest entries one at a time, re-measuring after each, until the
//! threshold is met or candidates run out.

use dw_common::{Error, EntryId, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Accounting block size: every file is charged in whole 1 KiB units.
const BLOCK_BYTES: u64 = 1024;

/// Quota parameters for one locally stored category.
#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    /// Total bytes the category may occupy.
    pub total_bytes: u64,
    /// Minimum free bytes required to admit a new capture.
    pub min_free_bytes: u64,
    /// Per-capture size cap in bytes.
    pub max_dump_bytes: u64,
    /// Delete oldest entries to make room instead of failing.
    pub evict_oldest: bool,
}

impl From<&dw_config::StoredCategoryConfig> for QuotaPolicy {
    fn from(cfg: &dw_config::StoredCategoryConfig) -> Self {
        Self {
            total_bytes: cfg.total_bytes,
            min_free_bytes: cfg.min_free_bytes,
            max_dump_bytes: cfg.max_dump_bytes,
            evict_oldest: cfg.evict_oldest,
        }
    }
}

/// Supplies eviction candidates, oldest (lowest id) first.
///
/// Implemented by the managers; an implementation must skip entries whose
/// offload is in flight and must remove both the registry entry and its
/// on-disk tree.
pub trait EvictionSink {
    /// Evict the oldest evictable entry. Returns its id, or `None` when
    /// no candidate remains.
    fn evict_oldest(&mut self) -> Option<EntryId>;
}

/// No-eviction sink for categories or paths where rotation never applies.
pub struct NoEviction;

impl EvictionSink for NoEviction {
    fn evict_oldest(&mut self) -> Option<EntryId> {
        None
    }
}

/// Recursive directory size in bytes, each file rounded up to 1 KiB.
///
/// A missing directory measures zero (the first capture creates it).
pub fn directory_size(dir: &Path) -> std::io::Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for dirent in fs::read_dir(&current)? {
            let dirent = dirent?;
            let meta = dirent.metadata()?;
            if meta.is_dir() {
                stack.push(dirent.path());
            } else {
                total += meta.len().div_ceil(BLOCK_BYTES) * BLOCK_BYTES;
            }
        }
    }
    Ok(total)
}

impl QuotaPolicy {
    /// Bytes a new capture may occupy, after any eviction.
    ///
    /// Fails with [`Error::QuotaExceeded`] when free space is below the
    /// minimum threshold and either eviction is disabled or candidates
    /// are exhausted. The returned size never exceeds the per-capture cap.
    pub fn allowed_size(&self, dir: &Path, sink: &mut dyn EvictionSink) -> Result<u64> {
        let mut free = self.free_bytes(dir)?;

        if free < self.min_free_bytes {
            if !self.evict_oldest {
                return Err(Error::quota_exceeded(
                    "not enough space, delete old dumps",
                ));
            }
            while free < self.min_free_bytes {
                let Some(evicted) = sink.evict_oldest() else {
                    return Err(Error::quota_exceeded(
                        "eviction candidates exhausted before reaching the free-space threshold",
                    ));
                };
                // Re-measure rather than trusting the entry's recorded
                // size: partially written trees and stray files count too.
                free = self.free_bytes(dir)?;
                info!(id = %evicted, free_bytes = free, "evicted oldest dump entry");
            }
        }

        let allowed = free.min(self.max_dump_bytes);
        debug!(free_bytes = free, allowed_bytes = allowed, "quota admission");
        Ok(allowed)
    }

    fn free_bytes(&self, dir: &Path) -> Result<u64> {
        let used = directory_size(dir).map_err(|e| {
            Error::internal(format!("sizing {} failed: {e}", dir.display()))
        })?;
        Ok(self.total_bytes.saturating_sub(used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn policy(evict: bool) -> QuotaPolicy {
        QuotaPolicy {
            total_bytes: 1000 * BLOCK_BYTES,
            min_free_bytes: 100 * BLOCK_BYTES,
            max_dump_bytes: 500 * BLOCK_BYTES,
            evict_oldest: evict,
        }
    }

    /// Sink deleting lowest-id subdirectories of a tempdir registry.
    struct DirSink<'a> {
        dir: &'a Path,
        ids: BTreeMap<u32, ()>,
    }

    impl EvictionSink for DirSink<'_> {
        fn evict_oldest(&mut self) -> Option<EntryId> {
            let id = *self.ids.keys().next()?;
            self.ids.remove(&id);
            fs::remove_dir_all(self.dir.join(id.to_string())).ok();
            Some(EntryId(id))
        }
    }

    fn write_entry(dir: &Path, id: u32, blocks: u64) {
        let entry_dir = dir.join(id.to_string());
        fs::create_dir_all(&entry_dir).unwrap();
        fs::write(
            entry_dir.join(format!("obmcdump_{id}_1700000000.tar")),
            vec![0u8; (blocks * BLOCK_BYTES) as usize],
        )
        .unwrap();
    }

    #[test]
    fn missing_directory_measures_zero() {
        assert_eq!(directory_size(Path::new("/nonexistent/dw-quota")).unwrap(), 0);
    }

    #[test]
    fn files_are_charged_in_whole_blocks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 1]).unwrap();
        fs::write(dir.path().join("b"), vec![0u8; 1025]).unwrap();
        assert_eq!(directory_size(dir.path()).unwrap(), 3 * BLOCK_BYTES);
    }

    #[test]
    fn full_directory_without_eviction_is_quota_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(dir.path(), 1, 950);
        let err = policy(false)
            .allowed_size(dir.path(), &mut NoEviction)
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[test]
    fn eviction_deletes_lowest_ids_until_threshold() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(dir.path(), 1, 300);
        write_entry(dir.path(), 2, 300);
        write_entry(dir.path(), 3, 350);

        let mut sink = DirSink {
            dir: dir.path(),
            ids: [(1, ()), (2, ()), (3, ())].into_iter().collect(),
        };
        let allowed = policy(true).allowed_size(dir.path(), &mut sink).unwrap();

        // Evicting id 1 frees 300 blocks, meeting the 100-block threshold.
        assert!(!sink.ids.contains_key(&1));
        assert!(sink.ids.contains_key(&2));
        assert_eq!(allowed, 350 * BLOCK_BYTES);
    }

    #[test]
    fn eviction_exhaustion_is_quota_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        // A stray file no sink candidate accounts for.
        fs::write(dir.path().join("stray"), vec![0u8; (950 * BLOCK_BYTES) as usize]).unwrap();
        let mut sink = DirSink {
            dir: dir.path(),
            ids: BTreeMap::new(),
        };
        let err = policy(true).allowed_size(dir.path(), &mut sink).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[test]
    fn allowed_size_is_capped_at_per_capture_max() {
        let dir = tempfile::tempdir().unwrap();
        let allowed = policy(false)
            .allowed_size(dir.path(), &mut NoEviction)
            .unwrap();
        assert_eq!(allowed, 500 * BLOCK_BYTES);
    }
}
