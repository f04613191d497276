//! Filesystem watch over dump storage directories.
//!
//! Completion of a locally captured dump is observed from the filesystem,
//! not from the collection tool: a non-recursive watch on the storage
//! root catches new per-id subdirectories, each of which then gets its
//! own watch for the dump file being closed after write. Events are
//! normalized to `{Created, ClosedForWrite}`, batched per backend
//! callback, and delivered to the owning manager as one map.
//!
//! The watcher thread owns the backend; the manager never touches watch
//! descriptors. Subdirectory watches are torn down as soon as the file
//! close is seen.

use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Normalized watch event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A directory entry appeared under the storage root.
    Created,
    /// A file open for writing was closed.
    ClosedForWrite,
}

/// One batch of normalized events, keyed by path.
pub type WatchBatch = BTreeMap<PathBuf, WatchEventKind>;

/// Map a raw backend event onto the normalized kinds.
///
/// Everything except creations and write-closes is dropped here; rename
/// and metadata noise never reaches the managers.
pub fn map_notify_event(event: &Event) -> Vec<(PathBuf, WatchEventKind)> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => WatchEventKind::ClosedForWrite,
        _ => return Vec::new(),
    };
    event.paths.iter().map(|p| (p.clone(), kind)).collect()
}

/// A storage-directory watcher delivering batched events.
///
/// Dropping the watcher stops its thread.
pub struct DumpWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DumpWatcher {
    /// Watch `root` and deliver each event batch through `deliver`.
    ///
    /// `root` must exist. Per-id subdirectories present at spawn time are
    /// not watched retroactively; restore handles files that predate the
    /// watch.
    pub fn spawn(
        root: &Path,
        deliver: impl Fn(WatchBatch) + Send + 'static,
    ) -> notify::Result<DumpWatcher> {
        let (event_tx, event_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            // Receiver gone means the watcher is shutting down.
            let _ = event_tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let root = root.to_path_buf();
        let root_in_errors = root.clone();

        let thread = thread::Builder::new()
            .name("dw-watch".to_string())
            .spawn(move || {
                run_watch_loop(watcher, &root, &event_rx, &stop_flag, &deliver);
            })
            .map_err(|e| notify::Error::io(e).add_path(root_in_errors))?;

        Ok(DumpWatcher {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for DumpWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_watch_loop(
    mut watcher: RecommendedWatcher,
    root: &Path,
    event_rx: &mpsc::Receiver<notify::Result<Event>>,
    stop: &AtomicBool,
    deliver: &(impl Fn(WatchBatch) + Send + 'static),
) {
    while !stop.load(Ordering::Acquire) {
        let first = match event_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut batch = WatchBatch::new();
        collect_into_batch(&mut watcher, root, first, &mut batch);
        // Drain whatever arrived in the same burst.
        while let Ok(event) = event_rx.try_recv() {
            collect_into_batch(&mut watcher, root, event, &mut batch);
        }

        if !batch.is_empty() {
            deliver(batch);
        }
    }
}

fn collect_into_batch(
    watcher: &mut RecommendedWatcher,
    root: &Path,
    event: notify::Result<Event>,
    batch: &mut WatchBatch,
) {
    let event = match event {
        Ok(event) => event,
        Err(error) => {
            warn!(error = %error, "watch backend emitted error");
            return;
        }
    };

    for (path, kind) in map_notify_event(&event) {
        match kind {
            WatchEventKind::Created if path.is_dir() && path.parent() == Some(root) => {
                // New per-id subdirectory: watch it for the dump file.
                if let Err(error) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!(path = %path.display(), error = %error, "failed to watch new dump subdirectory");
                }
                debug!(path = %path.display(), "watching new dump subdirectory");
            }
            WatchEventKind::ClosedForWrite if !path.is_dir() => {
                // Dump file finished: the subdirectory watch has served
                // its purpose.
                if let Some(parent) = path.parent() {
                    if parent != root {
                        let _ = watcher.unwatch(parent);
                    }
                }
            }
            _ => {}
        }
        batch.insert(path, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Instant;

    #[test]
    fn mapping_keeps_only_creations_and_write_closes() {
        let create = Event::new(EventKind::Create(notify::event::CreateKind::Folder))
            .add_path(PathBuf::from("/d/1"));
        assert_eq!(
            map_notify_event(&create),
            vec![(PathBuf::from("/d/1"), WatchEventKind::Created)]
        );

        let close = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Write)))
            .add_path(PathBuf::from("/d/1/obmcdump_1_1.tar"));
        assert_eq!(
            map_notify_event(&close),
            vec![(
                PathBuf::from("/d/1/obmcdump_1_1.tar"),
                WatchEventKind::ClosedForWrite
            )]
        );

        let other = Event::new(EventKind::Access(AccessKind::Close(AccessMode::Read)))
            .add_path(PathBuf::from("/d/1/x"));
        assert!(map_notify_event(&other).is_empty());
    }

    // Exercises the real backend: requires a working inotify (Linux CI).
    #[test]
    #[cfg(target_os = "linux")]
    fn file_close_in_new_subdirectory_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let seen: Arc<Mutex<Vec<WatchBatch>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _watcher = DumpWatcher::spawn(dir.path(), move |batch| {
            sink.lock().unwrap().push(batch);
        })
        .unwrap();

        let entry_dir = dir.path().join("1");
        fs::create_dir(&entry_dir).unwrap();
        // Give the backend a beat to arm the subdirectory watch.
        thread::sleep(Duration::from_millis(300));
        let file = entry_dir.join("obmcdump_1_1700000000.tar");
        fs::write(&file, b"payload").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            {
                let batches = seen.lock().unwrap();
                if batches
                    .iter()
                    .any(|b| b.get(&file) == Some(&WatchEventKind::ClosedForWrite))
                {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "close-write event never arrived");
            thread::sleep(Duration::from_millis(50));
        }
    }
}
