//! Single-threaded event loop over all dump managers.
//!
//! Three event sources feed one channel — management API requests,
//! filesystem watch batches, and subprocess exits — and one loop thread
//! owns every manager, so entry state never needs a lock and no two
//! handlers run concurrently. Ordering between sources is whatever the
//! channel delivers; the managers' correlation invariants absorb
//! notify-before-create, create-before-notify, and file-before-entry
//! races.
//!
//! [`ServiceHandle`] is the in-process management API surface; an IPC
//! binding would translate its transport onto these calls.

use crate::bmc::BmcManager;
use crate::entry::EntrySnapshot;
use crate::faultlog::FaultLogManager;
use crate::host::{HostControl, HostTransport};
use crate::resource::ResourceManager;
use crate::supervise::ExitEvent;
use crate::system::SystemManager;
use crate::watch::{DumpWatcher, WatchBatch};
use dw_common::params::DumpParams;
use dw_common::{Error, EntryId, Result, SourceId};
use dw_config::Config;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dump category addressed by a management call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpCategory {
    Bmc,
    FaultLog,
    Resource,
    System,
}

/// One management API request, carrying its reply channel.
pub enum ApiRequest {
    CreateDump {
        category: DumpCategory,
        params: DumpParams,
        reply: Sender<Result<String>>,
    },
    Notify {
        category: DumpCategory,
        source_id: SourceId,
        size_bytes: u64,
        reply: Sender<Result<()>>,
    },
    InitiateOffload {
        category: DumpCategory,
        id: EntryId,
        uri: String,
        reply: Sender<Result<()>>,
    },
    Delete {
        category: DumpCategory,
        id: EntryId,
        reply: Sender<Result<()>>,
    },
    Entries {
        category: DumpCategory,
        reply: Sender<Vec<EntrySnapshot>>,
    },
    /// Re-run the registry rebuild from disk (normally a startup step).
    Restore {
        reply: Sender<()>,
    },
    Shutdown,
}

/// Everything the loop can be woken by.
pub enum LoopEvent {
    Api(ApiRequest),
    Watch {
        category: DumpCategory,
        batch: WatchBatch,
    },
    ChildExited {
        category: DumpCategory,
        exit: ExitEvent,
    },
}

/// The loop and the managers it owns.
pub struct Service {
    rx: Receiver<LoopEvent>,
    tx: Sender<LoopEvent>,
    bmc: BmcManager,
    faultlog: FaultLogManager,
    resource: ResourceManager,
    system: SystemManager,
    watchers: Vec<DumpWatcher>,
}

impl Service {
    /// Build every manager against `config` and the host collaborators.
    /// Storage directories are created here.
    pub fn new(
        config: &Config,
        host: Arc<dyn HostControl>,
        transport: Arc<dyn HostTransport>,
    ) -> std::io::Result<Service> {
        let (tx, rx) = mpsc::channel();

        let exit_tx = tx.clone();
        let bmc = BmcManager::new(
            &config.bmc,
            &config.collector,
            Arc::new(move |exit| {
                // Loop gone means shutdown; nothing left to update.
                let _ = exit_tx.send(LoopEvent::ChildExited {
                    category: DumpCategory::Bmc,
                    exit,
                });
            }),
        )?;
        let faultlog = FaultLogManager::new(&config.faultlog)?;
        let resource = ResourceManager::new(
            &config.resource,
            Arc::clone(&host),
            Arc::clone(&transport),
        )?;
        let system = SystemManager::new(&config.system, host, transport)?;

        Ok(Service {
            rx,
            tx,
            bmc,
            faultlog,
            resource,
            system,
            watchers: Vec::new(),
        })
    }

    /// The in-process management API surface. Clones freely.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            tx: self.tx.clone(),
        }
    }

    /// Rebuild every registry from disk, then run the startup core-file
    /// sweep. Restore failures are per-entry; this never fails startup.
    pub fn restore(&mut self) {
        self.restore_registries();
        if let Err(e) = self.bmc.sweep_core_files() {
            warn!(error = %e, "startup core-file sweep failed");
        }
    }

    fn restore_registries(&mut self) {
        self.bmc.restore();
        self.faultlog.restore();
        self.resource.restore();
        self.system.restore();
    }

    /// Arm the storage watchers for the file-backed categories.
    pub fn watch_storage(&mut self) -> notify::Result<()> {
        for (category, dir) in [
            (DumpCategory::Bmc, self.bmc.storage_dir().to_path_buf()),
            (DumpCategory::FaultLog, self.faultlog.storage_dir().to_path_buf()),
            (DumpCategory::System, self.system.storage_dir().to_path_buf()),
        ] {
            let tx = self.tx.clone();
            let watcher = DumpWatcher::spawn(&dir, move |batch| {
                let _ = tx.send(LoopEvent::Watch { category, batch });
            })?;
            self.watchers.push(watcher);
        }
        Ok(())
    }

    /// Run the loop until shutdown.
    pub fn run(mut self) {
        info!("dump service loop running");
        while let Ok(event) = self.rx.recv() {
            match event {
                LoopEvent::Api(ApiRequest::Shutdown) => break,
                LoopEvent::Api(request) => self.dispatch(request),
                LoopEvent::Watch { category, batch } => match category {
                    DumpCategory::Bmc => self.bmc.handle_watch(&batch),
                    DumpCategory::FaultLog => self.faultlog.handle_watch(&batch),
                    DumpCategory::System => self.system.handle_watch(&batch),
                    DumpCategory::Resource => {
                        debug!("watch batch for a category without local artifacts, ignoring");
                    }
                },
                LoopEvent::ChildExited { category, exit } => match category {
                    DumpCategory::Bmc => self.bmc.handle_child_exit(exit),
                    _ => debug!(pid = exit.pid, ?category, "child exit for a category without captures"),
                },
            }
        }
        info!("dump service loop stopped");
    }

    fn dispatch(&mut self, request: ApiRequest) {
        match request {
            ApiRequest::CreateDump {
                category,
                params,
                reply,
            } => {
                let result = match category {
                    DumpCategory::Bmc => self.bmc.create_dump(&params),
                    DumpCategory::FaultLog => self.faultlog.create_dump(&params),
                    DumpCategory::Resource => self.resource.create_dump(&params),
                    DumpCategory::System => self.system.create_dump(&params),
                };
                let _ = reply.send(result);
            }
            ApiRequest::Notify {
                category,
                source_id,
                size_bytes,
                reply,
            } => {
                let result = match category {
                    DumpCategory::Resource => self.resource.notify(source_id, size_bytes),
                    DumpCategory::System => self.system.notify(source_id, size_bytes),
                    DumpCategory::Bmc | DumpCategory::FaultLog => Err(Error::invalid_argument(
                        "Category",
                        "not a notification-driven dump category",
                    )),
                };
                let _ = reply.send(result);
            }
            ApiRequest::InitiateOffload {
                category,
                id,
                uri,
                reply,
            } => {
                let result = match category {
                    DumpCategory::Bmc => self.bmc.initiate_offload(id, uri),
                    DumpCategory::FaultLog => self.faultlog.initiate_offload(id, uri),
                    DumpCategory::Resource => self.resource.initiate_offload(id, uri),
                    DumpCategory::System => self.system.initiate_offload(id, uri),
                };
                let _ = reply.send(result);
            }
            ApiRequest::Delete { category, id, reply } => {
                let result = match category {
                    DumpCategory::Bmc => self.bmc.delete(id),
                    DumpCategory::FaultLog => self.faultlog.delete(id),
                    DumpCategory::Resource => self.resource.delete(id),
                    DumpCategory::System => self.system.delete(id),
                };
                let _ = reply.send(result);
            }
            ApiRequest::Entries { category, reply } => {
                let snapshots = match category {
                    DumpCategory::Bmc => self.bmc.entries(),
                    DumpCategory::FaultLog => self.faultlog.entries(),
                    DumpCategory::Resource => self.resource.entries(),
                    DumpCategory::System => self.system.entries(),
                };
                let _ = reply.send(snapshots);
            }
            ApiRequest::Restore { reply } => {
                self.restore_registries();
                let _ = reply.send(());
            }
            ApiRequest::Shutdown => {}
        }
    }
}

/// Cloneable, thread-safe front door to the service loop.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: Sender<LoopEvent>,
}

impl ServiceHandle {
    fn roundtrip<T>(&self, request: ApiRequest, reply_rx: Receiver<T>) -> Result<T> {
        self.tx
            .send(LoopEvent::Api(request))
            .map_err(|_| Error::internal("dump service loop is not running"))?;
        reply_rx
            .recv()
            .map_err(|_| Error::internal("dump service loop dropped the request"))
    }

    /// Create a dump; returns the new entry's object path.
    pub fn create_dump(&self, category: DumpCategory, params: DumpParams) -> Result<String> {
        let (reply, reply_rx) = mpsc::channel();
        self.roundtrip(
            ApiRequest::CreateDump {
                category,
                params,
                reply,
            },
            reply_rx,
        )?
    }

    /// Deliver an out-of-band completion notification.
    pub fn notify(&self, category: DumpCategory, source_id: SourceId, size_bytes: u64) -> Result<()> {
        let (reply, reply_rx) = mpsc::channel();
        self.roundtrip(
            ApiRequest::Notify {
                category,
                source_id,
                size_bytes,
                reply,
            },
            reply_rx,
        )?
    }

    /// Request an offload of one entry to `uri`.
    pub fn initiate_offload(&self, category: DumpCategory, id: EntryId, uri: String) -> Result<()> {
        let (reply, reply_rx) = mpsc::channel();
        self.roundtrip(
            ApiRequest::InitiateOffload {
                category,
                id,
                uri,
                reply,
            },
            reply_rx,
        )?
    }

    /// Delete one entry.
    pub fn delete(&self, category: DumpCategory, id: EntryId) -> Result<()> {
        let (reply, reply_rx) = mpsc::channel();
        self.roundtrip(ApiRequest::Delete { category, id, reply }, reply_rx)?
    }

    /// Snapshot a category's registry.
    pub fn entries(&self, category: DumpCategory) -> Result<Vec<EntrySnapshot>> {
        let (reply, reply_rx) = mpsc::channel();
        self.roundtrip(ApiRequest::Entries { category, reply }, reply_rx)
    }

    /// Re-run the registry rebuild from disk.
    pub fn restore(&self) -> Result<()> {
        let (reply, reply_rx) = mpsc::channel();
        self.roundtrip(ApiRequest::Restore { reply }, reply_rx)
    }

    /// Stop the loop. Idempotent; a dead loop is already stopped.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LoopEvent::Api(ApiRequest::Shutdown));
    }
}
