//! Host collaborator boundaries.
//!
//! The managed host's power state, its dump-activity flag, and the
//! transport used to offload or delete host-held dumps are external
//! collaborators; the managers depend only on these traits. The daemon
//! wires in a real implementation, tests wire in fakes.

use dw_common::{EntryId, Result, SourceId};
use tracing::warn;

/// Transport type tag for host-held resource dumps.
pub const RESOURCE_DUMP_TYPE_TAG: u32 = 9;
/// Transport type tag for host-held system dumps.
pub const SYSTEM_DUMP_TYPE_TAG: u32 = 1;

/// Coarse host power state, as the dump managers need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Off,
    Running,
    Quiesced,
    TransitioningToOff,
}

/// Host power/progress queries and the platform dump trigger.
pub trait HostControl: Send + Sync {
    /// Current host power state.
    fn state(&self) -> HostState;

    /// Whether the host side reports a system dump already in progress
    /// or awaiting offload.
    fn system_dump_in_progress(&self) -> bool;

    /// Ask the platform to begin collecting a system dump.
    fn start_platform_dump(&self) -> Result<()>;

    /// Whether the host is up.
    fn is_running(&self) -> bool {
        self.state() == HostState::Running
    }
}

/// Offload/delete channel for dumps whose bytes the host holds.
pub trait HostTransport: Send + Sync {
    /// Ask the host to stream dump `source_id` to `uri`.
    fn request_offload(&self, source_id: SourceId, id: EntryId, uri: &str) -> Result<()>;

    /// Ask the host to discard dump `source_id` of the given type.
    fn request_delete(&self, source_id: SourceId, type_tag: u32) -> Result<()>;
}

/// Stand-in used when no host connection is configured.
///
/// Reports the host as off and fails every transport call, which keeps
/// the notification-driven categories inert without special-casing them
/// in the managers.
pub struct DisconnectedHost;

impl HostControl for DisconnectedHost {
    fn state(&self) -> HostState {
        HostState::Off
    }

    fn system_dump_in_progress(&self) -> bool {
        false
    }

    fn start_platform_dump(&self) -> Result<()> {
        warn!("platform dump requested with no host connection configured");
        Err(dw_common::Error::unavailable(
            "no host connection configured",
        ))
    }
}

impl HostTransport for DisconnectedHost {
    fn request_offload(&self, _source_id: SourceId, _id: EntryId, _uri: &str) -> Result<()> {
        Err(dw_common::Error::unavailable(
            "no host transport configured",
        ))
    }

    fn request_delete(&self, _source_id: SourceId, _type_tag: u32) -> Result<()> {
        Err(dw_common::Error::unavailable(
            "no host transport configured",
        ))
    }
}
