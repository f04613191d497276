//! Dump Warden core: dump lifecycle and storage management.
//!
//! This crate reconciles three independent, racing sources of truth — a
//! management API request, an asynchronous subprocess/notification
//! completion, and the on-disk filesystem state — into one consistent
//! entry registry per dump category, under a single-threaded event loop,
//! with no loss of entries across restarts.
//!
//! Category managers:
//! - [`bmc`]: locally captured controller dumps (external collection tool,
//!   filesystem-watch finalization, quota enforcement)
//! - [`faultlog`]: locally stored fault payloads
//! - [`resource`], [`system`]: host dumps completed by out-of-band
//!   notification and persisted through durable records
//!
//! The [`service`] module ties the managers to one event loop; the daemon
//! binary is a thin wrapper around it. This crate is library-first: every
//! manager is directly constructible and testable without the loop.

pub mod bmc;
pub mod entry;
pub mod faultlog;
pub mod filename;
pub mod host;
pub mod quota;
pub mod resource;
pub mod service;
pub mod store;
pub mod supervise;
pub mod system;
pub mod watch;

pub use dw_common::{Error, Result};

/// Current time as microseconds since the Unix epoch.
///
/// Saturates at zero if the clock reads before the epoch, which only
/// happens on a badly misconfigured RTC; entries stamped zero are still
/// finalized normally.
pub(crate) fn epoch_now_us() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
