//! Collection subprocess supervision.
//!
//! The manager must never block on the collection tool: `spawn` starts the
//! child and hands its exit to a dedicated waiter thread, which delivers a
//! single [`ExitEvent`] through the caller's callback (in practice a send
//! into the service loop). Only the exit's *occurrence* matters to the
//! lifecycle — the tool's status code is logged, not validated.
//!
//! The waiter thread is started before the child process, so a thread
//! creation failure can never leave a running child with no reaper.

use std::io;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error, info};

/// Terminal report for one supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub pid: u32,
    /// Exit code, when the child exited normally.
    pub code: Option<i32>,
    pub success: bool,
}

/// Handle for a child whose exit will be reported asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: u32,
}

/// Spawn `cmd` and report its exit through `on_exit` from a waiter thread.
///
/// Any failure — waiter thread creation or process spawn — surfaces as an
/// error with no child left running, so the caller can roll back the
/// capture attempt and a retry stays possible.
pub fn spawn(
    cmd: &mut Command,
    on_exit: impl FnOnce(ExitEvent) + Send + 'static,
) -> io::Result<ChildHandle> {
    let (handoff_tx, handoff_rx) = mpsc::channel::<Child>();

    // Waiter first: if this fails no process has been created yet.
    thread::Builder::new()
        .name("dw-reap".to_string())
        .spawn(move || {
            // The sender is dropped without a send when the process spawn
            // fails; nothing to reap then, and no exit is reported.
            let Ok(mut child) = handoff_rx.recv() else {
                return;
            };
            let pid = child.id();
            let event = match child.wait() {
                Ok(status) => ExitEvent {
                    pid,
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    error!(pid, error = %e, "wait on collection subprocess failed");
                    ExitEvent {
                        pid,
                        code: None,
                        success: false,
                    }
                }
            };
            info!(pid, code = ?event.code, success = event.success, "collection subprocess exited");
            on_exit(event);
        })
        .map_err(|e| {
            error!(error = %e, "failed to start exit watcher thread, capture aborted");
            e
        })?;

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let pid = child.id();
    debug!(pid, "collection subprocess spawned");

    // The waiter outlives us; the send only fails if it already exited,
    // which it cannot have done before receiving the child.
    handoff_tx
        .send(child)
        .map_err(|_| io::Error::other("exit watcher thread gone before handoff"))?;

    Ok(ChildHandle { pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn exit_is_reported_with_status() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn(Command::new("true").arg("ignored"), move |e| {
            tx.send(e).unwrap();
        })
        .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(event.pid, handle.pid);
        assert!(event.success);
        assert_eq!(event.code, Some(0));
    }

    #[test]
    fn nonzero_exit_is_still_just_reported() {
        let (tx, rx) = mpsc::channel();
        spawn(&mut Command::new("false"), move |e| {
            tx.send(e).unwrap();
        })
        .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(!event.success);
    }

    #[test]
    fn spawn_failure_surfaces_an_error_and_reports_no_exit() {
        let (tx, rx) = mpsc::channel();
        let result = spawn(&mut Command::new("/nonexistent/dw-collector"), move |e| {
            tx.send(e).unwrap();
        });
        assert!(result.is_err());
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }
}
