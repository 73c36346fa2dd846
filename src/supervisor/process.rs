use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::logging::LogType;
use crate::registry::{Registry, ServerStatus};

use super::events::EventSender;

/// One tracked child process. Transient, never persisted: the record's
/// `status` field is the only state that survives a restart of the host.
#[derive(Debug)]
pub(crate) struct ProcessEntry {
    pub(crate) pid: Option<u32>,
    pub(crate) stdin_tx: mpsc::Sender<String>,
    pub(crate) kill_tx: mpsc::Sender<()>,
    pub(crate) exit_rx: watch::Receiver<bool>,
    pub(crate) watcher: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    NotTracked,
    Alive,
    /// An entry existed but its process was dead; the entry was purged.
    Purged,
}

/// Map from server id to its live process entry. Shared between the
/// supervisor's control path and the per-process watcher tasks; the lock
/// is only ever held for map access, never across IO.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessTable {
    inner: Arc<Mutex<HashMap<String, ProcessEntry>>>,
}

impl ProcessTable {
    pub(crate) fn insert(&self, server_id: &str, entry: ProcessEntry) {
        self.inner
            .lock()
            .unwrap()
            .insert(server_id.to_string(), entry);
    }

    pub(crate) fn remove(&self, server_id: &str) -> Option<ProcessEntry> {
        self.inner.lock().unwrap().remove(server_id)
    }

    pub(crate) fn contains(&self, server_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(server_id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn stdin_sender(&self, server_id: &str) -> Option<mpsc::Sender<String>> {
        self.inner
            .lock()
            .unwrap()
            .get(server_id)
            .map(|entry| entry.stdin_tx.clone())
    }

    pub(crate) fn kill_sender(&self, server_id: &str) -> Option<mpsc::Sender<()>> {
        self.inner
            .lock()
            .unwrap()
            .get(server_id)
            .map(|entry| entry.kill_tx.clone())
    }

    pub(crate) fn exit_receiver(&self, server_id: &str) -> Option<watch::Receiver<bool>> {
        self.inner
            .lock()
            .unwrap()
            .get(server_id)
            .map(|entry| entry.exit_rx.clone())
    }

    /// Compare the tracked entry against actual OS liveness and purge it
    /// if the process is gone.
    pub(crate) fn reconcile(&self, server_id: &str) -> Liveness {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.get(server_id) else {
            return Liveness::NotTracked;
        };

        if entry.is_alive() {
            Liveness::Alive
        } else {
            debug!(
                log_type = LogType::Supervisor.as_str(),
                "Purging dead process entry for '{}'", server_id
            );
            inner.remove(server_id);
            Liveness::Purged
        }
    }

    /// Ids whose tracked process no longer responds to a liveness probe.
    pub(crate) fn dead_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| !entry.is_alive())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl ProcessEntry {
    /// Best-effort liveness: the exit watcher still running and, on Unix,
    /// the pid accepting a no-op signal.
    pub(crate) fn is_alive(&self) -> bool {
        if self.watcher.is_finished() {
            return false;
        }
        probe_pid(self.pid)
    }
}

#[cfg(unix)]
fn probe_pid(pid: Option<u32>) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match pid {
        Some(pid) => kill(Pid::from_raw(pid as i32), None).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn probe_pid(pid: Option<u32>) -> bool {
    pid.is_some()
}

/// Purge the entry for `server_id` and flip the record to `stopped`.
/// Returns whether this call actually removed the entry; when two paths
/// race (exit watcher vs stop timeout vs cleanup sweep) the losers see
/// the entry already gone and do nothing.
pub(crate) fn finalize_exit(
    processes: &ProcessTable,
    registry: &Registry,
    events: &EventSender,
    server_id: &str,
) -> bool {
    if processes.remove(server_id).is_none() {
        return false;
    }

    match registry.set_status(server_id, ServerStatus::Stopped) {
        Ok(previous) => {
            if previous != ServerStatus::Stopped {
                events.status(server_id, ServerStatus::Stopped);
            }
        }
        Err(e) => {
            // The record may already be gone (delete in flight); a crash
            // transition must never propagate an error.
            warn!(
                log_type = LogType::Supervisor.as_str(),
                "Could not persist stopped status for '{}': {}", server_id, e
            );
        }
    }

    true
}
