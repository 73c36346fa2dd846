use tokio::sync::broadcast;

use crate::download::DownloadProgress;
use crate::registry::ServerStatus;

/// Events fanned out to external listeners (UI layers, log sinks).
/// Delivery is at-least-once per occurrence; events for one server id
/// are never reordered relative to each other.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Output {
        server_id: String,
        text: String,
    },
    StatusChange {
        server_id: String,
        status: ServerStatus,
    },
    DownloadProgress {
        server_id: String,
        progress: DownloadProgress,
    },
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Thin wrapper around the broadcast transport so emitting sites do not
/// care whether anyone is subscribed.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl EventSender {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn output(&self, server_id: &str, text: impl Into<String>) {
        let _ = self.tx.send(SupervisorEvent::Output {
            server_id: server_id.to_string(),
            text: text.into(),
        });
    }

    pub(crate) fn status(&self, server_id: &str, status: ServerStatus) {
        let _ = self.tx.send(SupervisorEvent::StatusChange {
            server_id: server_id.to_string(),
            status,
        });
    }

    pub(crate) fn download(&self, server_id: &str, progress: DownloadProgress) {
        let _ = self.tx.send(SupervisorEvent::DownloadProgress {
            server_id: server_id.to_string(),
            progress,
        });
    }
}
