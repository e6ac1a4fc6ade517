//! Connection status published to UI observers.
//!
//! The session loop owns all state; observers receive updates through a
//! `tokio::sync::watch` channel so no UI type crosses the component
//! boundary.

use tokio::sync::watch;
use tracing::info;

/// User-visible connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No live peer connection; `reason` caches the last failure for
    /// display.
    Disconnected { reason: Option<String> },
    Connecting,
    Connected,
    /// A handoff is active (this host is forwarding or being controlled).
    Forwarding,
}

/// Publisher half of the status channel.
pub struct StatusPublisher {
    tx: watch::Sender<ConnectionStatus>,
}

impl StatusPublisher {
    pub fn new() -> (Self, watch::Receiver<ConnectionStatus>) {
        let (tx, rx) = watch::channel(ConnectionStatus::Disconnected { reason: None });
        (Self { tx }, rx)
    }

    /// Publishes `status` if it differs from the current value.
    pub fn set(&self, status: ConnectionStatus) {
        let changed = *self.tx.borrow() != status;
        if changed {
            info!(?status, "connection status");
            let _ = self.tx.send(status);
        }
    }

    pub fn current(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }
}
