//! Live connection handle
//!
//! One `Connection` exists per attached charge point. It owns the outbound
//! channel feeding the connection's writer task; dropping the handle closes
//! the channel and with it the socket.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};

/// An active WebSocket session bound to one charge-point identity.
#[derive(Debug)]
pub struct Connection {
    pub identity: String,
    /// Registration epoch, unique per registry instance. Guards against an
    /// evicted session unregistering its replacement.
    pub epoch: u64,
    sender: mpsc::UnboundedSender<String>,
    /// Signalled by the registry when this session is evicted.
    shutdown: Arc<Notify>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        identity: impl Into<String>,
        epoch: u64,
        sender: mpsc::UnboundedSender<String>,
        shutdown: Arc<Notify>,
    ) -> Self {
        let now = Utc::now();
        Self {
            identity: identity.into(),
            epoch,
            sender,
            shutdown,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Queue a text frame for the writer task. Fails once the transport has
    /// gone away.
    pub fn send(&self, frame: String) -> Result<(), String> {
        self.sender
            .send(frame)
            .map_err(|_| format!("connection to {} is closed", self.identity))
    }

    /// Ask the owning connection task to terminate. Used on eviction.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
