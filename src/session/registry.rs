//! Session registry
//!
//! Owns the identity→Connection map. At most one live connection exists per
//! identity; what happens when a second one arrives is decided by the
//! configured [`SessionPolicy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::support::errors::RegistryError;

use super::Connection;

/// What to do when a connect arrives for an identity that is already live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    /// New physical hardware session supersedes the stale one; the registry
    /// closes the evicted transport.
    #[default]
    EvictOld,
    /// Keep the existing session, refuse the newcomer.
    RejectNew,
}

/// Result of a successful registration.
#[derive(Debug)]
pub struct Registration {
    /// Epoch to pass back to [`SessionRegistry::unregister`].
    pub epoch: u64,
    /// True when an older session for the same identity was evicted.
    pub evicted: bool,
}

/// Manages active charge-point sessions.
pub struct SessionRegistry {
    connections: DashMap<String, Connection>,
    policy: SessionPolicy,
    epoch_counter: AtomicU64,
}

impl SessionRegistry {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            connections: DashMap::new(),
            policy,
            epoch_counter: AtomicU64::new(1),
        }
    }

    pub fn shared(policy: SessionPolicy) -> SharedSessionRegistry {
        Arc::new(Self::new(policy))
    }

    /// Register a connection for `identity`.
    ///
    /// The identity must be non-empty; the transport layer rejects empty
    /// identities before any registry call, so an empty one here is a bug.
    pub fn register(
        &self,
        identity: &str,
        sender: mpsc::UnboundedSender<String>,
        shutdown: Arc<Notify>,
    ) -> Result<Registration, RegistryError> {
        debug_assert!(!identity.is_empty());

        let epoch = self.epoch_counter.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(identity, epoch, sender, shutdown);

        match self.connections.entry(identity.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(connection);
                info!(identity, epoch, "session registered");
                metrics::gauge!("ocpp_sessions_active").increment(1.0);
                Ok(Registration {
                    epoch,
                    evicted: false,
                })
            }
            Entry::Occupied(mut occupied) => match self.policy {
                SessionPolicy::RejectNew => {
                    warn!(identity, "duplicate connect rejected");
                    metrics::counter!("ocpp_sessions_rejected_total").increment(1);
                    Err(RegistryError::RejectedConnection(identity.to_string()))
                }
                SessionPolicy::EvictOld => {
                    let evicted = occupied.insert(connection);
                    evicted.close();
                    warn!(
                        identity,
                        evicted_epoch = evicted.epoch,
                        "duplicate connect, evicting stale session"
                    );
                    metrics::counter!("ocpp_sessions_evicted_total").increment(1);
                    Ok(Registration {
                        epoch,
                        evicted: true,
                    })
                }
            },
        }
    }

    /// Remove the connection for `identity` if it still belongs to `epoch`.
    ///
    /// Returns true when this call actually removed the live session; the
    /// caller then owes a `ConnectionClosed` transition. An evicted
    /// session's cleanup sees false here and must not touch charger state.
    pub fn unregister(&self, identity: &str, epoch: u64) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, conn| conn.epoch == epoch)
            .is_some();
        if removed {
            info!(identity, epoch, "session unregistered");
            metrics::gauge!("ocpp_sessions_active").decrement(1.0);
        }
        removed
    }

    /// Queue a text frame on the identity's live connection.
    pub fn send_to(&self, identity: &str, frame: String) -> Result<(), RegistryError> {
        match self.connections.get(identity) {
            Some(conn) => conn
                .send(frame)
                .map_err(|_| RegistryError::NotConnected(identity.to_string())),
            None => Err(RegistryError::NotConnected(identity.to_string())),
        }
    }

    /// Refresh the identity's last-activity timestamp.
    pub fn touch(&self, identity: &str) {
        if let Some(mut conn) = self.connections.get_mut(identity) {
            conn.touch();
        }
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Ask every live connection task to terminate. Used at shutdown.
    pub fn close_all(&self) {
        for conn in self.connections.iter() {
            conn.close();
        }
    }
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;
