//! Pending server-initiated calls
//!
//! Tracks Calls the Central System has sent and is awaiting responses for,
//! keyed by (identity, message id). Message ids are unique per connection
//! while pending; a response with no matching entry is a protocol anomaly
//! handled by the caller.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use dashmap::DashMap;

/// Terminal outcome of a server-initiated call.
#[derive(Debug)]
pub enum CallOutcome {
    /// Correlated CallResult payload.
    Result(Value),
    /// Correlated CallError.
    Error {
        code: String,
        description: String,
        details: Value,
    },
    /// No response within the configured window. The pending entry is gone;
    /// a late response is ignored.
    Timeout,
    /// The connection closed while the call was pending.
    ConnectionLost,
}

/// Failures before a call is even in flight.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("charge point {0} is not connected")]
    NotConnected(String),
}

struct PendingCall {
    action: String,
    responder: oneshot::Sender<CallOutcome>,
}

/// Table of in-flight server-initiated calls.
#[derive(Default)]
pub struct PendingCallTable {
    pending: DashMap<(String, String), PendingCall>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call and return the receiver its outcome will be
    /// delivered on.
    pub fn register(
        &self,
        identity: &str,
        message_id: &str,
        action: &str,
    ) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            (identity.to_string(), message_id.to_string()),
            PendingCall {
                action: action.to_string(),
                responder: tx,
            },
        );
        rx
    }

    /// Resolve a pending call with a CallResult payload. Returns the call's
    /// action name, or None when nothing was pending under that id.
    pub fn resolve_result(&self, identity: &str, message_id: &str, payload: Value) -> Option<String> {
        self.take(identity, message_id).map(|call| {
            let _ = call.responder.send(CallOutcome::Result(payload));
            call.action
        })
    }

    /// Resolve a pending call with a CallError.
    pub fn resolve_error(
        &self,
        identity: &str,
        message_id: &str,
        code: String,
        description: String,
        details: Value,
    ) -> Option<String> {
        self.take(identity, message_id).map(|call| {
            let _ = call.responder.send(CallOutcome::Error {
                code,
                description,
                details,
            });
            call.action
        })
    }

    /// Drop a pending entry without resolving it (timeout path; the caller
    /// already owns the Timeout outcome).
    pub fn discard(&self, identity: &str, message_id: &str) {
        self.take(identity, message_id);
    }

    /// Resolve every pending call for `identity` with `ConnectionLost`.
    pub fn cancel_connection(&self, identity: &str) -> usize {
        let keys: Vec<_> = self
            .pending
            .iter()
            .filter(|entry| entry.key().0 == identity)
            .map(|entry| entry.key().clone())
            .collect();

        let mut cancelled = 0;
        for key in keys {
            if let Some((_, call)) = self.pending.remove(&key) {
                let _ = call.responder.send(CallOutcome::ConnectionLost);
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn take(&self, identity: &str, message_id: &str) -> Option<PendingCall> {
        self.pending
            .remove(&(identity.to_string(), message_id.to_string()))
            .map(|(_, call)| call)
    }
}
