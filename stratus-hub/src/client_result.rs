//! Correlation of server-to-client calls with the client's results.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ntex_bytes::Bytes;
use tokio::sync::oneshot;

use stratus_core::{ClientResult, StratusError, TransportError};

/// Outcome delivered to the caller waiting on a client result.
pub type ClientResultOutcome = Result<Option<Bytes>, StratusError>;

struct PendingResult {
    method_id: i32,
    sender: oneshot::Sender<ClientResultOutcome>,
}

/// Pending server-to-client invocations of one connection.
///
/// Each invocation gets a connection-unique id that the client echoes back
/// in its result message.
pub struct PendingClientResults {
    pending: DashMap<u64, PendingResult>,
    next_id: AtomicU64,
}

impl PendingClientResults {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an invocation of `method_id`.
    ///
    /// Returns the id to send and a receiver for the result.
    pub fn register(&self, method_id: i32) -> (u64, oneshot::Receiver<ClientResultOutcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingResult {
                method_id,
                sender: tx,
            },
        );
        (id, rx)
    }

    /// Deliver a result received from the client.
    ///
    /// Returns `false` if nothing was waiting for it (timed out, or an id
    /// the server never issued).
    pub fn complete(&self, result: ClientResult) -> bool {
        let Some((_, pending)) = self.pending.remove(&result.id) else {
            tracing::warn!(id = result.id, "no pending invocation for client result");
            return false;
        };

        if pending.method_id != result.method_id {
            tracing::warn!(
                id = result.id,
                expected = pending.method_id,
                received = result.method_id,
                "client result method id mismatch"
            );
        }

        let outcome = result
            .outcome
            .map_err(|error| StratusError::Status(error.status));
        // The caller may have given up already.
        let _ = pending.sender.send(outcome);
        true
    }

    /// Cancel one invocation.
    pub fn cancel(&self, id: u64) {
        if let Some((_, pending)) = self.pending.remove(&id) {
            let _ = pending.sender.send(Err(StratusError::Cancelled));
        }
    }

    /// Fail every pending invocation; used when the connection closes.
    pub fn cancel_all(&self) {
        let keys: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();

        let error = StratusError::Transport(TransportError::ConnectionClosed);
        for id in keys {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(error.clone()));
            }
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for PendingClientResults {
    fn default() -> Self {
        Self::new()
    }
}
