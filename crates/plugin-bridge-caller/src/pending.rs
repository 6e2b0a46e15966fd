//! Table of calls awaiting a reply.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use plugin_bridge_core::CallId;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::CallError;

/// Outcome delivered to a waiting call.
pub(crate) type Outcome = Result<Option<Value>, CallError>;

struct State {
    calls: HashMap<CallId, oneshot::Sender<Outcome>>,
    closed: bool,
}

/// Correlation id -> completion handle.
///
/// An entry lives from registration until the first of: a matching reply,
/// cancellation, timeout, the `PendingCall` being dropped, or the transport
/// closing.
pub(crate) struct PendingTable {
    state: Mutex<State>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                calls: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a call and return the receiver its outcome arrives on.
    pub(crate) fn register(&self, id: CallId) -> Result<oneshot::Receiver<Outcome>, CallError> {
        let mut state = self.lock();
        if state.closed {
            return Err(CallError::TransportUnavailable);
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Ok(rx)
    }

    /// Resolve a call. Returns `false` if no such call is pending.
    pub(crate) fn complete(&self, id: CallId, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().calls.remove(&id) else {
            return false;
        };
        // The waiter may have gone away; the entry is gone either way.
        let _ = tx.send(outcome);
        true
    }

    /// Forget a call without resolving it.
    pub(crate) fn remove(&self, id: CallId) -> bool {
        self.lock().calls.remove(&id).is_some()
    }

    /// Fail every pending call and refuse new registrations.
    pub(crate) fn close(&self, error: &CallError) {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.calls.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A call that has been sent and awaits its reply.
///
/// Dropping a `PendingCall` without awaiting [`wait`](Self::wait) forgets
/// the call; a late reply is then ignored.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    id: CallId,
    rx: Option<oneshot::Receiver<Outcome>>,
    table: Arc<PendingTable>,
    timeout: Option<Duration>,
}

impl PendingCall {
    pub(crate) fn new(
        id: CallId,
        rx: oneshot::Receiver<Outcome>,
        table: Arc<PendingTable>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            rx: Some(rx),
            table,
            timeout,
        }
    }

    /// Correlation id of this call.
    #[must_use]
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Override the timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Wait for this call without a timeout, regardless of configuration.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// A handle that can cancel this call from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Wait for the reply.
    ///
    /// # Errors
    /// Returns the host's error for a failed reply, `Timeout` if the
    /// deadline passes, `Cancelled` if cancelled, or `TransportUnavailable`
    /// if the transport closes first.
    pub async fn wait(mut self) -> Result<Option<Value>, CallError> {
        let Some(rx) = self.rx.take() else {
            return Err(CallError::TransportUnavailable);
        };

        let received = match self.timeout {
            Some(timeout) => {
                if let Ok(received) = tokio::time::timeout(timeout, rx).await {
                    received
                } else {
                    self.table.remove(self.id);
                    tracing::debug!(id = self.id, ?timeout, "Call timed out");
                    return Err(CallError::Timeout(self.id));
                }
            }
            None => rx.await,
        };

        received.unwrap_or(Err(CallError::TransportUnavailable))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Cancels a [`PendingCall`] from outside its waiting task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: CallId,
    table: Weak<PendingTable>,
}

impl CancelHandle {
    /// Correlation id of the call this handle cancels.
    #[must_use]
    pub const fn id(&self) -> CallId {
        self.id
    }

    /// Fail the call with `Cancelled`.
    ///
    /// Returns `false` if the call already finished.
    pub fn cancel(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.complete(self.id, Err(CallError::Cancelled(self.id))))
    }
}
