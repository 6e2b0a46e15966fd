//! Sequenced durable writes for one store key.
//!
//! Every write a store issues goes through a single writer task, so writes
//! to the key reach the host in submission order with one in flight at a
//! time. A later `set` can never be overtaken by an earlier one.

use plugin_bridge_caller::{CallError, Caller};
use plugin_bridge_core::{
    FunctionRef,
    ops::{DeleteValue, KeyParams, SetValue, SetValueParams, UpdateValue, UpdateValueParams},
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;
use uuid::Uuid;

type UpdateReply = oneshot::Sender<Result<Option<Value>, CallError>>;

enum Write {
    Persist(Value),
    Update {
        transform: FunctionRef,
        reply: UpdateReply,
    },
    Delete,
    Flush(oneshot::Sender<()>),
}

/// Handle to a key's writer task.
///
/// The task drains what is queued and exits once the handle is dropped.
pub(crate) struct WriteQueue {
    tx: mpsc::UnboundedSender<Write>,
}

impl WriteQueue {
    /// Start the writer task. Must be called within a tokio runtime.
    pub fn spawn(caller: Caller, key: String, initial: Value, instance: Uuid) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::debug_span!("store_writer", %key, %instance);
        let writer = Writer {
            caller,
            key,
            initial,
        };
        tokio::spawn(writer.run(rx).instrument(span));
        Self { tx }
    }

    /// Queue a replacement of the durable value.
    pub fn persist(&self, value: Value) {
        self.submit(Write::Persist(value));
    }

    /// Queue a host-side read-modify-write and return its eventual result.
    pub fn update(&self, transform: FunctionRef) -> oneshot::Receiver<Result<Option<Value>, CallError>> {
        let (reply, rx) = oneshot::channel();
        self.submit(Write::Update { transform, reply });
        rx
    }

    /// Queue removal of the durable value.
    pub fn delete(&self) {
        self.submit(Write::Delete);
    }

    /// Wait for every write queued so far to finish.
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        self.submit(Write::Flush(done));
        let _ = rx.await;
    }

    fn submit(&self, write: Write) {
        if self.tx.send(write).is_err() {
            tracing::error!("Store writer stopped; write dropped");
        }
    }
}

struct Writer {
    caller: Caller,
    key: String,
    initial: Value,
}

impl Writer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Write>) {
        while let Some(write) = rx.recv().await {
            match write {
                Write::Persist(value) => {
                    let params = SetValueParams {
                        key: self.key.clone(),
                        value,
                    };
                    if let Err(e) = self.caller.call::<SetValue>(&params).await {
                        tracing::error!("Failed to persist value: {e}");
                    }
                }
                Write::Update { transform, reply } => {
                    let params = UpdateValueParams {
                        key: self.key.clone(),
                        transform,
                        initial_value: self.initial.clone(),
                    };
                    let _ = reply.send(self.caller.call::<UpdateValue>(&params).await);
                }
                Write::Delete => {
                    let params = KeyParams {
                        key: self.key.clone(),
                    };
                    if let Err(e) = self.caller.call::<DeleteValue>(&params).await {
                        tracing::error!("Failed to delete value: {e}");
                    }
                }
                Write::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Store writer finished");
    }
}
