//! Observable value with callback subscribers and a watch stream.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Callback<T>>>,
}

impl<T> Subscribers<T> {
    fn snapshot(&self) -> Vec<Callback<T>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for Subscribers<T> {
    fn detach(&self, id: u64) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// A value that notifies subscribers whenever it is replaced.
///
/// Callbacks run synchronously on the thread that sets the value, in
/// subscription order. Concurrent sets are serialized, so callbacks see
/// values in the order the observable took them. A callback may
/// unsubscribe itself but must not `set` or `subscribe` on the same
/// observable.
pub struct Observable<T> {
    tx: watch::Sender<T>,
    subscribers: Arc<Subscribers<T>>,
    notify: Mutex<()>,
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an observable holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        let (tx, _) = watch::channel(value);
        Self {
            tx,
            subscribers: Arc::new(Subscribers {
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(BTreeMap::new()),
            }),
            notify: Mutex::new(()),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and notify every subscriber.
    pub fn set(&self, value: T) {
        let _notify = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        self.tx.send_replace(value.clone());
        for callback in self.subscribers.snapshot() {
            callback(&value);
        }
    }

    /// Call `callback` now with the current value, then on every change.
    ///
    /// The callback stays attached until the returned [`Subscription`] is
    /// dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let _notify = self.notify.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&callback));

        callback(&self.get());

        let subscribers: Weak<dyn Detach> = Arc::downgrade(&self.subscribers) as Weak<dyn Detach>;
        Subscription {
            id,
            subscribers: Some(subscribers),
        }
    }

    /// Stream yielding the current value, then each later value.
    ///
    /// Values set in quick succession may be coalesced into the latest.
    #[must_use]
    pub fn stream(&self) -> WatchStream<T> {
        WatchStream::new(self.tx.subscribe())
    }

    /// Number of attached callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T> std::fmt::Debug for Observable<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}

/// Handle keeping a callback attached to an [`Observable`].
#[must_use = "dropping a subscription detaches its callback"]
pub struct Subscription {
    id: u64,
    subscribers: Option<Weak<dyn Detach>>,
}

impl Subscription {
    /// Detach the callback.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(subscribers) = self.subscribers.take().and_then(|weak| weak.upgrade()) {
            subscribers.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
