//! Observer lists shared by the peripheral decoders.

use crate::domain::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle returned on registration, used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct CallbackRegistry<T: ?Sized> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(CallbackId, Callback<T>)>>,
}

impl<T: ?Sized> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the id was not registered.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut callbacks = self.lock();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in registration order.
    ///
    /// Iterates over a snapshot so callbacks may register or unregister
    /// (themselves included) without deadlocking.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in snapshot {
            callback(value);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(CallbackId, Callback<T>)>> {
        lock(&self.callbacks)
    }
}

impl<T: ?Sized> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
