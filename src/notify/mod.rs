//! Data-changed notifications.
//!
//! Caches register a callback with a [`RefreshNotifier`]; whoever changes the
//! underlying data calls [`RefreshNotifier::notify`] and every live subscriber
//! runs synchronously on the calling task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info};

/// Payload of a refresh: who triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSignal {
    pub source: String,
}

impl RefreshSignal {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

type Callback = Arc<dyn Fn(&RefreshSignal) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback)>>,
}

impl Subscribers {
    fn remove(&self, id: u64) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }
}

/// Owns the subscriber list.
#[derive(Clone, Default)]
pub struct RefreshNotifier {
    inner: Arc<Subscribers>,
}

/// Keeps a callback registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription unregisters the callback"]
pub struct Subscription {
    id: u64,
    owner: Weak<Subscribers>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove(self.id);
        }
    }
}

impl RefreshNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RefreshSignal) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.inner.entries.lock() {
            entries.push((id, Arc::new(callback)));
        }
        debug!("Registered refresh subscriber {}", id);

        Subscription {
            id,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Invokes every subscriber with `signal`. Returns how many ran.
    ///
    /// The list is copied first so callbacks may subscribe or unsubscribe.
    pub fn notify(&self, signal: &RefreshSignal) -> usize {
        let callbacks: Vec<Callback> = match self.inner.entries.lock() {
            Ok(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return 0,
        };

        info!(
            "Refresh requested by '{}', notifying {} subscribers",
            signal.source,
            callbacks.len()
        );
        for callback in &callbacks {
            callback(signal);
        }
        callbacks.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}
