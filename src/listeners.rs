// Observer lists
//
// Listeners are stored behind Arc and iterated over a snapshot, so a listener may
// add or remove listeners (including itself) while being notified.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Thread-safe list of listeners with copy-on-read iteration
pub struct ListenerList<T: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Arc<T>)>>,
}

impl<T: ?Sized> ListenerList<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<T>) -> ListenerId {
        let id = ListenerId::next();
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((id, listener));
        }
        id
    }

    /// Returns true if the listener was registered
    pub fn remove(&self, id: ListenerId) -> bool {
        match self.entries.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|(other, _)| *other != id);
                entries.len() != before
            }
            Err(_) => false,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immutable copy of the current listeners
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .lock()
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Call `f` for each listener of the snapshot
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for listener in self.snapshot() {
            f(&listener);
        }
    }
}

impl<T: ?Sized> Default for ListenerList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Closure-based change listener
pub type ChangeListener<E> = dyn Fn(&E) + Send + Sync;
