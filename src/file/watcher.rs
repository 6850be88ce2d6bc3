// # Directory Watchers
//
// Event model for filesystem observation: a watcher watches a directory tree
// and forwards events to attached listeners. Listeners may be called at any
// time and from any thread; listener churn must never break the I/O path, so
// dispatch holds weak references and silently prunes the dead ones.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Kind of an observed filesystem event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEventType {
    FileAdded,
    DirectoryAdded,
    FileRemoved,
    DirectoryRemoved,
    FileContentChanged,
    FileMetadataChanged,
}

/// Filesystem event delivered to watcher listeners.
#[derive(Debug, Clone)]
pub struct WatcherEvent {
    pub kind: WatcherEventType,
    pub path: String,
}

/// Receiver of watcher events. May be called from any thread.
pub trait WatcherListener: Send + Sync {
    fn handle_event(&self, event: &WatcherEvent);
}

/// Watches a directory and all its subdirectories.
pub struct DirectoryWatcher {
    path: String,
    listeners: Mutex<Vec<Weak<dyn WatcherListener>>>,
}

impl DirectoryWatcher {
    pub fn new(path: String) -> Arc<Self> {
        Arc::new(Self {
            path,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// The watched directory path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach a listener. The watcher holds it weakly; dropping the listener
    /// detaches it automatically.
    pub fn attach_listener(&self, listener: &Arc<dyn WatcherListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Detach a previously attached listener.
    pub fn detach_listener(&self, listener: &Arc<dyn WatcherListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|candidate| match candidate.upgrade() {
            Some(live) => !Arc::ptr_eq(&live, listener),
            None => false,
        });
    }

    /// Deliver an event to every live listener. Runs outside the listener
    /// lock so handlers may attach or detach freely.
    pub fn dispatch_event(&self, event: &WatcherEvent) {
        let live: Vec<Arc<dyn WatcherListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|candidate| candidate.strong_count() > 0);
            listeners
                .iter()
                .filter_map(|candidate| candidate.upgrade())
                .collect()
        };

        for listener in live {
            listener.handle_event(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
