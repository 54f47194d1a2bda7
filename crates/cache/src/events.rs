//! Cache notifications
//!
//! The cache pushes typed [`CacheEvent`]s to any number of listeners. A
//! listener is either a closure or the sending half of an mpsc channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use parking_lot::Mutex;

/// A notification emitted by the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A thumbnail finished generating and is resident
    Ready(usize),

    /// Generation failed for a page
    Error { page_index: usize, message: String },

    /// A page started or stopped loading
    LoadingChanged { page_index: usize, loading: bool },

    /// Total memory held by resident thumbnails changed (bytes)
    MemoryChanged(u64),

    /// The cache contents changed in bulk (clear, invalidation, maintenance)
    CacheUpdated,
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Callback(Callback),
    Channel(Sender<CacheEvent>),
}

/// Listener registry
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure called for every event
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.register(Listener::Callback(Arc::new(callback)))
    }

    /// Register a channel; the returned receiver sees every event
    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<CacheEvent>) {
        let (tx, rx) = mpsc::channel();
        let id = self.register(Listener::Channel(tx));
        (id, rx)
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver events in order to every listener
    ///
    /// Listeners are snapshotted first so a callback may subscribe or
    /// unsubscribe without deadlocking. Channels whose receiver is gone are
    /// dropped from the registry.
    pub fn emit_all(&self, events: Vec<CacheEvent>) {
        if events.is_empty() {
            return;
        }

        let snapshot: Vec<(ListenerId, Listener)> = self.listeners.lock().clone();
        let mut disconnected = Vec::new();

        for event in &events {
            for (id, listener) in &snapshot {
                match listener {
                    Listener::Callback(callback) => callback(event),
                    Listener::Channel(tx) => {
                        if tx.send(event.clone()).is_err() && !disconnected.contains(id) {
                            disconnected.push(*id);
                        }
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            self.listeners
                .lock()
                .retain(|(id, _)| !disconnected.contains(id));
        }
    }

    fn register(&self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }
}
