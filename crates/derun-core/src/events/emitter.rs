//! Typed event emitter
//!
//! Subscribers register a callback for one event kind. Callbacks for a kind run
//! in registration order, and each kind accepts at most `max_listeners`
//! subscribers; registering past that limit is rejected instead of warned about.

use crate::error::EmitterError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default per-kind subscriber limit
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// An event that can be routed by kind
pub trait Event: Send + Sync + 'static {
    /// Discriminant used as the subscription key
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The kind of this event
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by `on`/`once`, used to remove a single listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listener<E> {
    id: ListenerId,
    once: bool,
    callback: Callback<E>,
}

/// Kind-keyed publish/subscribe registry
pub struct EventEmitter<E: Event> {
    listeners: RwLock<HashMap<E::Kind, Vec<Listener<E>>>>,
    next_id: AtomicU64,
    max_listeners: AtomicUsize,
}

impl<E: Event> EventEmitter<E> {
    /// Create an emitter with the default listener limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    /// Create an emitter with a custom per-kind listener limit
    #[must_use]
    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_listeners: AtomicUsize::new(max_listeners),
        }
    }

    /// Create an emitter wrapped in Arc
    #[must_use]
    pub fn new_shared(max_listeners: usize) -> Arc<Self> {
        Arc::new(Self::with_max_listeners(max_listeners))
    }

    /// Register a callback for every event of `kind`
    pub fn on<F>(&self, kind: E::Kind, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(kind, false, Arc::new(callback))
    }

    /// Register a callback for the next event of `kind` only
    pub fn once<F>(&self, kind: E::Kind, callback: F) -> Result<ListenerId, EmitterError>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(kind, true, Arc::new(callback))
    }

    fn register(
        &self,
        kind: E::Kind,
        once: bool,
        callback: Callback<E>,
    ) -> Result<ListenerId, EmitterError> {
        let max = self.max_listeners();
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(kind).or_default();

        if entry.len() >= max {
            return Err(EmitterError::TooManyListeners {
                event: format!("{kind:?}"),
                max,
            });
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entry.push(Listener { id, once, callback });
        Ok(id)
    }

    /// Remove one listener, or every listener of `kind` when `id` is `None`
    ///
    /// Returns the number of listeners removed.
    pub fn off(&self, kind: E::Kind, id: Option<ListenerId>) -> usize {
        let mut listeners = self.listeners.write();
        let Some(entry) = listeners.get_mut(&kind) else {
            return 0;
        };

        let before = entry.len();
        match id {
            Some(id) => entry.retain(|l| l.id != id),
            None => entry.clear(),
        }
        let removed = before - entry.len();

        if entry.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }

    /// Remove every listener of every kind
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Deliver `event` to the listeners of its kind
    ///
    /// One-shot listeners are detached before any callback runs, so a callback
    /// may freely register or remove listeners. Returns the number of callbacks
    /// invoked.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let callbacks: Vec<Callback<E>> = {
            let mut listeners = self.listeners.write();
            let Some(entry) = listeners.get_mut(&kind) else {
                return 0;
            };
            let callbacks = entry.iter().map(|l| Arc::clone(&l.callback)).collect();
            entry.retain(|l| !l.once);
            if entry.is_empty() {
                listeners.remove(&kind);
            }
            callbacks
        };

        for callback in &callbacks {
            callback(event);
        }

        tracing::trace!(event = ?kind, listeners = callbacks.len(), "Event emitted");
        callbacks.len()
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Current per-kind listener limit
    pub fn max_listeners(&self) -> usize {
        self.max_listeners.load(Ordering::Relaxed)
    }

    /// Change the per-kind listener limit; existing listeners are kept
    pub fn set_max_listeners(&self, max_listeners: usize) {
        self.max_listeners.store(max_listeners, Ordering::Relaxed);
    }
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: HashMap<_, _> = listeners.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .field("max_listeners", &self.max_listeners())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Ping,
        Pong,
    }

    #[derive(Debug, Clone)]
    enum TestEvent {
        Ping(u32),
        Pong,
    }

    impl Event for TestEvent {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            match self {
                Self::Ping(_) => Kind::Ping,
                Self::Pong => Kind::Pong,
            }
        }
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let emitter = EventEmitter::<TestEvent>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            emitter
                .on(Kind::Ping, move |event| {
                    if let TestEvent::Ping(n) = event {
                        seen.lock().push(format!("{tag}:{n}"));
                    }
                })
                .unwrap();
        }

        assert_eq!(emitter.emit(&TestEvent::Ping(7)), 3);
        assert_eq!(*seen.lock(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let emitter = EventEmitter::<TestEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        emitter
            .on(Kind::Pong, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(emitter.emit(&TestEvent::Ping(1)), 0);
        assert_eq!(emitter.emit(&TestEvent::Pong), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let emitter = EventEmitter::<TestEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        emitter
            .once(Kind::Ping, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        emitter.emit(&TestEvent::Ping(1));
        emitter.emit(&TestEvent::Ping(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(Kind::Ping), 0);
    }

    #[test]
    fn test_max_listeners_rejects_registration() {
        let emitter = EventEmitter::<TestEvent>::with_max_listeners(2);
        emitter.on(Kind::Ping, |_| {}).unwrap();
        emitter.once(Kind::Ping, |_| {}).unwrap();

        let err = emitter.on(Kind::Ping, |_| {}).unwrap_err();
        assert_eq!(
            err,
            EmitterError::TooManyListeners {
                event: "Ping".to_string(),
                max: 2
            }
        );
        assert_eq!(err.code(), "TOO_MANY_LISTENERS");

        // The limit is per kind
        assert!(emitter.on(Kind::Pong, |_| {}).is_ok());

        emitter.set_max_listeners(3);
        assert!(emitter.on(Kind::Ping, |_| {}).is_ok());
    }

    #[test]
    fn test_off_single_and_all() {
        let emitter = EventEmitter::<TestEvent>::new();
        let a = emitter.on(Kind::Ping, |_| {}).unwrap();
        emitter.on(Kind::Ping, |_| {}).unwrap();
        emitter.on(Kind::Ping, |_| {}).unwrap();

        assert_eq!(emitter.off(Kind::Ping, Some(a)), 1);
        assert_eq!(emitter.off(Kind::Ping, Some(a)), 0);
        assert_eq!(emitter.listener_count(Kind::Ping), 2);

        assert_eq!(emitter.off(Kind::Ping, None), 2);
        assert_eq!(emitter.listener_count(Kind::Ping), 0);
        assert_eq!(emitter.off(Kind::Pong, None), 0);
    }

    #[test]
    fn test_callback_can_register_listener() {
        let emitter = Arc::new(EventEmitter::<TestEvent>::new());
        let inner = Arc::clone(&emitter);

        emitter
            .once(Kind::Ping, move |_| {
                inner.on(Kind::Pong, |_| {}).unwrap();
            })
            .unwrap();

        emitter.emit(&TestEvent::Ping(0));
        assert_eq!(emitter.listener_count(Kind::Pong), 1);
    }
}
