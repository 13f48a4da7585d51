//! In-process pub/sub registry fanning named events out to subscribers.
//!
//! Deliveries go through a single worker task: `publish` enqueues and
//! returns, so subscriber code is never re-entered from inside a transport
//! event and publish order is preserved end to end.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::warn;

use crate::core::Envelope;

/// Event names published by a session.
pub mod event {
    /// Connection established.
    pub const CONNECTED: &str = "connected";
    /// Connection lost; a reconnect attempt may follow.
    pub const DISCONNECTED: &str = "disconnected";
    /// Transport-level diagnostic; carries the error text.
    pub const ERROR: &str = "error";
    /// Every successfully decoded envelope.
    pub const MESSAGE: &str = "message";
    /// Retry budget exhausted; the session will not reconnect on its own.
    pub const FAILED: &str = "failed";

    pub const DASHBOARD_UPDATE: &str = "dashboard_update";
    pub const SCAN_UPDATE: &str = "scan_update";
    pub const SCAN_COMPLETED: &str = "scan_completed";
    pub const SCAN_FAILED: &str = "scan_failed";
    pub const SCAN_ABORTED: &str = "scan_aborted";
}

/// Payload handed to subscribers.
#[derive(Clone, Debug)]
pub enum EventPayload {
    /// Lifecycle events carry no data.
    None,
    /// A decoded envelope, shared across subscribers.
    Message(Arc<Envelope>),
    /// Diagnostic text for error/failure events.
    Error(String),
}

impl EventPayload {
    pub fn envelope(&self) -> Option<&Arc<Envelope>> {
        match self {
            EventPayload::Message(envelope) => Some(envelope),
            _ => None,
        }
    }
}

/// Subscriber callback. The `Arc` pointer is the identity that
/// [`EventDispatcher::unsubscribe`] matches on.
pub type EventCallback = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Removal token returned by [`EventDispatcher::subscribe`].
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    event: String,
    id: u64,
}

struct Registration {
    id: u64,
    callback: EventCallback,
}

#[derive(Default)]
struct Registry {
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, Vec<Registration>>> {
    // Callbacks run outside the lock, so a poisoned registry only means a
    // subscriber panicked mid-mutation elsewhere; the map itself is intact.
    registry
        .listeners
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

struct Published {
    event: String,
    payload: EventPayload,
}

/// Registry of named-event subscriber lists with isolated, queued fan-out.
pub struct EventDispatcher {
    registry: Arc<Registry>,
    queue: mpsc::UnboundedSender<Published>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    /// Spawns the delivery worker; requires a running tokio runtime.
    pub fn new() -> Self {
        let registry = Arc::new(Registry::default());
        let (queue, mut rx) = mpsc::unbounded_channel::<Published>();
        let worker_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some(published) = rx.recv().await {
                deliver(&worker_registry, published);
            }
        });

        Self {
            registry,
            queue,
            next_id: AtomicU64::new(1),
        }
    }

    /// Append `callback` to the named list. Insertion order is
    /// notification order; the same callback value may be registered more
    /// than once and is invoked once per registration.
    pub fn subscribe(&self, event: &str, callback: EventCallback) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.registry)
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, callback });
        SubscriptionHandle {
            event: event.to_string(),
            id,
        }
    }

    /// Remove the first registration whose callback is `callback`; a
    /// silent no-op when nothing matches.
    pub fn unsubscribe(&self, event: &str, callback: &EventCallback) {
        let mut listeners = lock(&self.registry);
        if let Some(list) = listeners.get_mut(event)
            && let Some(pos) = list
                .iter()
                .position(|registration| Arc::ptr_eq(&registration.callback, callback))
        {
            list.remove(pos);
        }
    }

    /// Remove a registration by its handle; a silent no-op when already
    /// removed.
    pub fn remove(&self, handle: &SubscriptionHandle) {
        let mut listeners = lock(&self.registry);
        if let Some(list) = listeners.get_mut(&handle.event)
            && let Some(pos) = list
                .iter()
                .position(|registration| registration.id == handle.id)
        {
            list.remove(pos);
        }
    }

    /// Queue `payload` for every callback registered for `event`.
    pub fn publish(&self, event: &str, payload: EventPayload) {
        let _ = self.queue.send(Published {
            event: event.to_string(),
            payload,
        });
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(registry: &Registry, published: Published) {
    let snapshot: Vec<EventCallback> = lock(registry)
        .get(&published.event)
        .map(|list| {
            list.iter()
                .map(|registration| Arc::clone(&registration.callback))
                .collect()
        })
        .unwrap_or_default();

    for callback in snapshot {
        if catch_unwind(AssertUnwindSafe(|| callback(&published.payload))).is_err() {
            warn!(event = %published.event, "event subscriber panicked; continuing fan-out");
        }
    }
}
