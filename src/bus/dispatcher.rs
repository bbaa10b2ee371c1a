use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    handler: EventHandler,
}

/// In-process publish/subscribe registry keyed by event name.
///
/// Delivery is synchronous on the emitting task. Handlers for the same name run
/// in registration order; there is no buffering or replay.
pub struct EventDispatcher {
    handlers: DashMap<String, Vec<HandlerEntry>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register `handler` under `event`. The handler stays registered until the
    /// returned guard is unsubscribed or dropped.
    pub fn on<F>(self: &Arc<Self>, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(handler))
    }

    /// Like [`on`](Self::on), but decodes the payload into `T` first. Payloads
    /// that do not decode are logged and skipped.
    pub fn on_typed<T, F>(self: &Arc<Self>, event: impl Into<String>, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.register(event.into(), typed_handler(handler))
    }

    pub fn register(self: &Arc<Self>, event: String, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(event.clone())
            .or_default()
            .push(HandlerEntry { id, handler });
        tracing::trace!(event = %event, id, "event handler registered");

        Subscription {
            event,
            id,
            dispatcher: Arc::downgrade(self),
            active: true,
        }
    }

    /// Invoke every handler currently registered for `event` with `payload`.
    ///
    /// Returns how many handlers completed. A panicking handler is logged and
    /// does not stop delivery to the others.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        // Snapshot so handlers can (un)subscribe without holding the shard lock.
        let handlers: Vec<EventHandler> = match self.handlers.get(event) {
            Some(entries) => entries.iter().map(|e| e.handler.clone()).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => delivered += 1,
                Err(cause) => {
                    tracing::error!(
                        event,
                        "error in realtime event handler: {}",
                        panic_message(cause.as_ref())
                    );
                }
            }
        }
        delivered
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map(|e| e.len()).unwrap_or(0)
    }

    pub fn event_names(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    fn remove(&self, event: &str, id: u64) {
        if let Entry::Occupied(mut entry) = self.handlers.entry(event.to_string()) {
            entry.get_mut().retain(|h| h.id != id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

fn typed_handler<T, F>(handler: F) -> EventHandler
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(move |payload: &Value| match T::deserialize(payload) {
        Ok(value) => handler(value),
        Err(e) => tracing::warn!("dropping realtime payload that failed to decode: {e}"),
    })
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Guard for one registered handler. Unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    event: String,
    id: u64,
    dispatcher: Weak<EventDispatcher>,
    active: bool,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove exactly this handler.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove(&self.event, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

/// Something consumers can subscribe to by event name.
pub trait EventSource {
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription;
}

impl EventSource for Arc<EventDispatcher> {
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        self.register(event.to_string(), handler)
    }
}
