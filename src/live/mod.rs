//! Live entity caches.
//!
//! A [`LiveEntity`] holds the latest REST snapshot of one resource and
//! refetches it whenever the matching realtime notification arrives.
//! Notification payloads are never merged into the cache.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::bus::{EventSource, Subscription};
use crate::realtime::Notifier;

pub mod entities;

/// REST boundary for one resource.
#[async_trait]
pub trait EntityFetcher<T>: Send + Sync {
    async fn fetch(&self) -> Result<T, ApiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySnapshot<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for EntitySnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }
}

/// Subscribe `source` to `event` and call `on_change` once per notification.
/// The payload is discarded.
pub fn on_change_notification<S, F>(source: &S, event: &str, on_change: F) -> Subscription
where
    S: EventSource + ?Sized,
    F: Fn() + Send + Sync + 'static,
{
    let name = event.to_string();
    source.subscribe(
        event,
        Arc::new(move |payload: &Value| {
            let action = payload.get("action").and_then(Value::as_str).unwrap_or("unknown");
            debug!(event = %name, action, "change notification");
            on_change();
        }),
    )
}

struct Shared<T> {
    label: String,
    snapshot: watch::Sender<EntitySnapshot<T>>,
    fetcher: Arc<dyn EntityFetcher<T>>,
    notifier: Arc<dyn Notifier>,
    alive: AtomicBool,
    fetches: AtomicUsize,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    /// Only the most recently started fetch may write the snapshot.
    async fn load(self: Arc<Self>) {
        let generation = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.snapshot.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });

        let result = self.fetcher.fetch().await;
        if !self.alive.load(Ordering::SeqCst) {
            debug!(entity = %self.label, "discarding fetch result after unmount");
            return;
        }

        let failure = result.as_ref().err().map(ToString::to_string);
        let applied = self.snapshot.send_if_modified(|s| {
            if self.fetches.load(Ordering::SeqCst) != generation {
                return false;
            }
            s.loading = false;
            match result {
                Ok(data) => {
                    s.data = Some(data);
                    s.error = None;
                }
                Err(e) => s.error = Some(e.to_string()),
            }
            true
        });

        if !applied {
            debug!(entity = %self.label, generation, "discarding superseded fetch result");
            return;
        }
        if let Some(e) = failure {
            warn!(entity = %self.label, "failed to fetch {}: {}", self.label, e);
            self.notifier.error(&format!("Failed to load {}", self.label));
        }
    }
}

/// A cached resource kept fresh by realtime notifications.
pub struct LiveEntity<T> {
    shared: Arc<Shared<T>>,
    _subscription: Subscription,
}

impl<T: Clone + Send + Sync + 'static> LiveEntity<T> {
    /// Start the initial fetch and subscribe to `event` on `source`.
    pub fn mount<S>(
        label: &str,
        event: &str,
        source: &S,
        fetcher: Arc<dyn EntityFetcher<T>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self
    where
        S: EventSource + ?Sized,
    {
        let (snapshot, _) = watch::channel(EntitySnapshot::default());
        let shared = Arc::new(Shared {
            label: label.to_string(),
            snapshot,
            fetcher,
            notifier,
            alive: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
        });

        let weak = Arc::downgrade(&shared);
        let subscription = on_change_notification(source, event, move || {
            if let Some(shared) = weak.upgrade() {
                tokio::spawn(shared.load());
            }
        });

        tokio::spawn(shared.clone().load());

        Self {
            shared,
            _subscription: subscription,
        }
    }

    /// Refetch now and wait for the result.
    pub async fn refresh(&self) {
        self.shared.clone().load().await;
    }

    pub fn snapshot(&self) -> EntitySnapshot<T> {
        self.shared.snapshot.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.shared.snapshot.borrow().data.clone()
    }

    pub fn watch(&self) -> watch::Receiver<EntitySnapshot<T>> {
        self.shared.snapshot.subscribe()
    }

    /// Number of fetches started so far, the initial one included.
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl<T> Drop for LiveEntity<T> {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::SeqCst);
    }
}
