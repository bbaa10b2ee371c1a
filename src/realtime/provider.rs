//! Connection lifecycle bound to authentication state.
//!
//! [`RealtimeProvider`] watches the current [`AuthSession`], connects when a
//! user logs in, disconnects on logout, keeps [`ConnectionFlags`] fresh and
//! sends periodic keep-alive pings.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::connection::ConnectionManager;
use super::transport::FallbackConnector;
use super::{ConnectionState, ConnectionStats};
use crate::api::models::User;
use crate::bus::event_types::{EVENT_CONNECTION_STATUS, EVENT_PONG};
use crate::bus::{EventDispatcher, EventHandler, EventSource, Subscription};
use crate::config::RealtimeConfig;
use crate::error::ConfigError;

pub const CONNECTED_MESSAGE: &str = "Connected to real-time updates";
pub const CONNECT_FAILED_MESSAGE: &str = "Failed to connect to real-time updates";

/// The logged-in user and their bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

impl AuthSession {
    pub fn new(user: User, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
        }
    }
}

/// User-facing notifications (toasts in a UI, log lines in a CLI).
pub trait Notifier: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn success(&self, message: &str) {
        info!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}

/// Connection flags exposed to consumers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionFlags {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub reconnect_attempts: u32,
}

impl ConnectionFlags {
    pub fn state(&self) -> ConnectionState {
        if self.is_connected {
            ConnectionState::Connected
        } else if self.is_connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl From<&ConnectionStats> for ConnectionFlags {
    fn from(stats: &ConnectionStats) -> Self {
        Self {
            is_connected: stats.connected,
            is_connecting: stats.is_connecting,
            reconnect_attempts: stats.reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    pub status_poll_interval: Duration,
    pub ping_interval: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            status_poll_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl ProviderOptions {
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self {
            status_poll_interval: config.status_poll_interval(),
            ping_interval: config.ping_interval(),
        }
    }
}

pub struct RealtimeProvider {
    manager: ConnectionManager,
    auth: watch::Receiver<Option<AuthSession>>,
    flags: watch::Sender<ConnectionFlags>,
    notifier: Arc<dyn Notifier>,
    options: ProviderOptions,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl RealtimeProvider {
    pub fn new(
        manager: ConnectionManager,
        auth: watch::Receiver<Option<AuthSession>>,
        notifier: Arc<dyn Notifier>,
        options: ProviderOptions,
    ) -> Arc<Self> {
        let (flags, _) = watch::channel(ConnectionFlags::default());
        let provider = Arc::new(Self {
            manager,
            auth,
            flags,
            notifier,
            options,
            tasks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let dispatcher = provider.manager.dispatcher().clone();
        let weak = Arc::downgrade(&provider);
        // The payload shape is server-defined; any status event triggers a refresh.
        let status = dispatcher.on(EVENT_CONNECTION_STATUS, move |payload: &Value| {
            debug!(%payload, "connection status");
            if let Some(provider) = weak.upgrade() {
                provider.refresh_flags();
            }
        });
        let pong = dispatcher.on(EVENT_PONG, |payload: &Value| {
            debug!(%payload, "pong received");
        });
        provider.lock_subscriptions().extend([status, pong]);

        provider
    }

    /// Build the full stack (connector chain, dispatcher, manager) from config.
    pub fn from_config(
        config: &RealtimeConfig,
        auth: watch::Receiver<Option<AuthSession>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let connector = Arc::new(FallbackConnector::from_config(config));
        let manager = ConnectionManager::new(connector, EventDispatcher::new(), config.reconnect_policy());
        Ok(Self::new(manager, auth, notifier, ProviderOptions::from_config(config)))
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Spawn the auth watcher, status poll and keep-alive ping. Calling it
    /// again while running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(auth_loop(Arc::downgrade(self), self.auth.clone())));

        let weak = Arc::downgrade(self);
        let period = self.options.status_poll_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(provider) = weak.upgrade() else {
                    return;
                };
                provider.refresh_flags();
            }
        }));

        let weak = Arc::downgrade(self);
        let period = self.options.ping_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(provider) = weak.upgrade() else {
                    return;
                };
                if provider.manager.is_connected() {
                    debug!("sending keep-alive ping");
                    provider.manager.ping();
                }
            }
        }));
    }

    /// Connect with the current session's token. Failures are reported through
    /// the notifier and never returned.
    pub async fn connect(&self) {
        let session = self.auth.borrow().clone();
        let Some(session) = session else {
            debug!("no auth session, skipping realtime connect");
            return;
        };

        self.flags.send_modify(|f| f.is_connecting = true);
        match self.manager.connect(&session.token).await {
            Ok(()) => {
                self.refresh_flags();
                self.notifier.success(CONNECTED_MESSAGE);
            }
            Err(e) => {
                error!(user_id = %session.user.id, "failed to connect to realtime server: {}", e);
                self.refresh_flags();
                self.notifier.error(CONNECT_FAILED_MESSAGE);
            }
        }
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
        self.flags.send_replace(ConnectionFlags::default());
    }

    /// Abort background tasks, drop the provider's own subscriptions and
    /// disconnect.
    pub fn stop(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        self.lock_subscriptions().clear();
        self.disconnect();
    }

    pub fn refresh_flags(&self) {
        let flags = ConnectionFlags::from(&self.manager.stats());
        self.flags.send_if_modified(|current| {
            let changed = *current != flags;
            *current = flags;
            changed
        });
    }

    pub fn flags(&self) -> ConnectionFlags {
        *self.flags.borrow()
    }

    pub fn watch_flags(&self) -> watch::Receiver<ConnectionFlags> {
        self.flags.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        self.manager.dispatcher()
    }

    pub fn subscribe<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.dispatcher().on(event, handler)
    }

    pub fn subscribe_typed<T, F>(&self, event: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.dispatcher().on_typed(event, handler)
    }

    pub fn ping(&self) -> bool {
        self.manager.ping()
    }

    pub fn join_project_room(&self, project_id: &str) -> bool {
        self.manager.join_project_room(project_id)
    }

    pub fn leave_project_room(&self, project_id: &str) -> bool {
        self.manager.leave_project_room(project_id)
    }
}

impl EventSource for RealtimeProvider {
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        self.dispatcher().register(event.to_string(), handler)
    }
}

impl Drop for RealtimeProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn auth_loop(provider: std::sync::Weak<RealtimeProvider>, mut auth: watch::Receiver<Option<AuthSession>>) {
    let mut last_token: Option<String> = None;
    loop {
        let token = auth.borrow_and_update().as_ref().map(|s| s.token.clone());
        let Some(strong) = provider.upgrade() else {
            return;
        };

        match (last_token.as_deref(), token.as_deref()) {
            (Some(_), None) => {
                info!("auth session ended, disconnecting realtime");
                strong.disconnect();
            }
            (None, Some(_)) => {
                let stats = strong.manager.stats();
                if !stats.connected && !stats.is_connecting {
                    strong.connect().await;
                }
            }
            (Some(old), Some(new)) if old != new => {
                info!("auth token changed, reconnecting realtime");
                strong.disconnect();
                strong.connect().await;
            }
            _ => {}
        }
        drop(strong);

        last_token = token;
        if auth.changed().await.is_err() {
            return;
        }
    }
}
