//! Connection manager.
//!
//! Owns at most one live transport. `connect` is idempotent and coalesces
//! concurrent callers onto the in-flight attempt; failures and server drops run
//! the reconnection policy until `disconnect` is called.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::transport::{RealtimeTransport, TransportConnector, WireMessage};
use super::{ConnectionStats, TransportMode};
use crate::bus::event_types::{
    is_inbound_event, INTENT_JOIN_PROJECT_ROOM, INTENT_LEAVE_PROJECT_ROOM, INTENT_PING,
};
use crate::bus::EventDispatcher;
use crate::error::RealtimeError;

/// Exponential backoff with a fixed attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

struct LiveConnection {
    id: Uuid,
    mode: TransportMode,
    transport: Arc<dyn RealtimeTransport>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    connected_at: DateTime<Utc>,
}

impl LiveConnection {
    fn shutdown(self) {
        self.reader.abort();
        self.writer.abort();
        close_in_background(self.transport);
    }
}

#[derive(Default)]
struct State {
    live: Option<LiveConnection>,
    connecting: bool,
    reconnect_attempts: u32,
    /// Bumped by `disconnect`; retries scheduled under an older epoch are void.
    epoch: u64,
    pending_retry: Option<JoinHandle<()>>,
    token: Option<String>,
    room: Option<String>,
}

struct Inner {
    connector: Arc<dyn TransportConnector>,
    dispatcher: Arc<EventDispatcher>,
    policy: ReconnectPolicy,
    state: Mutex<State>,
    /// Ticks every time an in-flight attempt settles.
    settled: watch::Sender<u64>,
}

enum Start {
    Connected,
    Wait(watch::Receiver<u64>),
    Open(u64),
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        dispatcher: Arc<EventDispatcher>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                connector,
                dispatcher,
                policy,
                state: Mutex::new(State::default()),
                settled,
            }),
        }
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.dispatcher
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_settled(&self) {
        self.inner.settled.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Establish the connection if it is not already established or pending.
    pub async fn connect(&self, token: &str) -> Result<(), RealtimeError> {
        if token.trim().is_empty() {
            return Err(RealtimeError::MissingToken);
        }

        let start = {
            let mut state = self.lock();
            if state.live.is_some() {
                Start::Connected
            } else if state.connecting {
                // Subscribe under the lock so the settle tick cannot be missed.
                Start::Wait(self.inner.settled.subscribe())
            } else {
                state.connecting = true;
                state.token = Some(token.to_string());
                Start::Open(state.epoch)
            }
        };

        let epoch = match start {
            Start::Connected => return Ok(()),
            Start::Wait(mut settled) => {
                debug!("waiting for in-flight realtime connection attempt");
                loop {
                    if settled.changed().await.is_err() {
                        return Err(RealtimeError::ConnectionFailed);
                    }
                    let state = self.lock();
                    if state.live.is_some() {
                        return Ok(());
                    }
                    if !state.connecting {
                        return Err(RealtimeError::ConnectionFailed);
                    }
                }
            }
            Start::Open(epoch) => epoch,
        };

        info!("connecting to realtime server");
        match self.inner.connector.open(token).await {
            Ok(transport) => self.install(epoch, transport),
            Err(e) => {
                let current = {
                    let mut state = self.lock();
                    if state.epoch == epoch {
                        state.connecting = false;
                    }
                    state.epoch == epoch
                };
                warn!("realtime connection failed: {}", e);
                if current {
                    // A superseded attempt must not wake waiters of the newer one.
                    self.notify_settled();
                    self.schedule_reconnect();
                }
                Err(RealtimeError::Transport(e))
            }
        }
    }

    fn install(&self, epoch: u64, transport: Arc<dyn RealtimeTransport>) -> Result<(), RealtimeError> {
        let mut state = self.lock();
        if state.epoch != epoch {
            // Disconnected while the transport was opening.
            drop(state);
            close_in_background(transport);
            return Err(RealtimeError::ConnectionFailed);
        }

        let id = Uuid::new_v4();
        let mode = transport.mode();
        let (outbound, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(Arc::downgrade(&self.inner), id, transport.clone()));
        let writer = tokio::spawn(write_loop(transport.clone(), rx));

        if let Some(room) = &state.room {
            let _ = outbound.send(room_intent(INTENT_JOIN_PROJECT_ROOM, room));
        }
        state.live = Some(LiveConnection {
            id,
            mode,
            transport,
            outbound,
            reader,
            writer,
            connected_at: Utc::now(),
        });
        state.connecting = false;
        state.reconnect_attempts = 0;
        drop(state);

        self.notify_settled();
        info!(transport = %mode, connection_id = %id, "connected to realtime server");
        Ok(())
    }

    /// Tear down the connection and suppress any scheduled reconnect.
    pub fn disconnect(&self) {
        let (live, retry) = {
            let mut state = self.lock();
            state.epoch = state.epoch.wrapping_add(1);
            state.connecting = false;
            state.reconnect_attempts = 0;
            (state.live.take(), state.pending_retry.take())
        };

        if let Some(retry) = retry {
            retry.abort();
        }
        if let Some(live) = live {
            info!(connection_id = %live.id, "disconnecting from realtime server");
            live.shutdown();
        }
        self.notify_settled();
    }

    fn schedule_reconnect(&self) {
        let mut state = self.lock();
        if state.live.is_some() {
            return;
        }
        if state.pending_retry.is_some() {
            debug!("realtime reconnect already scheduled");
            return;
        }
        let Some(token) = state.token.clone() else {
            return;
        };
        if state.reconnect_attempts >= self.inner.policy.max_attempts {
            error!(
                attempts = state.reconnect_attempts,
                "max reconnection attempts reached, giving up"
            );
            return;
        }

        state.reconnect_attempts += 1;
        let attempt = state.reconnect_attempts;
        let delay = self.inner.policy.delay_for_attempt(attempt);
        let epoch = state.epoch;
        info!(
            attempt,
            max_attempts = self.inner.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling realtime reconnect"
        );

        let weak = Arc::downgrade(&self.inner);
        state.pending_retry = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = ConnectionManager { inner };
            {
                let mut state = manager.lock();
                if state.epoch != epoch {
                    return;
                }
                state.pending_retry = None;
            }
            if manager.is_connected() {
                return;
            }
            if let Err(e) = manager.connect(&token).await {
                debug!(attempt, "realtime reconnect attempt failed: {}", e);
            }
        }));
    }

    fn handle_transport_closed(&self, connection_id: Uuid, reason: &str) {
        let live = {
            let mut state = self.lock();
            if state.live.as_ref().map(|l| l.id) != Some(connection_id) {
                return;
            }
            state.live.take()
        };
        if let Some(live) = live {
            warn!(connection_id = %connection_id, reason, "realtime connection lost");
            live.writer.abort();
            close_in_background(live.transport);
        }
        self.schedule_reconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.lock().live.is_some()
    }

    pub fn stats(&self) -> ConnectionStats {
        let state = self.lock();
        ConnectionStats {
            connected: state.live.is_some(),
            is_connecting: state.connecting,
            reconnect_attempts: state.reconnect_attempts,
            mode: state.live.as_ref().map(|l| l.mode),
            connected_at: state.live.as_ref().map(|l| l.connected_at),
        }
    }

    pub fn current_room(&self) -> Option<String> {
        self.lock().room.clone()
    }

    fn send_intent(&self, message: WireMessage) -> bool {
        let state = self.lock();
        match &state.live {
            Some(live) => live.outbound.send(message).is_ok(),
            None => {
                debug!(event = %message.event, "not connected, dropping realtime intent");
                false
            }
        }
    }

    pub fn ping(&self) -> bool {
        self.send_intent(WireMessage::new(INTENT_PING, Value::Null))
    }

    pub fn join_project_room(&self, project_id: &str) -> bool {
        self.lock().room = Some(project_id.to_string());
        self.send_intent(room_intent(INTENT_JOIN_PROJECT_ROOM, project_id))
    }

    pub fn leave_project_room(&self, project_id: &str) -> bool {
        {
            let mut state = self.lock();
            if state.room.as_deref() == Some(project_id) {
                state.room = None;
            }
        }
        self.send_intent(room_intent(INTENT_LEAVE_PROJECT_ROOM, project_id))
    }
}

fn room_intent(event: &str, project_id: &str) -> WireMessage {
    WireMessage::new(event, json!({ "project_id": project_id }))
}

fn close_in_background(transport: Arc<dyn RealtimeTransport>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { transport.close().await });
        }
        Err(_) => trace!("no runtime available to close realtime transport"),
    }
}

async fn read_loop(inner: Weak<Inner>, connection_id: Uuid, transport: Arc<dyn RealtimeTransport>) {
    let reason = loop {
        match transport.recv().await {
            Ok(Some(message)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if is_inbound_event(&message.event) {
                    debug!(event = %message.event, "realtime event");
                    inner.dispatcher.emit(&message.event, &message.data);
                } else {
                    debug!(event = %message.event, "ignoring unknown realtime event");
                }
            }
            Ok(None) => break "closed by server".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(inner) = inner.upgrade() {
        ConnectionManager { inner }.handle_transport_closed(connection_id, &reason);
    }
}

async fn write_loop(transport: Arc<dyn RealtimeTransport>, mut rx: mpsc::UnboundedReceiver<WireMessage>) {
    while let Some(message) = rx.recv().await {
        trace!(event = %message.event, "sending realtime intent");
        if let Err(e) = transport.send(message).await {
            warn!("failed to send realtime intent: {}", e);
        }
    }
}
