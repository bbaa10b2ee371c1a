//! Shared test doubles for the realtime stack.
//!
//! `MockConnector` hands out scripted `MockTransport`s and records every open
//! attempt with its (tokio) timestamp, so backoff schedules can be asserted
//! under a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::models::{Role, User};
use crate::api::ApiError;
use crate::live::EntityFetcher;
use crate::realtime::provider::Notifier;
use crate::realtime::transport::{RealtimeTransport, TransportConnector, TransportError, WireMessage};
use crate::realtime::TransportMode;

// ============================================================================
// Mock Transport
// ============================================================================

pub struct MockTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Option<WireMessage>>>,
    loopback: mpsc::UnboundedSender<Option<WireMessage>>,
    sent: Mutex<Vec<WireMessage>>,
    closed: AtomicBool,
}

/// Test-side handle to a transport the connector handed out.
#[derive(Clone)]
pub struct MockTransportHandle {
    tx: mpsc::UnboundedSender<Option<WireMessage>>,
    transport: Arc<MockTransport>,
}

impl MockTransport {
    pub fn pair() -> (Arc<MockTransport>, MockTransportHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            inbound: tokio::sync::Mutex::new(rx),
            loopback: tx.clone(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let handle = MockTransportHandle {
            tx,
            transport: transport.clone(),
        };
        (transport, handle)
    }
}

#[async_trait]
impl RealtimeTransport for MockTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::WebSocket
    }

    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<WireMessage>, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Some(message)) => Ok(Some(message)),
            Some(None) | None => Ok(None),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.loopback.send(None);
        }
    }
}

impl MockTransportHandle {
    /// Deliver an inbound frame as if the server sent it.
    pub fn push(&self, event: &str, data: Value) {
        let _ = self.tx.send(Some(WireMessage::new(event, data)));
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        let _ = self.tx.send(None);
    }

    pub fn sent(&self) -> Vec<WireMessage> {
        self.transport.sent.lock().unwrap().clone()
    }

    pub fn sent_events(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.event).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Mock Connector
// ============================================================================

pub enum OpenOutcome {
    Succeed,
    Fail(TransportError),
}

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub at: Instant,
    pub token: String,
}

pub struct MockConnector {
    script: Mutex<VecDeque<OpenOutcome>>,
    open_delay: Mutex<Duration>,
    opens: Mutex<Vec<OpenRecord>>,
    handles: Mutex<Vec<MockTransportHandle>>,
}

impl MockConnector {
    /// A connector whose opens always succeed.
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    /// A connector that plays `outcomes` in order, then succeeds.
    pub fn scripted(outcomes: Vec<OpenOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            open_delay: Mutex::new(Duration::ZERO),
            opens: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// A connector that fails `times` opens with a connection error, then succeeds.
    pub fn failing(times: usize) -> Arc<Self> {
        Self::scripted(
            (0..times)
                .map(|_| OpenOutcome::Fail(TransportError::connection("connection refused")))
                .collect(),
        )
    }

    /// Queue one more connection failure.
    pub fn push_failure(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(OpenOutcome::Fail(TransportError::connection("connection refused")));
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().unwrap().clone()
    }

    /// Milliseconds between consecutive open attempts.
    pub fn open_gaps_ms(&self) -> Vec<u64> {
        let opens = self.opens();
        opens
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at).as_millis() as u64)
            .collect()
    }

    pub fn last_transport(&self) -> Option<MockTransportHandle> {
        self.handles.lock().unwrap().last().cloned()
    }

    pub fn transports(&self) -> Vec<MockTransportHandle> {
        self.handles.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(&self, token: &str) -> Result<Arc<dyn RealtimeTransport>, TransportError> {
        self.opens.lock().unwrap().push(OpenRecord {
            at: Instant::now(),
            token: token.to_string(),
        });

        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().unwrap().pop_front();
        match outcome.unwrap_or(OpenOutcome::Succeed) {
            OpenOutcome::Succeed => {
                let (transport, handle) = MockTransport::pair();
                self.handles.lock().unwrap().push(handle);
                Ok(transport)
            }
            OpenOutcome::Fail(e) => Err(e),
        }
    }
}

// ============================================================================
// Notifier / Fetcher Doubles
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    successes: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn success(&self, message: &str) {
        self.successes.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}

/// Fetcher that counts calls and returns a settable value.
pub struct CountingFetcher<T> {
    calls: AtomicUsize,
    value: Mutex<T>,
    failures: Mutex<VecDeque<ApiError>>,
    delay: Mutex<Duration>,
}

impl<T: Clone + Send + Sync + 'static> CountingFetcher<T> {
    pub fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            value: Mutex::new(value),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_value(&self, value: T) {
        *self.value.lock().unwrap() = value;
    }

    pub fn fail_next(&self, err: ApiError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> EntityFetcher<T> for CountingFetcher<T> {
    async fn fetch(&self) -> Result<T, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Value and delay are captured when the call starts.
        let value = self.value.lock().unwrap().clone();
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(value)
    }
}

pub fn test_user(id: &str, role: Role) -> User {
    User {
        id: id.to_string(),
        name: format!("User {id}"),
        role,
        email: format!("{id}@prodsight.test"),
        avatar: None,
        username: Some(id.to_string()),
        permissions: Vec::new(),
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
