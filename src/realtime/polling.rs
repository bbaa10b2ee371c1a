//! HTTP long-poll transport.
//!
//! Used when the WebSocket upgrade is unavailable. A session is created with a
//! handshake, inbound frames are fetched by repeated long-poll requests that
//! carry a cursor, and outbound frames are POSTed individually.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::transport::{RealtimeTransport, TransportConnector, TransportError, WireMessage};
use super::TransportMode;

pub const HANDSHAKE_PATH: &str = "/realtime/handshake";
pub const POLL_PATH: &str = "/realtime/poll";
pub const EMIT_PATH: &str = "/realtime/emit";
pub const CLOSE_PATH: &str = "/realtime/close";

#[derive(Debug, Deserialize)]
struct HandshakeResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    events: Vec<WireMessage>,
    #[serde(default)]
    cursor: Option<u64>,
    #[serde(default)]
    closed: bool,
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_decode() {
        TransportError::InvalidResponse(err.to_string())
    } else {
        TransportError::connection(err)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::from_status(status.as_u16(), body))
}

pub struct PollingConnector {
    base_url: String,
    request_timeout: Duration,
    poll_wait: Duration,
}

impl PollingConnector {
    pub fn new(server_url: &str, request_timeout: Duration, poll_wait: Duration) -> Self {
        Self {
            base_url: server_url.trim().trim_end_matches('/').to_string(),
            request_timeout,
            poll_wait,
        }
    }
}

#[async_trait]
impl TransportConnector for PollingConnector {
    async fn open(&self, token: &str) -> Result<Arc<dyn RealtimeTransport>, TransportError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::Unauthorized(format!("invalid token header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        // Long-poll requests are held open by the server for up to `poll_wait`.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(self.request_timeout)
            .timeout(self.request_timeout + self.poll_wait)
            .build()
            .map_err(TransportError::connection)?;

        let url = format!("{}{}", self.base_url, HANDSHAKE_PATH);
        debug!(url = %url, "opening long-poll session");
        let response = tokio::time::timeout(self.request_timeout, client.post(&url).send())
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))?
            .map_err(|e| map_reqwest_error(e, self.request_timeout))?;
        let handshake: HandshakeResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        if handshake.session_id.trim().is_empty() {
            return Err(TransportError::InvalidResponse("empty session id".to_string()));
        }

        Ok(Arc::new(PollingTransport {
            client,
            base_url: self.base_url.clone(),
            session_id: handshake.session_id,
            timeout: self.request_timeout + self.poll_wait,
            inbox: Mutex::new(PollState::default()),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Default)]
struct PollState {
    cursor: u64,
    buffered: VecDeque<WireMessage>,
}

pub struct PollingTransport {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
    timeout: Duration,
    inbox: Mutex<PollState>,
    closed: AtomicBool,
}

impl PollingTransport {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session_url(&self, path: &str) -> String {
        format!(
            "{}{}?session_id={}",
            self.base_url,
            path,
            urlencoding::encode(&self.session_id)
        )
    }
}

#[async_trait]
impl RealtimeTransport for PollingTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let response = self
            .client
            .post(self.session_url(EMIT_PATH))
            .json(&message)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;
        error_for_status(response).await.map(|_| ())
    }

    async fn recv(&self) -> Result<Option<WireMessage>, TransportError> {
        let mut state = self.inbox.lock().await;
        loop {
            if let Some(message) = state.buffered.pop_front() {
                return Ok(Some(message));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let url = format!("{}&cursor={}", self.session_url(POLL_PATH), state.cursor);

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| map_reqwest_error(e, self.timeout))?;
            if response.status() == StatusCode::GONE {
                debug!(session_id = %self.session_id, "long-poll session gone");
                return Ok(None);
            }
            let batch: PollResponse = error_for_status(response)
                .await?
                .json()
                .await
                .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

            trace!(events = batch.events.len(), "long-poll batch");
            if let Some(cursor) = batch.cursor {
                state.cursor = cursor;
            }
            state.buffered.extend(batch.events);
            if batch.closed && state.buffered.is_empty() {
                return Ok(None);
            }
            if batch.closed {
                self.closed.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.client.post(self.session_url(CLOSE_PATH)).send().await {
            trace!("long-poll close failed: {}", e);
        }
    }
}
