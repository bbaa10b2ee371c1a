//! Realtime transport abstractions.
//!
//! A transport carries [`WireMessage`] frames in both directions over a single
//! authenticated session. Two implementations exist:
//! - WebSocketTransport: persistent bidirectional stream (preferred)
//! - PollingTransport: HTTP long-poll fallback for networks that block upgrades
//!
//! Connectors open transports; [`FallbackConnector`] tries them in order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::polling::PollingConnector;
use super::websocket::WebSocketConnector;
use super::TransportMode;
use crate::config::RealtimeConfig;

// ============================================================================
// Wire Format
// ============================================================================

/// One framed message: an event name and its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WireMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(TransportError::serialization)
    }

    pub fn decode(raw: &str) -> Result<Self, TransportError> {
        serde_json::from_str(raw).map_err(TransportError::serialization)
    }
}

// ============================================================================
// Transport Error Types
// ============================================================================

/// Errors specific to transport operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Could not reach the server or the stream broke.
    Connection(String),
    /// The server rejected the credential.
    Unauthorized(String),
    /// Non-success HTTP status.
    Http { status: u16, message: String },
    /// Timeout error.
    Timeout(Duration),
    /// The transport was closed locally.
    Closed,
    /// Serialization error.
    Serialization(String),
    /// Invalid response from server.
    InvalidResponse(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connection(msg) => write!(f, "Connection error: {}", msg),
            TransportError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            TransportError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            TransportError::Timeout(duration) => write!(f, "Timeout after {:?}", duration),
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            TransportError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Create a transport error from any error type.
    pub fn connection<E: fmt::Display>(err: E) -> Self {
        TransportError::Connection(err.to_string())
    }

    /// Create a serialization error.
    pub fn serialization<E: fmt::Display>(err: E) -> Self {
        TransportError::Serialization(err.to_string())
    }

    /// Map an HTTP status to the matching error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => TransportError::Unauthorized(message),
            _ => TransportError::Http { status, message },
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection(_) | TransportError::Timeout(_) => true,
            TransportError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// An open, authenticated realtime session.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Send one frame to the server.
    async fn send(&self, message: WireMessage) -> Result<(), TransportError>;

    /// Wait for the next inbound frame. `Ok(None)` means the server closed the
    /// session cleanly.
    async fn recv(&self) -> Result<Option<WireMessage>, TransportError>;

    /// Close the session. Idempotent.
    async fn close(&self);
}

/// Opens transports for a bearer token.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self, token: &str) -> Result<Arc<dyn RealtimeTransport>, TransportError>;
}

// ============================================================================
// Fallback Connector
// ============================================================================

/// Tries each connector in order and returns the first transport that opens.
///
/// A rejected credential stops the search: every transport authenticates the
/// same way, so the next one would be rejected too.
pub struct FallbackConnector {
    connectors: Vec<(TransportMode, Arc<dyn TransportConnector>)>,
}

impl FallbackConnector {
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    pub fn with(mut self, mode: TransportMode, connector: Arc<dyn TransportConnector>) -> Self {
        self.connectors.push((mode, connector));
        self
    }

    /// Build the connector chain described by `config.transports`.
    pub fn from_config(config: &RealtimeConfig) -> Self {
        let mut fallback = Self::new();
        for mode in &config.transports {
            let connector: Arc<dyn TransportConnector> = match mode {
                TransportMode::WebSocket => Arc::new(WebSocketConnector::new(
                    &config.server_url,
                    config.request_timeout(),
                )),
                TransportMode::Polling => Arc::new(PollingConnector::new(
                    &config.server_url,
                    config.request_timeout(),
                    config.poll_wait(),
                )),
            };
            fallback = fallback.with(*mode, connector);
        }
        fallback
    }

    pub fn modes(&self) -> Vec<TransportMode> {
        self.connectors.iter().map(|(mode, _)| *mode).collect()
    }
}

impl Default for FallbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for FallbackConnector {
    async fn open(&self, token: &str) -> Result<Arc<dyn RealtimeTransport>, TransportError> {
        let mut last_error = TransportError::Connection("no transports configured".to_string());

        for (mode, connector) in &self.connectors {
            debug!(transport = %mode, "opening realtime transport");
            match connector.open(token).await {
                Ok(transport) => return Ok(transport),
                Err(e @ TransportError::Unauthorized(_)) => return Err(e),
                Err(e) => {
                    warn!(transport = %mode, "realtime transport failed to open: {}", e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
