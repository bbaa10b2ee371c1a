//! Realtime connection to the ProdSight backend.
//!
//! This module provides:
//! - Transport abstractions: WebSocket streaming with HTTP long-poll fallback
//! - A connection manager with idempotent connect and exponential-backoff reconnection
//! - A provider that binds the connection lifecycle to authentication state

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod connection;
pub mod polling;
pub mod provider;
pub mod transport;
pub mod websocket;


pub use connection::{ConnectionManager, ReconnectPolicy};
pub use provider::{AuthSession, ConnectionFlags, Notifier, ProviderOptions, RealtimeProvider, TracingNotifier};
pub use transport::{FallbackConnector, RealtimeTransport, TransportConnector, TransportError, WireMessage};

/// Wire mode of a realtime transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Persistent bidirectional stream.
    #[default]
    WebSocket,
    /// HTTP long-poll fallback.
    Polling,
}

impl TransportMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportMode::WebSocket => "websocket",
            TransportMode::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" | "web_socket" => Ok(Self::WebSocket),
            "polling" | "poll" | "long-poll" | "long_poll" => Ok(Self::Polling),
            _ => Err(format!("unsupported transport mode: {value}")),
        }
    }
}

/// Connection lifecycle as observed from outside the manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Point-in-time view of a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connected: bool,
    pub is_connecting: bool,
    pub reconnect_attempts: u32,
    pub mode: Option<TransportMode>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionStats {
    pub fn state(&self) -> ConnectionState {
        if self.connected {
            ConnectionState::Connected
        } else if self.is_connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }
}
