use crate::realtime::transport::TransportError;

/// Errors surfaced by [`ConnectionManager::connect`](crate::realtime::ConnectionManager::connect).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RealtimeError {
    #[error("authentication token is empty")]
    MissingToken,
    /// The in-flight attempt this call was waiting on did not connect.
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("{0}")]
    Transport(#[from] TransportError),
}

impl RealtimeError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RealtimeError::Transport(TransportError::Unauthorized(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("config error: {0}")]
    Invalid(String),
}
