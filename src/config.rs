//! Client configuration.
//!
//! Values come from serde (e.g. a JSON settings blob) or from `PRODSIGHT_*`
//! environment variables; anything missing falls back to the defaults below.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::realtime::{ReconnectPolicy, TransportMode};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

pub const ENV_SERVER_URL: &str = "PRODSIGHT_REALTIME_URL";
pub const ENV_API_URL: &str = "PRODSIGHT_API_URL";
pub const ENV_TRANSPORTS: &str = "PRODSIGHT_TRANSPORTS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "PRODSIGHT_MAX_RECONNECT_ATTEMPTS";
pub const ENV_RECONNECT_DELAY_MS: &str = "PRODSIGHT_RECONNECT_DELAY_MS";
pub const ENV_STATUS_INTERVAL_SECS: &str = "PRODSIGHT_STATUS_INTERVAL_SECS";
pub const ENV_PING_INTERVAL_SECS: &str = "PRODSIGHT_PING_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "PRODSIGHT_REQUEST_TIMEOUT_SECS";
pub const ENV_POLL_WAIT_SECS: &str = "PRODSIGHT_POLL_WAIT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Base URL of the realtime server (http/https).
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Base URL of the REST API, including the `/api` prefix.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Transports to try, most preferred first.
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportMode>,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_status_poll_interval_secs")]
    pub status_poll_interval_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long the server may hold a long-poll request open.
    #[serde(default = "default_poll_wait_secs")]
    pub poll_wait_secs: u64,
}

fn default_server_url() -> String { DEFAULT_SERVER_URL.to_string() }
fn default_api_base_url() -> String { DEFAULT_API_BASE_URL.to_string() }
fn default_transports() -> Vec<TransportMode> { vec![TransportMode::WebSocket, TransportMode::Polling] }
fn default_max_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_base_delay_ms() -> u64 { 1000 }
fn default_status_poll_interval_secs() -> u64 { 5 }
fn default_ping_interval_secs() -> u64 { 30 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_poll_wait_secs() -> u64 { 25 }

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_base_url: default_api_base_url(),
            transports: default_transports(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            status_poll_interval_secs: default_status_poll_interval_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_wait_secs: default_poll_wait_secs(),
        }
    }
}

impl RealtimeConfig {
    /// Build a config from `PRODSIGHT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get(ENV_SERVER_URL) {
            config.server_url = url;
        }
        if let Some(url) = get(ENV_API_URL) {
            config.api_base_url = url;
        }
        if let Some(raw) = get(ENV_TRANSPORTS) {
            config.transports = parse_transport_list(&raw)?;
        }
        if let Some(raw) = get(ENV_MAX_RECONNECT_ATTEMPTS) {
            config.max_reconnect_attempts = parse_number(ENV_MAX_RECONNECT_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = get(ENV_RECONNECT_DELAY_MS) {
            config.reconnect_base_delay_ms = parse_number(ENV_RECONNECT_DELAY_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_STATUS_INTERVAL_SECS) {
            config.status_poll_interval_secs = parse_number(ENV_STATUS_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = get(ENV_PING_INTERVAL_SECS) {
            config.ping_interval_secs = parse_number(ENV_PING_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = get(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout_secs = parse_number(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = get(ENV_POLL_WAIT_SECS) {
            config.poll_wait_secs = parse_number(ENV_POLL_WAIT_SECS, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("server_url", &self.server_url)?;
        validate_url("api_base_url", &self.api_base_url)?;

        if self.transports.is_empty() {
            return Err(ConfigError::Invalid("at least one transport is required".to_string()));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect base delay must be positive".to_string()));
        }
        if self.status_poll_interval_secs == 0 || self.ping_interval_secs == 0 {
            return Err(ConfigError::Invalid("intervals must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

fn validate_url(key: &str, url: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ConfigError::Invalid(format!("{key} cannot be empty")));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: url.to_string(),
        });
    }
    Ok(())
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_transport_list(raw: &str) -> Result<Vec<TransportMode>, ConfigError> {
    let mut modes = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mode = TransportMode::from_str(part).map_err(|_| ConfigError::InvalidValue {
            key: ENV_TRANSPORTS.to_string(),
            value: part.to_string(),
        })?;
        if !modes.contains(&mode) {
            modes.push(mode);
        }
    }
    Ok(modes)
}
