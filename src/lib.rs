//! ProdSight realtime client library.
//!
//! Keeps a dashboard in sync with the ProdSight backend. It handles:
//! - One authenticated realtime connection with automatic reconnection
//! - In-process fan-out of server notifications by event name
//! - Per-resource caches that refetch over REST when notified
//!
//! # Architecture
//!
//! - `realtime`: transports, connection manager and the auth-bound provider
//! - `bus`: event dispatcher and notification payload types
//! - `live`: live entity caches (tasks, budget, script, script metrics)
//! - `api`: REST client and resource models
//! - `config`: configuration with environment overrides

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod live;
pub mod realtime;

#[cfg(test)]
mod testing;

pub use bus::{EventDispatcher, EventSource, Subscription};
pub use config::RealtimeConfig;
pub use error::{ConfigError, RealtimeError};
pub use realtime::{
    AuthSession, ConnectionFlags, ConnectionManager, ConnectionState, ConnectionStats, Notifier,
    RealtimeProvider, TracingNotifier, TransportMode,
};

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "prodsight_realtime=debug,info";

/// Install the global `tracing` subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
