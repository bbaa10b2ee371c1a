//! Common test utilities for realtime integration tests.

pub mod ws_server;

pub use ws_server::TestRealtimeServer;
