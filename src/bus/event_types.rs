//! Event name constants and envelope types for the realtime channel.
//!
//! Single source of truth for which event names the server may push and which
//! intents the client may send.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

pub const EVENT_CONNECTION_STATUS: &str = "connection_status";
pub const EVENT_PONG: &str = "pong";
pub const EVENT_TASK_UPDATE: &str = "task_update";
pub const EVENT_BUDGET_UPDATE: &str = "budget_update";
pub const EVENT_SCRIPT_UPDATE: &str = "script_update";
pub const EVENT_VFX_UPDATE: &str = "vfx_update";
pub const EVENT_ASSET_UPDATE: &str = "asset_update";
pub const EVENT_ROOM_JOINED: &str = "room_joined";
pub const EVENT_ROOM_LEFT: &str = "room_left";

/// Every event name the connection forwards to the dispatcher.
pub const INBOUND_EVENTS: &[&str] = &[
    EVENT_CONNECTION_STATUS,
    EVENT_PONG,
    EVENT_TASK_UPDATE,
    EVENT_BUDGET_UPDATE,
    EVENT_SCRIPT_UPDATE,
    EVENT_VFX_UPDATE,
    EVENT_ASSET_UPDATE,
    EVENT_ROOM_JOINED,
    EVENT_ROOM_LEFT,
];

// ---------------------------------------------------------------------------
// Outbound intents
// ---------------------------------------------------------------------------

pub const INTENT_PING: &str = "ping";
pub const INTENT_JOIN_PROJECT_ROOM: &str = "join_project_room";
pub const INTENT_LEAVE_PROJECT_ROOM: &str = "leave_project_room";

pub fn is_inbound_event(name: &str) -> bool {
    INBOUND_EVENTS.contains(&name)
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Kind of change an entity update notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Created => write!(f, "created"),
            ChangeAction::Updated => write!(f, "updated"),
            ChangeAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// `{ action, timestamp, <entity>: ... }` as pushed with every `*_update` event.
///
/// The entity payload is kept as raw JSON: consumers treat the envelope as a
/// change notification and refetch canonical state instead of merging it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub action: ChangeAction,
    pub timestamp: f64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ChangeEnvelope {
    /// Entity payload stored under `key` (`task`, `budget`, `script`, ...).
    pub fn entity(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Body of a `connection_status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `room_joined` / `room_left` acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAck {
    pub room: String,
}
