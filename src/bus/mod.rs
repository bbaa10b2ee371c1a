//! In-process event distribution for realtime notifications.
//!
//! The connection's reader task calls [`EventDispatcher::emit`] for every
//! inbound message; UI-side consumers register handlers by event name and hold
//! a [`Subscription`] guard for as long as they care.

mod dispatcher;
pub mod event_types;

pub use dispatcher::{EventDispatcher, EventHandler, EventSource, Subscription};
pub use event_types::{ChangeAction, ChangeEnvelope, ConnectionStatus, RoomAck};
