//! Topic-based fan-out of run and sidebar events to WebSocket connections.

mod hub;

pub use hub::{ConnectionId, EventHub, HubConnection, HubError, INITIAL_SEQ};
