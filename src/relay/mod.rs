//! Broadcast relay
//!
//! Accepts WebSocket connections on a fixed path and forwards each inbound
//! text message to every other open connection.

pub mod error;
pub mod hub;
pub mod server;

pub use error::{RelayError, RelayResult};
pub use hub::{ConnectionId, HubCommand, HubSnapshot, HubStats, RelayHandle};
pub use server::{router, serve, serve_listener};
