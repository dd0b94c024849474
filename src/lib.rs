//! signaling-core - WebRTC signaling and session lifecycle
//!
//! Drives upstream/downstream media sessions against a signaling server over
//! one shared WebSocket, delegating media transport to a pluggable engine.

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::Config;
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use error::{CodecError, ConnectionError, EngineError};
pub use events::{ConnectionCounts, Event, EventKind, Notification, Owner};
pub use session::{Session, SessionInfo, SessionState, Stream, StreamOrigin};
pub use signaling::{Message, NegotiationOptions, Role};
