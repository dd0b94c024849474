//! Socket transport
//!
//! The connection actor owns one `SocketTransport` and is the only writer.
//! Implementations run their own I/O tasks and report back through an
//! [`EventSink`]; none of the trait methods block.

pub mod websocket;

pub use websocket::WebSocketTransport;

use crate::error::ConnectionError;
use crate::events::EventSink;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketPayload {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(SocketPayload),
    Pong,
    Close { code: u16, reason: Option<String> },
    /// I/O or handshake failure; the socket is gone after this
    Failure(String),
}

pub type SocketEventSink = EventSink<SocketEvent>;

pub trait SocketTransport: Send {
    /// Start connecting. Completion is reported as `Open` or `Failure`.
    fn open(&mut self, url: &Url, events: SocketEventSink);

    /// Queue a frame for sending.
    fn send(&mut self, payload: SocketPayload) -> Result<(), ConnectionError>;

    /// Start the closing handshake. The peer's acknowledgment arrives as `Close`.
    fn close(&mut self, code: u16, reason: &str);
}
