//! Error types shared by every layer of the signaling engine.

use thiserror::Error;

/// WebSocket close code for a clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code the signaling server uses to reject a session.
pub const CLOSE_SIGNALING_FAILURE: u16 = 4490;

/// Failure reported by the transport engine.
///
/// Engines are external collaborators, so only the message survives the
/// boundary. It is cheap to clone which lets one occurrence reach both the
/// registered handler and every broadcast subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Classified connection failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Endpoint or options are unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No offer arrived before the connect deadline
    #[error("Timed out waiting for the connection")]
    ConnectionWaitTimeout,

    #[error("Connection is already disconnected")]
    ConnectionDisconnected,

    /// The owning connection went away mid-operation
    #[error("Connection terminated")]
    ConnectionTerminated,

    /// Another transition is in flight
    #[error("Connection is busy")]
    ConnectionBusy,

    /// A pending connect was abandoned by a disconnect request
    #[error("Connection attempt cancelled")]
    ConnectionCancelled,

    #[error("WebSocket closed with code {code}{}", reason_suffix(.reason))]
    WebSocketClose { code: u16, reason: Option<String> },

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Signaling failure: {reason}")]
    SignalingFailure { reason: String },

    #[error("Peer connection error: {0}")]
    PeerConnectionError(EngineError),

    #[error("ICE connection failed")]
    IceConnectionFailed,

    #[error("ICE connection disconnected")]
    IceConnectionDisconnected,

    #[error("Media capturer failed")]
    MediaCapturerFailed,

    #[error("Media stream not found")]
    MediaStreamNotFound,

    /// A stream id was attached twice to the same session
    #[error("Media stream already exists: {0}")]
    DuplicateStream(String),

    #[error("{} connection errors occurred", .0.len())]
    Aggregate(Vec<ConnectionError>),

    /// Renegotiation failure, kept apart from initial negotiation failures
    #[error("Update failed: {0}")]
    UpdateError(Box<ConnectionError>),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" ({})", reason),
        None => String::new(),
    }
}

impl ConnectionError {
    /// Classify a socket close.
    ///
    /// Returns `None` for a clean close.
    pub fn from_close(code: u16, reason: Option<String>) -> Option<Self> {
        match code {
            CLOSE_NORMAL => None,
            CLOSE_SIGNALING_FAILURE => Some(ConnectionError::SignalingFailure {
                reason: reason.unwrap_or_else(|| "Unknown reason".to_string()),
            }),
            code => Some(ConnectionError::WebSocketClose { code, reason }),
        }
    }

    /// Collapse independent failures: none is success, one is reported as
    /// itself, several become an aggregate.
    pub fn aggregate(mut errors: Vec<ConnectionError>) -> Result<(), ConnectionError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConnectionError::Aggregate(errors)),
        }
    }

    /// Wrap a renegotiation failure.
    pub fn update(cause: ConnectionError) -> Self {
        ConnectionError::UpdateError(Box::new(cause))
    }
}

/// Signaling codec failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid signaling message: {0}")]
    Decode(String),

    #[error("Failed to serialize message: {0}")]
    Encode(String),
}

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        ConnectionError::SignalingFailure { reason: err.to_string() }
    }
}

impl From<EngineError> for ConnectionError {
    fn from(err: EngineError) -> Self {
        ConnectionError::PeerConnectionError(err)
    }
}
