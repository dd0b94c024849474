//! Transport engine interface
//!
//! The engine does ICE, DTLS/SRTP, capture and rendering. Sessions only ask
//! it for answers, hand it candidates, and release it. Everything it notices
//! on its own comes back as an [`EngineEvent`].

#[cfg(feature = "webrtc-engine")]
pub mod peer_connection;

#[cfg(feature = "webrtc-engine")]
pub use peer_connection::WebRtcEngineFactory;

use crate::error::{ConnectionError, EngineError};
use crate::events::EventSink;
use crate::signaling::{NegotiationOptions, OfferConfiguration, Role};
use async_trait::async_trait;
use std::sync::Arc;

/// Remote offer plus the peer configuration the server sent with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescription {
    pub sdp: String,
    pub configuration: Option<OfferConfiguration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// Error that ends the session when ICE reaches this state.
    pub fn failure(&self) -> Option<ConnectionError> {
        match self {
            IceConnectionState::Failed => Some(ConnectionError::IceConnectionFailed),
            IceConnectionState::Disconnected | IceConnectionState::Closed => {
                Some(ConnectionError::IceConnectionDisconnected)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Locally gathered candidate, to be sent to the server
    IceCandidate(String),
    IceConnectionState(IceConnectionState),
    /// The engine closed its signaling state on its own
    SignalingClosed,
    StreamAdded(String),
    StreamRemoved(String),
}

pub type EngineEventSink = EventSink<EngineEvent>;

/// What a session asks the factory for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    pub role: Role,
    pub options: NegotiationOptions,
}

#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Open local capture for an upstream session and register its stream.
    fn start_capture(&self, stream_id: &str) -> Result<(), EngineError>;

    /// Apply the remote offer and produce the local answer SDP.
    async fn create_answer(&self, remote: &RemoteDescription) -> Result<String, EngineError>;

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), EngineError>;

    /// Release every resource held for the session.
    async fn close(&self) -> Result<(), EngineError>;
}

pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        spec: EngineSpec,
        events: EngineEventSink,
    ) -> Result<Arc<dyn TransportEngine>, EngineError>;
}
