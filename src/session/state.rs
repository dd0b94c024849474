//! Per-session negotiation state, owned by the connection actor.

use super::stream::{Stream, StreamSet};
use crate::engine::TransportEngine;
use crate::error::ConnectionError;
use crate::events::{ConnectionId, Owner};
use crate::signaling::{NegotiationOptions, Rid, Role};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ConnectionError>>;

/// State reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NegotiationStep {
    /// Socket is still opening
    AwaitingSocket,
    /// `connect` sent, no offer yet
    AwaitingOffer,
    /// Engine is producing the answer
    Answering,
}

pub(crate) enum Negotiation {
    Idle,
    Negotiating {
        engine: Arc<dyn TransportEngine>,
        step: NegotiationStep,
    },
    Active {
        engine: Arc<dyn TransportEngine>,
        renegotiating: bool,
    },
    /// Streams are gone and the engine is being released
    Closing { error: Option<ConnectionError> },
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Negotiation::Idle => f.write_str("Idle"),
            Negotiation::Negotiating { step, .. } => write!(f, "Negotiating({:?})", step),
            Negotiation::Active { renegotiating, .. } => {
                write!(f, "Active(renegotiating: {})", renegotiating)
            }
            Negotiation::Closing { error } => write!(f, "Closing({:?})", error),
        }
    }
}

/// Identifiers the server assigned in its offer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub client_id: Option<String>,
    pub connection_id: Option<String>,
    pub simulcast_rpc_rids: Option<Vec<Rid>>,
}

pub(crate) struct SessionCore {
    pub owner: Owner,
    /// Bumped on every connect and teardown; tags async completions
    pub generation: u64,
    pub negotiation: Negotiation,
    pub options: NegotiationOptions,
    pub metadata: Option<Value>,
    pub info: SessionInfo,
    pub streams: StreamSet,
    pub connect_waiter: Option<Reply<()>>,
    pub disconnect_waiters: Vec<Reply<()>>,
}

impl SessionCore {
    pub fn new(connection: ConnectionId, role: Role) -> Self {
        Self {
            owner: Owner::Session(connection, role),
            generation: 0,
            negotiation: Negotiation::Idle,
            options: NegotiationOptions::default(),
            metadata: None,
            info: SessionInfo::default(),
            streams: StreamSet::new(),
            connect_waiter: None,
            disconnect_waiters: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.negotiation {
            Negotiation::Idle => SessionState::Disconnected,
            Negotiation::Negotiating { .. } => SessionState::Connecting,
            Negotiation::Active { .. } => SessionState::Connected,
            Negotiation::Closing { .. } => SessionState::Disconnecting,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.negotiation, Negotiation::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.negotiation, Negotiation::Active { .. })
    }

    /// Engine of a live (negotiating or active) session.
    pub fn engine(&self) -> Option<Arc<dyn TransportEngine>> {
        match &self.negotiation {
            Negotiation::Negotiating { engine, .. } | Negotiation::Active { engine, .. } => {
                Some(engine.clone())
            }
            _ => None,
        }
    }

    pub fn step(&self) -> Option<NegotiationStep> {
        match self.negotiation {
            Negotiation::Negotiating { step, .. } => Some(step),
            _ => None,
        }
    }

    pub fn set_step(&mut self, next: NegotiationStep) {
        if let Negotiation::Negotiating { step, .. } = &mut self.negotiation {
            *step = next;
        }
    }

    /// Whether a stream id already belongs to this session. With multistream
    /// on, the session's own client id always counts as present.
    pub fn has_stream(&self, id: &str) -> bool {
        if self.streams.contains(id) {
            return true;
        }
        self.options.multistream && self.info.client_id.as_deref() == Some(id)
    }

    /// Attach a stream, rejecting ids already present.
    pub fn attach(&mut self, stream: Stream) -> Result<(), ConnectionError> {
        if self.has_stream(&stream.id) {
            return Err(ConnectionError::DuplicateStream(stream.id));
        }
        self.streams.insert(stream)
    }

    /// Accept a connect request.
    pub fn begin(
        &mut self,
        engine: Arc<dyn TransportEngine>,
        options: NegotiationOptions,
        metadata: Option<Value>,
        reply: Reply<()>,
    ) {
        self.generation += 1;
        self.options = options;
        self.metadata = metadata;
        self.info = SessionInfo::default();
        self.connect_waiter = Some(reply);
        self.negotiation = Negotiation::Negotiating {
            engine,
            step: NegotiationStep::AwaitingSocket,
        };
    }

    /// Enter `Closing`, returning the engine to release. `None` when the
    /// session is not live.
    pub fn close(&mut self, error: Option<ConnectionError>) -> Option<Arc<dyn TransportEngine>> {
        let engine = self.engine()?;
        self.generation += 1;
        self.negotiation = Negotiation::Closing { error };
        Some(engine)
    }

    /// Leave `Closing` for `Idle`, handing back the error that caused it.
    pub fn finish(&mut self) -> Option<ConnectionError> {
        let previous = std::mem::replace(&mut self.negotiation, Negotiation::Idle);
        self.info = SessionInfo::default();
        self.metadata = None;
        match previous {
            Negotiation::Closing { error } => error,
            _ => None,
        }
    }
}
