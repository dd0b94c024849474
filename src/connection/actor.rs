//! Connection actor
//!
//! One task per [`Connection`](super::Connection) owns the socket, both
//! sessions and the channel counts. Every transition runs inside this task:
//! - handle requests arrive on the public mailbox
//! - socket events, engine events, answer completions and deadlines arrive
//!   on the internal mailbox, tagged with the socket epoch or the session
//!   generation they belong to
//!
//! Completions carrying an outdated tag are dropped, which is how a
//! disconnect cancels work already in flight.

use super::{ConnectionConfig, ConnectionState};
use crate::engine::{EngineEvent, EngineEventSink, EngineFactory, EngineSpec, RemoteDescription};
use crate::error::{ConnectionError, EngineError, CLOSE_NORMAL};
use crate::events::{Attendee, ConnectionCounts, ConnectionId, Event, EventBus, Owner};
use crate::session::state::{Negotiation, NegotiationStep, Reply, SessionCore};
use crate::session::{SessionInfo, SessionState, Stream, StreamOrigin};
use crate::signaling::{
    Message, NegotiationOptions, NotifyEventType, Role, SignalingConnect, SignalingNotify,
    SignalingOffer,
};
use crate::transport::{SocketEvent, SocketEventSink, SocketPayload, SocketTransport};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Messages from `Connection` and `Session` handles.
pub(crate) enum Request {
    Connect {
        role: Role,
        options: NegotiationOptions,
        metadata: Option<Value>,
        timeout: Option<Duration>,
        reply: Reply<()>,
    },
    Disconnect {
        role: Role,
        reply: Reply<()>,
    },
    Send {
        role: Role,
        message: Message,
        reply: Reply<()>,
    },
    AddStream {
        role: Role,
        stream_id: String,
        reply: Reply<()>,
    },
    RemoveStream {
        role: Role,
        stream_id: String,
        reply: Reply<()>,
    },
    HasStream {
        role: Role,
        stream_id: String,
        reply: Reply<bool>,
    },
    Streams {
        role: Role,
        reply: Reply<Vec<Stream>>,
    },
    SessionState {
        role: Role,
        reply: Reply<SessionState>,
    },
    SessionInfo {
        role: Role,
        reply: Reply<SessionInfo>,
    },
    ConnectionState {
        reply: Reply<ConnectionState>,
    },
    ConnectionCounts {
        reply: Reply<Option<ConnectionCounts>>,
    },
}

/// Send a request and wait for its reply.
///
/// The sender is dropped before waiting so a pending call never keeps the
/// actor alive.
pub(crate) async fn call<T>(
    requests: mpsc::UnboundedSender<Request>,
    build: impl FnOnce(Reply<T>) -> Request,
) -> Result<T, ConnectionError> {
    let (tx, rx) = oneshot::channel();
    requests
        .send(build(tx))
        .map_err(|_| ConnectionError::ConnectionTerminated)?;
    drop(requests);
    rx.await.map_err(|_| ConnectionError::ConnectionTerminated)?
}

/// Work completed outside the actor.
enum Internal {
    Socket {
        epoch: u64,
        event: SocketEvent,
    },
    Engine {
        role: Role,
        generation: u64,
        event: EngineEvent,
    },
    AnswerReady {
        role: Role,
        generation: u64,
        result: Result<String, EngineError>,
    },
    UpdateReady {
        role: Role,
        generation: u64,
        result: Result<String, EngineError>,
    },
    EngineReleased {
        role: Role,
        generation: u64,
        result: Result<(), EngineError>,
    },
    ConnectTimeout {
        role: Role,
        generation: u64,
    },
    CloseTimeout {
        epoch: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketPhase {
    Closed,
    Opening,
    Open,
    /// Close frame sent, waiting for the acknowledgment
    Closing,
}

pub(crate) struct ConnectionActor {
    id: ConnectionId,
    owner: Owner,
    config: ConnectionConfig,
    bus: Arc<EventBus>,
    transport: Box<dyn SocketTransport>,
    engines: Arc<dyn EngineFactory>,
    internal: mpsc::UnboundedSender<Internal>,
    state: ConnectionState,
    socket: SocketPhase,
    epoch: u64,
    upstream: SessionCore,
    downstream: SessionCore,
    /// Sessions that sent `connect`, oldest first
    offer_queue: VecDeque<Role>,
    counts: Option<ConnectionCounts>,
}

impl ConnectionActor {
    /// Spawn the actor. It runs until every strong request sender is dropped.
    pub(crate) fn spawn(
        id: ConnectionId,
        config: ConnectionConfig,
        bus: Arc<EventBus>,
        transport: Box<dyn SocketTransport>,
        engines: Arc<dyn EngineFactory>,
    ) -> (mpsc::UnboundedSender<Request>, JoinHandle<()>) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = Self {
            owner: Owner::Connection(id.clone()),
            upstream: SessionCore::new(id.clone(), Role::Upstream),
            downstream: SessionCore::new(id.clone(), Role::Downstream),
            id,
            config,
            bus,
            transport,
            engines,
            internal: internal_tx,
            state: ConnectionState::Disconnected,
            socket: SocketPhase::Closed,
            epoch: 0,
            offer_queue: VecDeque::new(),
            counts: None,
        };

        let task = tokio::spawn(actor.run(requests_rx, internal_rx));
        (requests_tx, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        debug!("Connection {} actor started", self.id);

        loop {
            tokio::select! {
                biased;

                Some(message) = internal.recv() => self.handle_internal(message),

                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
            }
        }

        self.terminate();
        self.await_close(&mut internal).await;
        info!("Connection {} terminated", self.id);
    }

    fn session(&self, role: Role) -> &SessionCore {
        match role {
            Role::Upstream => &self.upstream,
            Role::Downstream => &self.downstream,
        }
    }

    fn session_mut(&mut self, role: Role) -> &mut SessionCore {
        match role {
            Role::Upstream => &mut self.upstream,
            Role::Downstream => &mut self.downstream,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == ConnectionState::Terminated || self.state == state {
            return;
        }
        info!("Connection {} state: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect {
                role,
                options,
                metadata,
                timeout,
                reply,
            } => self.connect(role, options, metadata, timeout, reply),
            Request::Disconnect { role, reply } => self.disconnect(role, reply),
            Request::Send { role, message, reply } => {
                let result = if self.session(role).is_active() {
                    self.send_message(&message)
                } else {
                    Err(ConnectionError::ConnectionDisconnected)
                };
                let _ = reply.send(result);
            }
            Request::AddStream {
                role,
                stream_id,
                reply,
            } => {
                let result = if self.session(role).engine().is_some() {
                    self.attach_stream(role, Stream::new(stream_id, StreamOrigin::Remote))
                } else {
                    Err(ConnectionError::ConnectionDisconnected)
                };
                let _ = reply.send(result);
            }
            Request::RemoveStream {
                role,
                stream_id,
                reply,
            } => {
                self.detach_stream(role, &stream_id);
                let _ = reply.send(Ok(()));
            }
            Request::HasStream {
                role,
                stream_id,
                reply,
            } => {
                let _ = reply.send(Ok(self.session(role).has_stream(&stream_id)));
            }
            Request::Streams { role, reply } => {
                let _ = reply.send(Ok(self.session(role).streams.to_vec()));
            }
            Request::SessionState { role, reply } => {
                let _ = reply.send(Ok(self.session(role).state()));
            }
            Request::SessionInfo { role, reply } => {
                let _ = reply.send(Ok(self.session(role).info.clone()));
            }
            Request::ConnectionState { reply } => {
                let _ = reply.send(Ok(self.state));
            }
            Request::ConnectionCounts { reply } => {
                let _ = reply.send(Ok(self.counts));
            }
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Socket { epoch, event } => self.handle_socket(epoch, event),
            Internal::Engine {
                role,
                generation,
                event,
            } => self.handle_engine(role, generation, event),
            Internal::AnswerReady {
                role,
                generation,
                result,
            } => self.answer_ready(role, generation, result),
            Internal::UpdateReady {
                role,
                generation,
                result,
            } => self.update_ready(role, generation, result),
            Internal::EngineReleased {
                role,
                generation,
                result,
            } => self.engine_released(role, generation, result),
            Internal::ConnectTimeout { role, generation } => {
                let session = self.session(role);
                if session.generation == generation && session.step().is_some() {
                    warn!("{} session got no offer in time", role);
                    self.teardown(role, Some(ConnectionError::ConnectionWaitTimeout));
                }
            }
            Internal::CloseTimeout { epoch } => {
                if epoch == self.epoch && self.socket == SocketPhase::Closing {
                    warn!("Connection {} close was not acknowledged in time", self.id);
                    self.socket_gone();
                }
            }
        }
    }

    fn connect(
        &mut self,
        role: Role,
        options: NegotiationOptions,
        metadata: Option<Value>,
        timeout: Option<Duration>,
        reply: Reply<()>,
    ) {
        if !self.session(role).is_idle() || self.state == ConnectionState::Disconnecting {
            debug!("Rejecting {} connect: busy", role);
            let _ = reply.send(Err(ConnectionError::ConnectionBusy));
            return;
        }

        let scheme = self.config.url.scheme();
        if scheme != "ws" && scheme != "wss" {
            let _ = reply.send(Err(ConnectionError::Configuration(format!(
                "Unsupported signaling URL scheme: {}",
                scheme
            ))));
            return;
        }

        let generation = self.session(role).generation + 1;
        let internal = self.internal.clone();
        let sink = EngineEventSink::new(move |event| {
            let _ = internal.send(Internal::Engine {
                role,
                generation,
                event,
            });
        });
        let spec = EngineSpec {
            role,
            options: options.clone(),
        };
        let engine = match self.engines.create(spec, sink) {
            Ok(engine) => engine,
            Err(e) => {
                error!("Failed to create {} engine: {}", role, e);
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        info!("Connecting {} session to channel {}", role, self.config.channel_id);
        self.session_mut(role).begin(engine, options, metadata, reply);
        self.arm_connect_timeout(role, generation, timeout.unwrap_or(self.config.connect_timeout));
        self.set_state_if(ConnectionState::Disconnected, ConnectionState::Connecting);

        match self.socket {
            SocketPhase::Closed => self.open_socket(),
            SocketPhase::Open => self.socket_ready(role),
            SocketPhase::Opening | SocketPhase::Closing => {}
        }
    }

    fn set_state_if(&mut self, from: ConnectionState, to: ConnectionState) {
        if self.state == from {
            self.set_state(to);
        }
    }

    fn disconnect(&mut self, role: Role, reply: Reply<()>) {
        match self.session(role).state() {
            SessionState::Disconnected => {
                let _ = reply.send(Err(ConnectionError::ConnectionDisconnected));
            }
            SessionState::Disconnecting => {
                let _ = reply.send(Err(ConnectionError::ConnectionBusy));
            }
            SessionState::Connecting | SessionState::Connected => {
                self.session_mut(role).disconnect_waiters.push(reply);
                self.teardown(role, None);
            }
        }
    }

    fn open_socket(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;
        let internal = self.internal.clone();
        let sink = SocketEventSink::new(move |event| {
            let _ = internal.send(Internal::Socket { epoch, event });
        });

        info!("Connection {} opening {}", self.id, self.config.url);
        self.socket = SocketPhase::Opening;
        self.transport.open(&self.config.url, sink);
    }

    fn close_socket(&mut self) {
        match self.socket {
            SocketPhase::Open => {
                self.set_state(ConnectionState::Disconnecting);
                self.socket = SocketPhase::Closing;
                self.transport.close(CLOSE_NORMAL, "");
                self.arm_close_timeout(self.epoch);
            }
            SocketPhase::Opening => {
                self.transport.close(CLOSE_NORMAL, "");
                self.socket_gone();
            }
            SocketPhase::Closing | SocketPhase::Closed => {}
        }
    }

    /// The socket is unusable; anything it reports later is stale.
    fn socket_gone(&mut self) {
        self.socket = SocketPhase::Closed;
        self.epoch += 1;
        self.set_state(ConnectionState::Disconnected);
    }

    fn send_message(&mut self, message: &Message) -> Result<(), ConnectionError> {
        if self.socket != SocketPhase::Open {
            return Err(ConnectionError::ConnectionDisconnected);
        }
        let text = message.to_json()?;
        debug!("Sending {} message", message.message_type());
        self.transport.send(SocketPayload::Text(text))
    }

    fn arm_connect_timeout(&self, role: Role, generation: u64, after: Duration) {
        let internal = self.internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = internal.send(Internal::ConnectTimeout { role, generation });
        });
    }

    fn arm_close_timeout(&self, epoch: u64) {
        let internal = self.internal.clone();
        let after = self.config.close_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = internal.send(Internal::CloseTimeout { epoch });
        });
    }

    fn handle_socket(&mut self, epoch: u64, event: SocketEvent) {
        if epoch != self.epoch {
            debug!("Discarding socket event from epoch {}: {:?}", epoch, event);
            return;
        }

        match event {
            SocketEvent::Open => {
                if self.socket != SocketPhase::Opening {
                    return;
                }
                info!("Connection {} socket open", self.id);
                self.socket = SocketPhase::Open;
                for role in Role::ALL {
                    self.socket_ready(role);
                }
            }
            SocketEvent::Message(payload) => self.socket_message(payload),
            SocketEvent::Pong => debug!("Socket pong"),
            SocketEvent::Close { code, reason } => {
                let requested = self.socket == SocketPhase::Closing;
                self.socket_gone();
                if requested {
                    info!("Connection {} socket closed ({})", self.id, code);
                    return;
                }
                warn!("Connection {} socket closed by peer: {} {:?}", self.id, code, reason);
                let error = ConnectionError::from_close(code, reason);
                for role in Role::ALL {
                    let error = match self.session(role).step() {
                        // Never connected, so a clean close still fails the attempt
                        Some(_) => Some(
                            error
                                .clone()
                                .unwrap_or(ConnectionError::ConnectionDisconnected),
                        ),
                        None => error.clone(),
                    };
                    self.teardown(role, error);
                }
            }
            SocketEvent::Failure(reason) => {
                error!("Connection {} socket failed: {}", self.id, reason);
                self.socket_gone();
                for role in Role::ALL {
                    self.teardown(role, Some(ConnectionError::WebSocketError(reason.clone())));
                }
            }
        }
    }

    /// The socket is open: capture (upstream) and send `connect`.
    fn socket_ready(&mut self, role: Role) {
        if self.session(role).step() != Some(NegotiationStep::AwaitingSocket) {
            return;
        }

        if role == Role::Upstream {
            if let Err(err) = self.start_capture(role) {
                self.teardown(role, Some(err));
                return;
            }
        }

        let session = self.session(role);
        let connect = SignalingConnect::new(
            role,
            self.config.channel_id.clone(),
            session.metadata.clone(),
            &session.options,
        );
        if let Err(err) = self.send_message(&Message::Connect(connect)) {
            self.teardown(role, Some(err));
            return;
        }

        self.session_mut(role).set_step(NegotiationStep::AwaitingOffer);
        self.offer_queue.push_back(role);
    }

    fn start_capture(&mut self, role: Role) -> Result<(), ConnectionError> {
        let engine = self
            .session(role)
            .engine()
            .ok_or(ConnectionError::ConnectionDisconnected)?;
        let stream_id = uuid::Uuid::new_v4().to_string();
        engine.start_capture(&stream_id).map_err(|e| {
            error!("Media capture failed: {}", e);
            ConnectionError::MediaCapturerFailed
        })?;
        self.attach_stream(role, Stream::new(stream_id, StreamOrigin::Local))
    }

    fn attach_stream(&mut self, role: Role, stream: Stream) -> Result<(), ConnectionError> {
        let id = stream.id.clone();
        let session = self.session_mut(role);
        if let Err(err) = session.attach(stream) {
            error!("{} session already has stream {}", role, id);
            return Err(err);
        }
        let owner = session.owner.clone();
        debug!("{} session added stream {}", role, id);
        self.bus.emit(&owner, Event::AddStream(id));
        Ok(())
    }

    fn detach_stream(&mut self, role: Role, id: &str) {
        let session = self.session_mut(role);
        if session.streams.remove(id).is_some() {
            let owner = session.owner.clone();
            debug!("{} session removed stream {}", role, id);
            self.bus.emit(&owner, Event::RemoveStream(id.to_string()));
        }
    }

    fn socket_message(&mut self, payload: SocketPayload) {
        let decoded = match payload {
            SocketPayload::Text(text) => Message::from_json(&text),
            SocketPayload::Binary(data) => Message::from_slice(&data),
        };
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring signaling message: {}", e);
                return;
            }
        };

        debug!("Received {} message", message.message_type());
        match message {
            Message::Offer(offer) => self.handle_offer(offer),
            Message::Update(update) => self.handle_update(update.sdp),
            Message::Candidate(candidate) => self.handle_candidate(candidate.candidate),
            Message::Ping(_) => self.handle_ping(),
            Message::Notify(notify) => self.handle_notify(notify),
            other => warn!("Unexpected {} message from server", other.message_type()),
        }
    }

    fn handle_offer(&mut self, offer: SignalingOffer) {
        let Some(role) = self.offer_queue.pop_front() else {
            warn!("Ignoring offer: no session is waiting for one");
            return;
        };

        let SignalingOffer {
            client_id,
            connection_id,
            sdp,
            config,
            simulcast_rpc_rids,
            ..
        } = offer;

        let session = self.session_mut(role);
        let Some(engine) = session.engine() else {
            return;
        };
        info!(
            "{} session received offer (client_id={}, connection_id={:?})",
            role, client_id, connection_id
        );
        session.info = SessionInfo {
            client_id: Some(client_id),
            connection_id,
            simulcast_rpc_rids,
        };
        session.set_step(NegotiationStep::Answering);
        let generation = session.generation;

        let remote = RemoteDescription {
            sdp,
            configuration: config,
        };
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = engine.create_answer(&remote).await;
            let _ = internal.send(Internal::AnswerReady {
                role,
                generation,
                result,
            });
        });
    }

    fn answer_ready(&mut self, role: Role, generation: u64, result: Result<String, EngineError>) {
        let session = self.session(role);
        if session.generation != generation || session.step() != Some(NegotiationStep::Answering) {
            debug!("Discarding stale {} answer", role);
            return;
        }

        let sdp = match result {
            Ok(sdp) => sdp,
            Err(e) => {
                error!("{} answer failed: {}", role, e);
                self.teardown(role, Some(e.into()));
                return;
            }
        };
        if let Err(err) = self.send_message(&Message::answer(sdp)) {
            self.teardown(role, Some(err));
            return;
        }
        if role == Role::Upstream && self.session(role).streams.is_empty() {
            self.teardown(role, Some(ConnectionError::MediaStreamNotFound));
            return;
        }

        let session = self.session_mut(role);
        let Some(engine) = session.engine() else {
            return;
        };
        session.negotiation = Negotiation::Active {
            engine,
            renegotiating: false,
        };
        let owner = session.owner.clone();
        let waiter = session.connect_waiter.take();

        self.set_state(ConnectionState::Connected);
        info!("{} session connected", role);
        self.bus.emit(&owner, Event::Connect(None));
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(()));
        }
    }

    fn handle_update(&mut self, sdp: String) {
        let target = Role::ALL.into_iter().find(|role| {
            let session = self.session(*role);
            session.is_active() && session.options.multistream
        });
        let Some(role) = target else {
            debug!("Ignoring update: no multistream session is connected");
            return;
        };

        let session = self.session_mut(role);
        let engine = match &mut session.negotiation {
            Negotiation::Active {
                engine,
                renegotiating,
            } => {
                if *renegotiating {
                    warn!("{} update arrived during renegotiation", role);
                }
                *renegotiating = true;
                engine.clone()
            }
            _ => return,
        };
        let generation = session.generation;

        let remote = RemoteDescription {
            sdp,
            configuration: None,
        };
        let internal = self.internal.clone();
        tokio::spawn(async move {
            let result = engine.create_answer(&remote).await;
            let _ = internal.send(Internal::UpdateReady {
                role,
                generation,
                result,
            });
        });
    }

    fn update_ready(&mut self, role: Role, generation: u64, result: Result<String, EngineError>) {
        let session = self.session_mut(role);
        if session.generation != generation {
            debug!("Discarding stale {} update answer", role);
            return;
        }
        match &mut session.negotiation {
            Negotiation::Active { renegotiating, .. } => *renegotiating = false,
            _ => return,
        }
        let owner = session.owner.clone();

        match result {
            Ok(sdp) => {
                if let Err(err) = self.send_message(&Message::update(sdp)) {
                    self.teardown(role, Some(err));
                }
            }
            Err(e) => {
                // The session keeps its current description
                let err = ConnectionError::update(e.into());
                error!("{} renegotiation failed: {}", role, err);
                self.bus.emit(&owner, Event::Failure(err));
            }
        }
    }

    fn handle_candidate(&mut self, candidate: String) {
        let target = Role::ALL
            .into_iter()
            .find(|role| self.session(*role).is_active())
            .or_else(|| {
                Role::ALL
                    .into_iter()
                    .find(|role| self.session(*role).engine().is_some())
            });
        let Some(engine) = target.and_then(|role| self.session(role).engine()) else {
            debug!("Ignoring candidate: no live session");
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = engine.add_ice_candidate(&candidate).await {
                warn!("Failed to add ICE candidate: {}", e);
            }
        });
    }

    fn handle_ping(&mut self) {
        if !Role::ALL.into_iter().any(|role| self.session(role).is_active()) {
            debug!("Ignoring ping: no session is connected");
            return;
        }
        if let Err(e) = self.send_message(&Message::pong()) {
            warn!("Failed to answer ping: {}", e);
        }
    }

    fn handle_notify(&mut self, notify: SignalingNotify) {
        let connected: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|role| self.session(*role).is_active())
            .collect();
        if connected.is_empty() {
            debug!("Ignoring notify: no session is connected");
            return;
        }

        let attendee = Attendee::from_notify(&notify);
        let event = match notify.event_type {
            NotifyEventType::ConnectionCreated => Some(Event::AttendeeAdded(attendee)),
            NotifyEventType::ConnectionDestroyed => Some(Event::AttendeeRemoved(attendee)),
            _ => None,
        };
        match event {
            Some(_) => info!(
                "Channel {}: {:?} (role={:?}, connection_id={:?}, connections={:?})",
                self.config.channel_id,
                notify.event_type,
                notify.role,
                notify.connection_id,
                notify.connection_count
            ),
            None => debug!("Channel {}: {:?}", self.config.channel_id, notify.event_type),
        }

        if let Some(counts) = attendee.counts {
            if self.counts != Some(counts) {
                self.counts = Some(counts);
                self.bus.emit(&self.owner, Event::ChangeConnectionCounts(counts));
            }
        }
        if let Some(event) = event {
            for role in connected {
                let owner = self.session(role).owner.clone();
                self.bus.emit(&owner, event.clone());
            }
        }
        self.bus.emit(&self.owner, Event::Notify(notify));
    }

    fn handle_engine(&mut self, role: Role, generation: u64, event: EngineEvent) {
        let session = self.session(role);
        if session.generation != generation || session.engine().is_none() {
            debug!("Discarding stale {} engine event: {:?}", role, event);
            return;
        }

        match event {
            EngineEvent::IceCandidate(candidate) => {
                if let Err(e) = self.send_message(&Message::candidate(candidate)) {
                    warn!("Failed to send ICE candidate: {}", e);
                }
            }
            EngineEvent::IceConnectionState(state) => {
                debug!("{} ICE connection state: {:?}", role, state);
                if let Some(err) = state.failure() {
                    self.teardown(role, Some(err));
                }
            }
            EngineEvent::SignalingClosed => {
                self.teardown(role, Some(ConnectionError::ConnectionTerminated));
            }
            EngineEvent::StreamAdded(id) => {
                if self.session(role).has_stream(&id) {
                    debug!("{} session already has stream {}", role, id);
                } else {
                    let _ = self.attach_stream(role, Stream::new(id, StreamOrigin::Remote));
                }
            }
            EngineEvent::StreamRemoved(id) => self.detach_stream(role, &id),
        }
    }

    /// Start tearing a live session down: detach its streams, release the
    /// engine, and close the socket if nothing else needs it. The session
    /// finishes once the engine reports back.
    fn teardown(&mut self, role: Role, error: Option<ConnectionError>) {
        let session = self.session_mut(role);
        let Some(engine) = session.close(error.clone()) else {
            return;
        };
        let generation = session.generation;
        let owner = session.owner.clone();
        let streams = session.streams.drain();

        match &error {
            Some(e) => warn!("Tearing down {} session: {}", role, e),
            None => info!("Disconnecting {} session", role),
        }
        self.offer_queue.retain(|queued| *queued != role);

        for stream in streams {
            self.bus.emit(&owner, Event::RemoveStream(stream.id));
        }

        let internal = self.internal.clone();
        let deadline = self.config.close_timeout;
        tokio::spawn(async move {
            // Release is bounded by the close timeout
            let result = match tokio::time::timeout(deadline, engine.close()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::new(format!(
                    "release did not finish within {:?}",
                    deadline
                ))),
            };
            let _ = internal.send(Internal::EngineReleased {
                role,
                generation,
                result,
            });
        });

        let other = match role {
            Role::Upstream => Role::Downstream,
            Role::Downstream => Role::Upstream,
        };
        if self.session(other).engine().is_none() {
            self.close_socket();
        }
    }

    fn engine_released(&mut self, role: Role, generation: u64, result: Result<(), EngineError>) {
        if let Err(e) = result {
            error!("Failed to release {} engine: {}", role, e);
        }

        let session = self.session_mut(role);
        if session.generation != generation
            || !matches!(session.negotiation, Negotiation::Closing { .. })
        {
            return;
        }
        let error = session.finish();
        let owner = session.owner.clone();
        let connect_waiter = session.connect_waiter.take();
        let disconnect_waiters = std::mem::take(&mut session.disconnect_waiters);

        if let Some(err) = &error {
            self.bus.emit(&owner, Event::Failure(err.clone()));
        }
        if let Some(waiter) = connect_waiter {
            let err = error.clone().unwrap_or(ConnectionError::ConnectionCancelled);
            self.bus.emit(&owner, Event::Connect(Some(err.clone())));
            let _ = waiter.send(Err(err));
        }
        for waiter in disconnect_waiters {
            let _ = waiter.send(Ok(()));
        }
        info!("{} session disconnected", role);
        self.bus.emit(&owner, Event::Disconnect(error));
    }

    /// Every handle is gone: fail live sessions and close the socket.
    fn terminate(&mut self) {
        info!("Connection {} released", self.id);
        for role in Role::ALL {
            self.teardown(role, Some(ConnectionError::ConnectionTerminated));
            // Engines finish closing in the background; sessions finish now
            let generation = self.session(role).generation;
            self.engine_released(role, generation, Ok(()));
        }
        self.close_socket();
        self.set_state(ConnectionState::Terminated);
    }

    async fn await_close(&mut self, internal: &mut mpsc::UnboundedReceiver<Internal>) {
        if self.socket != SocketPhase::Closing {
            return;
        }

        let deadline = tokio::time::sleep(self.config.close_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!("Connection {} close was not acknowledged in time", self.id);
                    return;
                }
                message = internal.recv() => match message {
                    Some(Internal::Socket {
                        epoch,
                        event: SocketEvent::Close { .. } | SocketEvent::Failure(_),
                    }) if epoch == self.epoch => return,
                    Some(_) => {}
                    None => return,
                },
            }
        }
    }
}
