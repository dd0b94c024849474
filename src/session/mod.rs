//! Session (MediaConnection) Manager
//!
//! A [`Session`] is a cheap handle for one role on a connection. Its state
//! lives in the connection actor; the handle only holds a weak mailbox
//! reference, so it never keeps the connection alive.

pub mod state;
pub mod stream;

pub use state::{SessionInfo, SessionState};
pub use stream::{Stream, StreamOrigin, StreamSet};

use crate::connection::actor::{call, Request};
use crate::error::ConnectionError;
use crate::events::{Attendee, ConnectionId, Event, EventBus, EventKind, Owner};
use crate::signaling::{Message, NegotiationOptions, Role};
use serde_json::Value;
use state::Reply;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Session {
    role: Role,
    owner: Owner,
    requests: mpsc::WeakUnboundedSender<Request>,
    bus: Arc<EventBus>,
}

impl Session {
    pub(crate) fn new(
        connection: ConnectionId,
        role: Role,
        requests: mpsc::WeakUnboundedSender<Request>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            role,
            owner: Owner::Session(connection, role),
            requests,
            bus,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Owner key of this session's notifications.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, ConnectionError> {
        let requests = self
            .requests
            .upgrade()
            .ok_or(ConnectionError::ConnectionTerminated)?;
        call(requests, build).await
    }

    /// Negotiate a media session.
    ///
    /// Resolves once the answer is sent, or with the error that ended the
    /// attempt. `timeout` bounds the wait for the server's offer; the
    /// connection's default applies when it is `None`.
    pub async fn connect(
        &self,
        options: NegotiationOptions,
        metadata: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<(), ConnectionError> {
        let role = self.role;
        self.request(|reply| Request::Connect {
            role,
            options,
            metadata,
            timeout,
            reply,
        })
        .await
    }

    /// Tear the session down. Resolves after every stream is detached and the
    /// engine is released.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let role = self.role;
        self.request(|reply| Request::Disconnect { role, reply }).await
    }

    /// Send a signaling message over the shared socket.
    pub async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        let role = self.role;
        self.request(|reply| Request::Send { role, message, reply }).await
    }

    pub async fn add_stream(&self, stream_id: impl Into<String>) -> Result<(), ConnectionError> {
        let role = self.role;
        let stream_id = stream_id.into();
        self.request(|reply| Request::AddStream { role, stream_id, reply }).await
    }

    /// Detach a stream; unknown ids are ignored.
    pub async fn remove_stream(&self, stream_id: impl Into<String>) -> Result<(), ConnectionError> {
        let role = self.role;
        let stream_id = stream_id.into();
        self.request(|reply| Request::RemoveStream { role, stream_id, reply }).await
    }

    pub async fn has_stream(&self, stream_id: impl Into<String>) -> bool {
        let role = self.role;
        let stream_id = stream_id.into();
        self.request(|reply| Request::HasStream { role, stream_id, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn streams(&self) -> Vec<Stream> {
        let role = self.role;
        self.request(|reply| Request::Streams { role, reply })
            .await
            .unwrap_or_default()
    }

    pub async fn state(&self) -> SessionState {
        let role = self.role;
        self.request(|reply| Request::SessionState { role, reply })
            .await
            .unwrap_or(SessionState::Disconnected)
    }

    /// Ids from the server's offer; empty when not connected.
    pub async fn info(&self) -> SessionInfo {
        let role = self.role;
        self.request(|reply| Request::SessionInfo { role, reply })
            .await
            .unwrap_or_default()
    }

    pub fn on_connect(&self, handler: impl Fn(Option<&ConnectionError>) + Send + Sync + 'static) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::Connect,
            Arc::new(move |event| {
                if let Event::Connect(error) = event {
                    handler(error.as_ref())
                }
            }),
        );
    }

    pub fn on_disconnect(
        &self,
        handler: impl Fn(Option<&ConnectionError>) + Send + Sync + 'static,
    ) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::Disconnect,
            Arc::new(move |event| {
                if let Event::Disconnect(error) = event {
                    handler(error.as_ref())
                }
            }),
        );
    }

    pub fn on_failure(&self, handler: impl Fn(&ConnectionError) + Send + Sync + 'static) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::Failure,
            Arc::new(move |event| {
                if let Event::Failure(error) = event {
                    handler(error)
                }
            }),
        );
    }

    pub fn on_add_stream(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::AddStream,
            Arc::new(move |event| {
                if let Event::AddStream(id) = event {
                    handler(id)
                }
            }),
        );
    }

    pub fn on_remove_stream(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::RemoveStream,
            Arc::new(move |event| {
                if let Event::RemoveStream(id) = event {
                    handler(id)
                }
            }),
        );
    }

    /// A peer joined the channel while this session was connected.
    pub fn on_attendee_added(&self, handler: impl Fn(Attendee) + Send + Sync + 'static) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::AttendeeAdded,
            Arc::new(move |event| {
                if let Event::AttendeeAdded(attendee) = event {
                    handler(*attendee)
                }
            }),
        );
    }

    pub fn on_attendee_removed(&self, handler: impl Fn(Attendee) + Send + Sync + 'static) {
        self.bus.set_handler(
            self.owner.clone(),
            EventKind::AttendeeRemoved,
            Arc::new(move |event| {
                if let Event::AttendeeRemoved(attendee) = event {
                    handler(*attendee)
                }
            }),
        );
    }
}
