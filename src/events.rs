//! Event / Notification Bus
//!
//! Lifecycle and stream-membership events go to two places:
//! - at most one registered handler per (owner, event kind)
//! - a broadcast channel carrying the same payload tagged with its owner
//!
//! Both deliveries happen inside the state transition that produced the
//! event. A panicking handler is logged and contained.

use crate::error::ConnectionError;
use crate::signaling::{Role, SignalingNotify};
use log::{debug, error};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Broadcast buffer; slow subscribers see `RecvError::Lagged`.
const BROADCAST_CAPACITY: usize = 256;

/// Identifier of one `Connection`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity an event belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    Connection(ConnectionId),
    Session(ConnectionId, Role),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Connection(id) => write!(f, "connection/{}", id),
            Owner::Session(id, role) => write!(f, "connection/{}/{}", id, role),
        }
    }
}

/// Upstream and downstream peers reported for the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub upstream: u32,
    pub downstream: u32,
}

/// Peer that joined or left the channel, as reported by `notify`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attendee {
    pub role: Option<Role>,
    pub counts: Option<ConnectionCounts>,
}

impl Attendee {
    pub fn from_notify(notify: &SignalingNotify) -> Self {
        Self {
            role: notify.role,
            counts: notify
                .connection_counts()
                .map(|(upstream, downstream)| ConnectionCounts { upstream, downstream }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Failure,
    AddStream,
    RemoveStream,
    ChangeConnectionCounts,
    AttendeeAdded,
    AttendeeRemoved,
    Notify,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connect => "onConnect",
            EventKind::Disconnect => "onDisconnect",
            EventKind::Failure => "onFailure",
            EventKind::AddStream => "onAddStream",
            EventKind::RemoveStream => "onRemoveStream",
            EventKind::ChangeConnectionCounts => "onChangeConnectionCounts",
            EventKind::AttendeeAdded => "onAttendeeAdded",
            EventKind::AttendeeRemoved => "onAttendeeRemoved",
            EventKind::Notify => "onNotify",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Connect attempt finished; `None` on success
    Connect(Option<ConnectionError>),
    /// Session torn down; carries the error that caused it, if any
    Disconnect(Option<ConnectionError>),
    Failure(ConnectionError),
    AddStream(String),
    RemoveStream(String),
    ChangeConnectionCounts(ConnectionCounts),
    AttendeeAdded(Attendee),
    AttendeeRemoved(Attendee),
    /// Every `notify` received while a session is connected
    Notify(SignalingNotify),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect(_) => EventKind::Connect,
            Event::Disconnect(_) => EventKind::Disconnect,
            Event::Failure(_) => EventKind::Failure,
            Event::AddStream(_) => EventKind::AddStream,
            Event::RemoveStream(_) => EventKind::RemoveStream,
            Event::ChangeConnectionCounts(_) => EventKind::ChangeConnectionCounts,
            Event::AttendeeAdded(_) => EventKind::AttendeeAdded,
            Event::AttendeeRemoved(_) => EventKind::AttendeeRemoved,
            Event::Notify(_) => EventKind::Notify,
        }
    }
}

/// One broadcast occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub owner: Owner,
    pub event: Event,
}

impl Notification {
    /// Broadcast key, e.g. `connection/<id>/upstream:onConnect`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.owner, self.event.kind().name())
    }

    pub fn matches(&self, owner: &Owner, kind: EventKind) -> bool {
        &self.owner == owner && self.event.kind() == kind
    }
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

pub struct EventBus {
    handlers: Mutex<HashMap<(Owner, EventKind), Handler>>,
    sender: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: Mutex::new(HashMap::new()),
            sender,
        }
    }

    /// Register the handler for `kind` on `owner`, replacing any previous one.
    pub fn set_handler(&self, owner: Owner, kind: EventKind, handler: Handler) {
        self.handlers.lock().insert((owner, kind), handler);
    }

    pub fn clear_handler(&self, owner: &Owner, kind: EventKind) {
        self.handlers.lock().remove(&(owner.clone(), kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Deliver one occurrence to the handler and every subscriber.
    pub fn emit(&self, owner: &Owner, event: Event) {
        // Handlers may register other handlers; never call one under the lock.
        let handler = self.handlers.lock().get(&(owner.clone(), event.kind())).cloned();

        if let Some(handler) = handler {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!("{} handler for {} panicked", event.kind().name(), owner);
            }
        }

        let notification = Notification {
            owner: owner.clone(),
            event,
        };
        debug!("Emitting {}", notification.name());
        // No subscribers is fine
        let _ = self.sender.send(notification);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback handed to collaborators (socket, engine) so they can report
/// events without knowing who listens.
pub struct EventSink<T> {
    deliver: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> EventSink<T> {
    pub fn new(deliver: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn send(&self, event: T) {
        (self.deliver)(event)
    }
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            deliver: self.deliver.clone(),
        }
    }
}

impl<T> fmt::Debug for EventSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}
