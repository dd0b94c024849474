//! Connection State Machine
//!
//! A [`Connection`] is one signaling socket shared by an upstream and a
//! downstream [`Session`]. All of its state lives in a single actor task
//! (see [`actor`]); this module holds the caller-facing handle.

pub(crate) mod actor;

use crate::engine::EngineFactory;
use crate::error::ConnectionError;
use crate::events::{
    ConnectionCounts, ConnectionId, Event, EventBus, EventKind, Notification, Owner,
};
use crate::session::Session;
use crate::signaling::{Role, SignalingNotify};
use crate::transport::SocketTransport;
use actor::{call, ConnectionActor, Request};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use url::Url;

/// Default wait for the server's offer
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for the close acknowledgment
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Signaling endpoint (`ws://` or `wss://`)
    pub url: Url,
    pub channel_id: String,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: Url, channel_id: impl Into<String>) -> Self {
        Self {
            url,
            channel_id: channel_id.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// The connection was released; nothing else happens on it
    Terminated,
}

/// Handle to one signaling connection.
///
/// Dropping every `Connection` handle terminates the connection: live
/// sessions fail with `ConnectionTerminated`, engines are released and the
/// socket is closed. Must be created inside a tokio runtime.
pub struct Connection {
    id: ConnectionId,
    requests: mpsc::UnboundedSender<Request>,
    bus: Arc<EventBus>,
    task: JoinHandle<()>,
}

impl Connection {
    pub fn new(
        config: ConnectionConfig,
        transport: Box<dyn SocketTransport>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let id = ConnectionId::new();
        let bus = Arc::new(EventBus::new());
        let (requests, task) =
            ConnectionActor::spawn(id.clone(), config, bus.clone(), transport, engines);
        Self {
            id,
            requests,
            bus,
            task,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Handle for the session playing `role`. Each connection has at most
    /// one session per role; repeated calls return handles to the same one.
    pub fn session(&self, role: Role) -> Session {
        Session::new(self.id.clone(), role, self.requests.downgrade(), self.bus.clone())
    }

    /// Every event of this connection and its sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        call(self.requests.clone(), |reply| Request::ConnectionState { reply })
            .await
            .unwrap_or(ConnectionState::Terminated)
    }

    /// Last channel counts reported by the server.
    pub async fn connection_counts(&self) -> Option<ConnectionCounts> {
        call(self.requests.clone(), |reply| Request::ConnectionCounts { reply })
            .await
            .ok()
            .flatten()
    }

    pub fn on_change_connection_counts(
        &self,
        handler: impl Fn(ConnectionCounts) + Send + Sync + 'static,
    ) {
        self.bus.set_handler(
            Owner::Connection(self.id.clone()),
            EventKind::ChangeConnectionCounts,
            Arc::new(move |event| {
                if let Event::ChangeConnectionCounts(counts) = event {
                    handler(*counts)
                }
            }),
        );
    }

    /// Raw `notify` messages, delivered only while a session is connected.
    pub fn on_notify(&self, handler: impl Fn(&SignalingNotify) + Send + Sync + 'static) {
        self.bus.set_handler(
            Owner::Connection(self.id.clone()),
            EventKind::Notify,
            Arc::new(move |event| {
                if let Event::Notify(notify) = event {
                    handler(notify)
                }
            }),
        );
    }

    /// Disconnect every live session concurrently.
    ///
    /// Sessions that are already disconnected are skipped. One failure is
    /// returned as itself, several as `Aggregate`.
    pub async fn disconnect_all(&self) -> Result<(), ConnectionError> {
        let sessions: Vec<Session> = Role::ALL.into_iter().map(|role| self.session(role)).collect();
        let results = join_all(sessions.iter().map(|session| session.disconnect())).await;
        let errors = results
            .into_iter()
            .filter_map(Result::err)
            .filter(|err| *err != ConnectionError::ConnectionDisconnected)
            .collect();
        ConnectionError::aggregate(errors)
    }

    /// Release the connection and wait for the actor to finish closing.
    pub async fn shutdown(self) {
        let Connection { requests, task, .. } = self;
        drop(requests);
        let _ = task.await;
    }
}
