//! Scripted socket and engine doubles for connection tests.

use crate::connection::ConnectionConfig;
use crate::engine::{
    EngineEvent, EngineEventSink, EngineFactory, EngineSpec, RemoteDescription, TransportEngine,
};
use crate::error::{ConnectionError, EngineError};
use crate::events::Notification;
use crate::signaling::Role;
use crate::transport::{SocketEvent, SocketEventSink, SocketPayload, SocketTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

pub const OFFER_SDP: &str = "v=0 offer";

pub fn config() -> ConnectionConfig {
    let url = Url::parse("wss://signaling.example.com/signaling").unwrap();
    ConnectionConfig::new(url, "test-channel")
}

/// Let the actor and spawned engine work run to quiescence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn offer(client_id: &str, connection_id: &str) -> Value {
    json!({
        "type": "offer",
        "client_id": client_id,
        "connection_id": connection_id,
        "sdp": OFFER_SDP,
    })
}

pub fn drain(events: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = events.try_recv() {
        out.push(notification);
    }
    out
}

/// Event kind names, e.g. `onConnect`.
pub fn names(events: &[Notification]) -> Vec<&'static str> {
    events.iter().map(|n| n.event.kind().name()).collect()
}

#[derive(Default)]
struct SocketLog {
    events: Option<SocketEventSink>,
    opens: usize,
    sent: Vec<String>,
    closes: Vec<u16>,
    ignore_close: bool,
}

/// Socket that opens immediately and acknowledges every close.
#[derive(Clone, Default)]
pub struct MockSocket {
    log: Arc<Mutex<SocketLog>>,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket whose server never answers a close frame.
    pub fn without_close_ack() -> Self {
        let socket = Self::default();
        socket.log.lock().ignore_close = true;
        socket
    }

    pub fn transport(&self) -> Box<dyn SocketTransport> {
        Box::new(self.clone())
    }

    fn deliver(&self, event: SocketEvent) {
        let sink = self.log.lock().events.clone();
        if let Some(sink) = sink {
            sink.send(event);
        }
    }

    pub fn receive(&self, message: Value) {
        self.receive_text(&message.to_string());
    }

    pub fn receive_text(&self, text: &str) {
        self.deliver(SocketEvent::Message(SocketPayload::Text(text.to_string())));
    }

    pub fn close_from_server(&self, code: u16, reason: Option<&str>) {
        self.deliver(SocketEvent::Close {
            code,
            reason: reason.map(str::to_string),
        });
    }

    pub fn fail(&self, reason: &str) {
        self.deliver(SocketEvent::Failure(reason.to_string()));
    }

    pub fn sent(&self) -> Vec<Value> {
        self.log
            .lock()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|message| message["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn opens(&self) -> usize {
        self.log.lock().opens
    }

    pub fn closes(&self) -> Vec<u16> {
        self.log.lock().closes.clone()
    }
}

impl SocketTransport for MockSocket {
    fn open(&mut self, _url: &Url, events: SocketEventSink) {
        {
            let mut log = self.log.lock();
            log.opens += 1;
            log.events = Some(events.clone());
        }
        events.send(SocketEvent::Open);
    }

    fn send(&mut self, payload: SocketPayload) -> Result<(), ConnectionError> {
        match payload {
            SocketPayload::Text(text) => self.log.lock().sent.push(text),
            SocketPayload::Binary(_) => panic!("binary frame sent"),
        }
        Ok(())
    }

    fn close(&mut self, code: u16, _reason: &str) {
        let ignore = {
            let mut log = self.log.lock();
            log.closes.push(code);
            log.ignore_close
        };
        if !ignore {
            self.deliver(SocketEvent::Close { code, reason: None });
        }
    }
}

#[derive(Default)]
struct EngineLog {
    created: usize,
    closed: usize,
    answers: usize,
    candidates: Vec<String>,
    sinks: HashMap<Role, EngineEventSink>,
    fail_create: bool,
    fail_capture: bool,
    fail_next_answer: bool,
    stall_close: bool,
}

/// Engine factory whose engines answer every offer with `answer for <sdp>`.
#[derive(Clone, Default)]
pub struct MockEngines {
    log: Arc<Mutex<EngineLog>>,
}

impl MockEngines {
    pub fn factory(&self) -> Arc<dyn EngineFactory> {
        Arc::new(self.clone())
    }

    pub fn fail_create(&self) {
        self.log.lock().fail_create = true;
    }

    pub fn fail_capture(&self) {
        self.log.lock().fail_capture = true;
    }

    pub fn fail_next_answer(&self) {
        self.log.lock().fail_next_answer = true;
    }

    /// Engines closed from now on never finish releasing.
    pub fn stall_close(&self) {
        self.log.lock().stall_close = true;
    }

    /// Report an event from the latest engine created for `role`.
    pub fn emit(&self, role: Role, event: EngineEvent) {
        let sink = self.log.lock().sinks.get(&role).cloned();
        if let Some(sink) = sink {
            sink.send(event);
        }
    }

    pub fn created(&self) -> usize {
        self.log.lock().created
    }

    pub fn closed(&self) -> usize {
        self.log.lock().closed
    }

    pub fn answers(&self) -> usize {
        self.log.lock().answers
    }

    pub fn candidates(&self) -> Vec<String> {
        self.log.lock().candidates.clone()
    }
}

impl EngineFactory for MockEngines {
    fn create(
        &self,
        spec: EngineSpec,
        events: EngineEventSink,
    ) -> Result<Arc<dyn TransportEngine>, EngineError> {
        let mut log = self.log.lock();
        if log.fail_create {
            return Err(EngineError::new("engine unavailable"));
        }
        log.created += 1;
        log.sinks.insert(spec.role, events);
        Ok(Arc::new(MockEngine {
            log: self.log.clone(),
        }))
    }
}

struct MockEngine {
    log: Arc<Mutex<EngineLog>>,
}

#[async_trait]
impl TransportEngine for MockEngine {
    fn start_capture(&self, _stream_id: &str) -> Result<(), EngineError> {
        if self.log.lock().fail_capture {
            return Err(EngineError::new("camera unavailable"));
        }
        Ok(())
    }

    async fn create_answer(&self, remote: &RemoteDescription) -> Result<String, EngineError> {
        let fail = {
            let mut log = self.log.lock();
            log.answers += 1;
            std::mem::take(&mut log.fail_next_answer)
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        if fail {
            return Err(EngineError::new("answer rejected"));
        }
        Ok(format!("answer for {}", remote.sdp))
    }

    async fn add_ice_candidate(&self, candidate: &str) -> Result<(), EngineError> {
        self.log.lock().candidates.push(candidate.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.log.lock().stall_close {
            futures::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.log.lock().closed += 1;
        Ok(())
    }
}
