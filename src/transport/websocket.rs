//! WebSocket client transport
//!
//! One task per socket: it connects, spawns a writer fed by an unbounded
//! channel, then reads until the peer closes.

use super::{SocketEvent, SocketEventSink, SocketPayload, SocketTransport};
use crate::error::ConnectionError;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use url::Url;

/// Close code reported when the stream ends without a close frame.
const CLOSE_ABNORMAL: u16 = 1006;

pub struct WebSocketTransport {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            outbound: None,
            task: None,
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketTransport for WebSocketTransport {
    fn open(&mut self, url: &Url, events: SocketEventSink) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Message>();
        self.outbound = Some(outbound_tx.clone());
        self.task = Some(tokio::spawn(run_socket(url.clone(), events, outbound_tx, outbound_rx)));
    }

    fn send(&mut self, payload: SocketPayload) -> Result<(), ConnectionError> {
        let message = match payload {
            SocketPayload::Text(text) => Message::Text(text),
            SocketPayload::Binary(data) => Message::Binary(data),
        };
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ConnectionError::WebSocketError("Socket is not open".to_string()))?;
        outbound
            .send(message)
            .map_err(|_| ConnectionError::WebSocketError("Socket writer has stopped".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            let _ = outbound.send(Message::Close(Some(frame)));
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: Url,
    events: SocketEventSink,
    outbound_tx: mpsc::UnboundedSender<Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!("WebSocket connect to {} failed: {}", url, e);
            events.send(SocketEvent::Failure(e.to_string()));
            return;
        }
    };

    info!("WebSocket connected to {}", url);
    events.send(SocketEvent::Open);

    let (write, mut read) = ws_stream.split();

    let writer_handle = tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = outbound_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                debug!("WebSocket write failed: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    let mut closed = None;
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                events.send(SocketEvent::Message(SocketPayload::Text(text)));
            }
            Ok(Message::Binary(data)) => {
                events.send(SocketEvent::Message(SocketPayload::Binary(data)));
            }
            Ok(Message::Ping(ping)) => {
                let _ = outbound_tx.send(Message::Pong(ping));
            }
            Ok(Message::Pong(_)) => events.send(SocketEvent::Pong),
            Ok(Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                let (code, reason) = match frame {
                    Some(frame) => {
                        let reason = (!frame.reason.is_empty()).then(|| frame.reason.to_string());
                        (u16::from(frame.code), reason)
                    }
                    None => (CloseCode::Normal.into(), None),
                };
                closed = Some(SocketEvent::Close { code, reason });
                break;
            }
            Err(e) => {
                warn!("WebSocket error: {}", e);
                closed = Some(SocketEvent::Failure(e.to_string()));
                break;
            }
        }
    }

    drop(outbound_tx);
    writer_handle.abort();

    let event = closed.unwrap_or(SocketEvent::Close {
        code: CLOSE_ABNORMAL,
        reason: None,
    });
    info!("WebSocket to {} finished: {:?}", url, event);
    events.send(event);
}
