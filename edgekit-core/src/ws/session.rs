use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::di::ServiceKey;
use crate::dispatcher::Dispatcher;
use crate::error::EdgeError;
use crate::listener::{Message, MessageType};
use crate::path::lookup_path;

/// Frame kinds exchanged over a WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Bytes),
    Ping,
    Pong,
    Close(Option<u16>),
    Error(String),
}

impl WsFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            WsFrame::Text(_) => "text",
            WsFrame::Binary(_) => "binary",
            WsFrame::Ping => "ping",
            WsFrame::Pong => "pong",
            WsFrame::Close(_) => "close",
            WsFrame::Error(_) => "error",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsFrame::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Bidirectional frame transport backing a session. The HTTP crate adapts
/// the host server's socket; tests use an in-memory implementation.
pub trait SocketTransport: Send + Sync + 'static {
    /// Next inbound frame, or `None` once the stream has ended.
    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<WsFrame>> + Send + '_>>;

    fn send(&self, frame: WsFrame) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + '_>>;

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + '_>>;

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    fn is_closed(&self) -> bool;
}

/// One active WebSocket connection: the upgrade request envelope, a unique
/// session id, and send/close operations usable from any handler.
pub struct WebSocketSession {
    id: String,
    url: Option<String>,
    cms: Option<Value>,
    transport: Arc<dyn SocketTransport>,
    cancel: CancellationToken,
}

impl ServiceKey for WebSocketSession {}

impl WebSocketSession {
    pub(crate) fn new(id: String, cms: Option<Value>, transport: Arc<dyn SocketTransport>) -> Arc<Self> {
        let url = cms
            .as_ref()
            .and_then(|cms| lookup_path(cms, "request.url"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Arc::new(Self {
            id,
            url,
            cms,
            transport,
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The upgrade request path.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The parsed upgrade request envelope (inner cms object).
    pub fn cms(&self) -> Option<&Value> {
        self.cms.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), EdgeError> {
        self.transport.send(WsFrame::Text(text.into())).await
    }

    pub async fn send_bytes(&self, data: impl Into<Bytes>) -> Result<(), EdgeError> {
        self.transport.send(WsFrame::Binary(data.into())).await
    }

    pub async fn send_json<T: Serialize>(&self, data: &T) -> Result<(), EdgeError> {
        let text = serde_json::to_string(data)
            .map_err(|err| EdgeError::Listener(format!("ws json encode: {err}")))?;
        self.send_text(text).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// Request cooperative cancellation of the lifecycle task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// The session lifecycle: emit Connect, heartbeat until closed, receive
    /// and dispatch frames in arrival order, then clean up. Cleanup always
    /// runs — cancellation skips straight to it, and every step there is
    /// best-effort.
    pub(crate) async fn run(self: Arc<Self>, dispatcher: Arc<Dispatcher>, heartbeat: Duration) {
        dispatcher
            .on_message_receive(Message::websocket(self.clone(), MessageType::Connect, None))
            .await;

        let heartbeat_token = self.cancel.child_token();
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            self.transport.clone(),
            heartbeat_token.clone(),
            heartbeat,
        ));

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = self.transport.recv() => frame,
            };
            let Some(frame) = frame else { break };
            let terminal = matches!(frame, WsFrame::Close(_) | WsFrame::Error(_));
            dispatcher
                .on_message_receive(Message::websocket(
                    self.clone(),
                    MessageType::Data,
                    Some(frame),
                ))
                .await;
            if terminal {
                break;
            }
        }

        heartbeat_token.cancel();
        let _ = heartbeat_task.await;

        dispatcher
            .on_message_receive(Message::websocket(self.clone(), MessageType::Disconnect, None))
            .await;

        if !self.transport.is_closed() {
            self.transport.close().await;
        }
    }
}

async fn heartbeat_loop(
    transport: Arc<dyn SocketTransport>,
    token: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if transport.is_closed() || transport.ping().await.is_err() {
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}
