//! Listener abstraction: uniform message producers per protocol.
//!
//! A listener turns inbound protocol traffic into [`Message`]s and feeds
//! them to the dispatcher's `on_message_receive`. Messages with response
//! semantics carry a one-shot [`Responder`]; the dispatcher fulfills it and
//! the listener transmits the envelope.

pub mod broker;
pub mod codec;
pub mod tcp;

pub use broker::{BrokerDelivery, BrokerListener, BrokerTransport, LocalBroker};
pub use codec::{Frame, FrameCodec};
pub use tcp::TcpEdgeListener;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::context::envelope::ResponseEnvelope;
use crate::di::HostedService;
use crate::error::EdgeError;
use crate::ws::{WebSocketSession, WsFrame};

/// Transport message type tags, as carried on the TCP wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Connect = 1,
    Data = 2,
    Disconnect = 3,
    AdHoc = 4,
    NotExist = 5,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Connect),
            2 => Some(MessageType::Data),
            3 => Some(MessageType::Disconnect),
            4 => Some(MessageType::AdHoc),
            5 => Some(MessageType::NotExist),
            _ => None,
        }
    }
}

/// Fulfilled by the dispatcher for response-capable messages.
pub struct Responder(oneshot::Sender<ResponseEnvelope>);

impl Responder {
    pub fn send(self, envelope: ResponseEnvelope) {
        let _ = self.0.send(envelope);
    }
}

/// The listener's end of a response-capable message.
pub struct ResponseReceiver(oneshot::Receiver<ResponseEnvelope>);

impl ResponseReceiver {
    pub async fn recv(self) -> Option<ResponseEnvelope> {
        self.0.await.ok()
    }
}

/// Protocol-specific payload carried by a message.
pub enum MessagePayload {
    /// Opaque body bytes (TCP frames).
    Raw(Option<Bytes>),
    /// HTTP request document: `{"cms": {...}}`.
    Http(Value),
    /// A WebSocket frame plus its owning session.
    WebSocket {
        frame: Option<WsFrame>,
        session: Arc<WebSocketSession>,
    },
    /// A message-broker delivery.
    Broker(BrokerDelivery),
}

/// Transport envelope handed to the dispatcher.
pub struct Message {
    pub session_id: String,
    pub message_type: MessageType,
    pub payload: MessagePayload,
    responder: Option<Responder>,
}

impl Message {
    /// An ad-hoc HTTP request expecting a response.
    pub fn http(document: Value) -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                session_id: uuid::Uuid::new_v4().to_string(),
                message_type: MessageType::AdHoc,
                payload: MessagePayload::Http(document),
                responder: Some(Responder(tx)),
            },
            ResponseReceiver(rx),
        )
    }

    /// A TCP frame without response semantics.
    pub fn tcp(session_id: impl Into<String>, message_type: MessageType, body: Option<Bytes>) -> Self {
        Self {
            session_id: session_id.into(),
            message_type,
            payload: MessagePayload::Raw(body),
            responder: None,
        }
    }

    /// A TCP frame expecting a response on the same connection.
    pub fn tcp_with_response(
        session_id: impl Into<String>,
        message_type: MessageType,
        body: Option<Bytes>,
    ) -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let mut message = Self::tcp(session_id, message_type, body);
        message.responder = Some(Responder(tx));
        (message, ResponseReceiver(rx))
    }

    /// A WebSocket frame or lifecycle event for an active session.
    pub fn websocket(
        session: Arc<WebSocketSession>,
        message_type: MessageType,
        frame: Option<WsFrame>,
    ) -> Self {
        Self {
            session_id: session.id().to_string(),
            message_type,
            payload: MessagePayload::WebSocket { frame, session },
            responder: None,
        }
    }

    /// A broker delivery.
    pub fn broker(delivery: BrokerDelivery) -> Self {
        Self {
            session_id: delivery.queue.clone(),
            message_type: MessageType::AdHoc,
            payload: MessagePayload::Broker(delivery),
            responder: None,
        }
    }

    /// Detach the response channel, if this message carries response
    /// semantics.
    pub fn take_responder(&mut self) -> Option<Responder> {
        self.responder.take()
    }
}

/// A per-protocol message producer with a background lifecycle.
///
/// Listeners are registered as hosted services; `initialize` starts the
/// background accept/consume work and returns, `shutdown` stops it.
pub trait Listener: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn initialize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + 'a>>;

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Adapter exposing a listener through the hosted-service lifecycle, so
/// listeners start with the framework and stop at shutdown.
pub struct HostedListener<L: Listener>(pub L);

impl<L: Listener> HostedService for HostedListener<L> {
    fn start<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + 'a>> {
        self.0.initialize()
    }

    fn stop<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.0.shutdown()
    }
}
