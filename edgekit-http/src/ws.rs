//! Adapter from axum's WebSocket to the core [`SocketTransport`] trait.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use edgekit_core::error::EdgeError;
use edgekit_core::ws::{SocketTransport, WsFrame};

pub struct AxumSocket {
    sender: Mutex<SplitSink<WebSocket, AxumMessage>>,
    receiver: Mutex<SplitStream<WebSocket>>,
    closed: AtomicBool,
}

impl AxumSocket {
    pub fn new(socket: WebSocket) -> Self {
        let (sender, receiver) = socket.split();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            closed: AtomicBool::new(false),
        }
    }

    fn to_axum(frame: WsFrame) -> AxumMessage {
        match frame {
            WsFrame::Text(text) => AxumMessage::Text(text.into()),
            WsFrame::Binary(data) => AxumMessage::Binary(data),
            WsFrame::Ping => AxumMessage::Ping(Bytes::new()),
            WsFrame::Pong => AxumMessage::Pong(Bytes::new()),
            WsFrame::Close(code) => AxumMessage::Close(code.map(|code| CloseFrame {
                code,
                reason: "".into(),
            })),
            WsFrame::Error(_) => AxumMessage::Close(None),
        }
    }

    async fn send_inner(&self, message: AxumMessage) -> Result<(), EdgeError> {
        if self.is_closed() {
            return Err(EdgeError::Listener("websocket is closed".to_string()));
        }
        let result = self.sender.lock().await.send(message).await;
        if let Err(err) = result {
            self.closed.store(true, Ordering::SeqCst);
            return Err(EdgeError::Listener(format!("ws send: {err}")));
        }
        Ok(())
    }
}

impl SocketTransport for AxumSocket {
    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<WsFrame>> + Send + '_>> {
        Box::pin(async move {
            let next = self.receiver.lock().await.next().await;
            match next {
                Some(Ok(AxumMessage::Text(text))) => Some(WsFrame::Text(text.to_string())),
                Some(Ok(AxumMessage::Binary(data))) => Some(WsFrame::Binary(data)),
                Some(Ok(AxumMessage::Ping(_))) => Some(WsFrame::Ping),
                Some(Ok(AxumMessage::Pong(_))) => Some(WsFrame::Pong),
                Some(Ok(AxumMessage::Close(frame))) => {
                    self.closed.store(true, Ordering::SeqCst);
                    Some(WsFrame::Close(frame.map(|f| f.code)))
                }
                Some(Err(err)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    Some(WsFrame::Error(err.to_string()))
                }
                None => {
                    self.closed.store(true, Ordering::SeqCst);
                    None
                }
            }
        })
    }

    fn send(&self, frame: WsFrame) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + '_>> {
        Box::pin(self.send_inner(Self::to_axum(frame)))
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + '_>> {
        Box::pin(self.send_inner(AxumMessage::Ping(Bytes::new())))
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                let _ = self.sender.lock().await.send(AxumMessage::Close(None)).await;
            }
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
