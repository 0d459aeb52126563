//! TCP listener: accepts framed connections and feeds frames to the
//! dispatcher. Ad-hoc frames get their response envelope written back on the
//! same connection.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::{Frame, FrameCodec};
use super::{Listener, Message, MessageType};
use crate::di::ServiceKey;
use crate::dispatcher::Dispatcher;
use crate::error::EdgeError;

pub struct TcpEdgeListener {
    addr: String,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl ServiceKey for TcpEdgeListener {}

impl TcpEdgeListener {
    pub fn new(addr: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            addr: addr.into(),
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    async fn handle_connection(dispatcher: Arc<Dispatcher>, stream: TcpStream, token: CancellationToken) {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, FrameCodec);
        let mut writer = FramedWrite::new(write_half, FrameCodec);

        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                frame = reader.next() => frame,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    tracing::warn!(?peer, error = %err, "dropping tcp connection on framing error");
                    break;
                }
                None => break,
            };

            // Frames are dispatched in arrival order; ad-hoc frames answer
            // on the same connection.
            if frame.message_type == MessageType::AdHoc {
                let (message, receiver) =
                    Message::tcp_with_response(frame.session_id.clone(), frame.message_type, frame.payload);
                dispatcher.on_message_receive(message).await;
                if let Some(envelope) = receiver.recv().await {
                    let response = Frame::new(
                        frame.session_id,
                        MessageType::AdHoc,
                        Some(envelope.to_bytes().into()),
                    );
                    if let Err(err) = writer.send(response).await {
                        tracing::warn!(?peer, error = %err, "failed to write tcp response");
                        break;
                    }
                }
            } else {
                let message = Message::tcp(frame.session_id, frame.message_type, frame.payload);
                dispatcher.on_message_receive(message).await;
            }
        }
    }
}

impl Listener for TcpEdgeListener {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn initialize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + 'a>> {
        Box::pin(async move {
            let listener = tokio::net::TcpListener::bind(&self.addr)
                .await
                .map_err(|err| EdgeError::Listener(format!("tcp bind {} failed: {err}", self.addr)))?;
            tracing::info!(addr = %self.addr, "tcp listener up");

            let dispatcher = self.dispatcher.clone();
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let accepted = tokio::select! {
                        _ = token.cancelled() => break,
                        accepted = listener.accept() => accepted,
                    };
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "tcp connection accepted");
                            tokio::spawn(Self::handle_connection(
                                dispatcher.clone(),
                                stream,
                                token.clone(),
                            ));
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "tcp accept failed");
                        }
                    }
                }
            });
            Ok(())
        })
    }

    fn shutdown<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.shutdown.cancel();
        })
    }
}
