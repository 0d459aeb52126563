//! WebSocket session lifecycle: exactly one Connect before any Data, exactly
//! one Disconnect after, per-session arrival order, and registry cleanup.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgekit_core::context::{Context, ContextFactory};
use edgekit_core::di::ServiceProvider;
use edgekit_core::dispatcher::{Binding, Dispatcher};
use edgekit_core::error::EdgeError;
use edgekit_core::handler;
use edgekit_core::listener::MessageType;
use edgekit_core::ws::{SessionManager, SocketTransport, WsFrame};
use tokio::sync::mpsc;

struct FakeSocket {
    incoming: tokio::sync::Mutex<mpsc::Receiver<WsFrame>>,
    sent: Mutex<Vec<WsFrame>>,
    closed: AtomicBool,
}

impl FakeSocket {
    fn new(incoming: mpsc::Receiver<WsFrame>) -> Self {
        Self {
            incoming: tokio::sync::Mutex::new(incoming),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl SocketTransport for FakeSocket {
    fn recv(&self) -> Pin<Box<dyn Future<Output = Option<WsFrame>> + Send + '_>> {
        Box::pin(async move {
            if self.is_closed() {
                return None;
            }
            self.incoming.lock().await.recv().await
        })
    }

    fn send(&self, frame: WsFrame) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + '_>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + '_>> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(WsFrame::Ping);
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn recording_dispatcher(log: Arc<Mutex<Vec<String>>>) -> Arc<Dispatcher> {
    let dispatcher = Dispatcher::new(ServiceProvider::new(), ContextFactory::auto());
    dispatcher.websocket_handler(
        Binding::new(),
        handler!(async |ctx: Arc<Context>| {
            let entry = match ctx.message_type() {
                MessageType::Connect => "connect".to_string(),
                MessageType::Disconnect => "disconnect".to_string(),
                _ => match ctx.frame() {
                    Some(WsFrame::Text(text)) => format!("text:{text}"),
                    Some(frame) => frame.kind().to_string(),
                    None => "data".to_string(),
                },
            };
            log.lock().unwrap().push(entry);
            "ok"
        }),
    );
    dispatcher
}

#[tokio::test]
async fn session_lifecycle_dispatches_connect_data_disconnect_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = recording_dispatcher(log.clone());
    let manager = Arc::new(SessionManager::new(Duration::from_secs(30)));

    let (tx, rx) = mpsc::channel(8);
    let transport = Arc::new(FakeSocket::new(rx));

    let connection = {
        let manager = manager.clone();
        let dispatcher = dispatcher.clone();
        let transport = transport.clone();
        tokio::spawn(async move { manager.handle_connection(dispatcher, transport, None).await })
    };

    tx.send(WsFrame::Text("hi".to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.session_count(), 1);

    // Client disconnects: the stream ends.
    drop(tx);
    connection.await.unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["connect", "text:hi", "disconnect"]);
    assert_eq!(manager.session_count(), 0);
}

#[tokio::test]
async fn close_frame_ends_the_receive_loop() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = recording_dispatcher(log.clone());
    let manager = Arc::new(SessionManager::new(Duration::from_secs(30)));

    let (tx, rx) = mpsc::channel(8);
    let transport = Arc::new(FakeSocket::new(rx));

    let connection = {
        let manager = manager.clone();
        let dispatcher = dispatcher.clone();
        let transport = transport.clone();
        tokio::spawn(async move { manager.handle_connection(dispatcher, transport, None).await })
    };

    tx.send(WsFrame::Text("one".to_string())).await.unwrap();
    tx.send(WsFrame::Close(Some(1000))).await.unwrap();
    tx.send(WsFrame::Text("after close".to_string())).await.unwrap();
    connection.await.unwrap();

    let events = log.lock().unwrap().clone();
    assert_eq!(events, vec!["connect", "text:one", "close", "disconnect"]);
    // The socket was closed during cleanup.
    assert!(transport.is_closed());
}

#[tokio::test]
async fn heartbeat_pings_until_cancelled() {
    tokio::time::pause();
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = recording_dispatcher(log);
    let manager = Arc::new(SessionManager::new(Duration::from_millis(100)));

    let (tx, rx) = mpsc::channel(8);
    let transport = Arc::new(FakeSocket::new(rx));

    let connection = {
        let manager = manager.clone();
        let dispatcher = dispatcher.clone();
        let transport = transport.clone();
        tokio::spawn(async move { manager.handle_connection(dispatcher, transport, None).await })
    };

    for _ in 0..4 {
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
    }
    let pings = transport
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|frame| matches!(frame, WsFrame::Ping))
        .count();
    assert!(pings >= 2, "expected heartbeat pings, saw {pings}");

    drop(tx);
    connection.await.unwrap();
}

#[tokio::test]
async fn remove_session_stops_the_lifecycle() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = recording_dispatcher(log.clone());
    let manager = Arc::new(SessionManager::new(Duration::from_secs(30)));

    let (tx, rx) = mpsc::channel(8);
    let transport = Arc::new(FakeSocket::new(rx));

    let connection = {
        let manager = manager.clone();
        let dispatcher = dispatcher.clone();
        let transport = transport.clone();
        tokio::spawn(async move { manager.handle_connection(dispatcher, transport, None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let session_id = manager
        .get_active_sessions()
        .first()
        .map(|session| session.id().to_string())
        .expect("one active session");
    manager.remove_session(&session_id).await;

    connection.await.unwrap();
    let events = log.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("connect"));
    assert_eq!(events.last().map(String::as_str), Some("disconnect"));
    assert_eq!(manager.session_count(), 0);
    // tx kept alive until here so the stream did not end on its own.
    drop(tx);
}
