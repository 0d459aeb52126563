//! Listener integration: framed TCP round-trips through the dispatcher and
//! broker deliveries through the in-process transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use edgekit_core::config::BrokerConfig;
use edgekit_core::context::{Context, ContextFactory, ContextKind};
use edgekit_core::di::ServiceProvider;
use edgekit_core::dispatcher::{Binding, Dispatcher};
use edgekit_core::handler;
use edgekit_core::listener::{
    BrokerListener, Frame, FrameCodec, Listener, LocalBroker, MessageType, TcpEdgeListener,
};
use edgekit_core::{Json, Payload};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_util::codec::Framed;

fn dispatcher() -> Arc<Dispatcher> {
    Dispatcher::new(ServiceProvider::new(), ContextFactory::auto())
}

#[tokio::test]
async fn tcp_adhoc_frame_gets_a_response_on_the_same_connection() {
    let dispatcher = dispatcher();
    dispatcher.tcp_handler(
        Binding::new(),
        handler!(async |ctx: Arc<Context>| {
            let body = match ctx.payload() {
                Payload::Tcp { body: Some(body), .. } => {
                    String::from_utf8_lossy(body).to_string()
                }
                _ => String::new(),
            };
            Json(json!({"echo": body}))
        }),
    );

    // Grab a free local port for the listener.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let listener = TcpEdgeListener::new(addr.to_string(), dispatcher.clone());
    listener.initialize().await.unwrap();

    let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec);
    framed
        .send(Frame::new(
            "session-7",
            MessageType::AdHoc,
            Some(Bytes::from_static(b"ping")),
        ))
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("response before timeout")
        .expect("connection still open")
        .expect("valid frame");
    assert_eq!(response.session_id, "session-7");
    assert_eq!(response.message_type, MessageType::AdHoc);

    let body: serde_json::Value =
        serde_json::from_slice(response.payload.as_deref().unwrap()).unwrap();
    let content: serde_json::Value =
        serde_json::from_str(body["cms"]["content"].as_str().unwrap()).unwrap();
    assert_eq!(content, json!({"echo": "ping"}));

    listener.shutdown().await;
}

#[tokio::test]
async fn broker_deliveries_reach_broker_handlers() {
    let dispatcher = dispatcher();
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let received = received.clone();
        dispatcher.broker_handler(
            Binding::new(),
            handler!(async |ctx: Arc<Context>| {
                if let Payload::Broker(delivery) = ctx.payload() {
                    received
                        .lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&delivery.body).to_string());
                }
                "ok"
            }),
        );
    }

    let broker = Arc::new(LocalBroker::new("amqp://localhost"));
    let config = BrokerConfig {
        url: "amqp://localhost".to_string(),
        queue: Some("tasks".to_string()),
        exchange: None,
        routing_key: None,
        durable: None,
    };
    let listener = BrokerListener::new(config, broker.clone(), dispatcher.clone());
    listener.initialize().await.unwrap();

    assert!(broker.publish("tasks", &b"job-1"[..]).await);
    assert!(broker.publish("tasks", &b"job-2"[..]).await);
    assert!(!broker.publish("nobody-listens", &b"x"[..]).await);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if received.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both deliveries handled");

    let mut seen = received.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["job-1".to_string(), "job-2".to_string()]);

    listener.shutdown().await;
    assert_eq!(dispatcher.handler_count(ContextKind::Broker), 1);
}

#[tokio::test]
async fn broker_predicates_see_queue_metadata() {
    let dispatcher = dispatcher();
    dispatcher.broker_handler(
        Binding::new().predicate(edgekit_core::Predicate::equal("context.queue", "tasks")),
        handler!(async || { "handled" }),
    );

    let broker = Arc::new(LocalBroker::new("amqp://localhost"));
    let config = BrokerConfig {
        url: "amqp://localhost".to_string(),
        queue: Some("tasks".to_string()),
        exchange: None,
        routing_key: None,
        durable: Some(true),
    };
    let listener = BrokerListener::new(config, broker.clone(), dispatcher.clone());
    listener.initialize().await.unwrap();

    assert!(broker.publish_routed("tasks", Some("billing"), &b"{}"[..]).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    listener.shutdown().await;
}
