//! Facade wiring: config-driven assembly, handler-result caching, and the
//! non-blocking listening lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use edgekit::prelude::*;
use edgekit::{handler, ListeningOptions};
use edgekit_core::dispatcher::Binding;
use edgekit_core::listener::Message;
use serde_json::json;

fn http_message(url: &str) -> (Message, edgekit_core::listener::ResponseReceiver) {
    Message::http(json!({
        "cms": {
            "request": {
                "method": "get",
                "url": url,
                "full-url": format!("localhost:8080/{url}"),
                "request-id": "1",
            },
            "query": {},
        }
    }))
}

#[tokio::test]
async fn app_assembles_from_config_and_serves_handlers() {
    let config = AppConfig::from_json_str(
        r#"{
            "router": "restful",
            "logger": {"level": "warn"},
            "database": {"users": {"name": "users_db"}}
        }"#,
    )
    .unwrap();
    let app = EdgeApp::from_config(config).unwrap();

    app.restful_handler(
        Binding::route("api/ping"),
        handler!(async || { Json(json!({"pong": true})) }),
    );

    let (message, receiver) = http_message("api/ping");
    app.dispatcher().on_message_receive(message).await;
    let envelope = receiver.recv().await.unwrap();
    assert_eq!(envelope.status(), 200);
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(envelope.content().unwrap()).unwrap(),
        json!({"pong": true})
    );

    // The config is resolvable from the container.
    let resolved = app.services().resolve::<AppConfig>().unwrap();
    assert!(resolved.section("database.users").is_some());
}

#[tokio::test]
async fn cached_handlers_skip_re_execution() {
    let app = EdgeApp::from_config(
        AppConfig::from_json_str(r#"{"router": "restful", "cache": {"type": "memory"}}"#).unwrap(),
    )
    .unwrap();

    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let spec = handler!(async || {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Json(json!({"expensive": true}))
    });
    app.restful_handler(
        Binding::route("api/report"),
        app.cache(Some("report".to_string()), Duration::from_secs(0), spec),
    );

    for _ in 0..3 {
        let (message, receiver) = http_message("api/report");
        app.dispatcher().on_message_receive(message).await;
        assert_eq!(receiver.recv().await.unwrap().status(), 200);
    }
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);

    // Clearing the key forces one re-execution.
    app.cache_manager().clear("report");
    let (message, receiver) = http_message("api/report");
    app.dispatcher().on_message_receive(message).await;
    assert_eq!(receiver.recv().await.unwrap().status(), 200);
    assert_eq!(CALLS.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn broker_config_without_transport_fails_startup() {
    let app = EdgeApp::from_config(
        AppConfig::from_json_str(
            r#"{"router": "restful", "broker": {"url": "amqp://localhost", "queue": "tasks"}}"#,
        )
        .unwrap(),
    )
    .unwrap();

    let result = app.listening(ListeningOptions::new().with_block(false)).await;
    assert!(matches!(result, Err(EdgeError::Config(_))));
}

#[tokio::test]
async fn non_blocking_listening_starts_and_stops_listeners() {
    let app = EdgeApp::from_config(
        AppConfig::from_json_str(r#"{"http": "127.0.0.1:0", "router": "restful"}"#).unwrap(),
    )
    .unwrap();

    app.listening(ListeningOptions::new().with_block(false))
        .await
        .unwrap();
    app.shutdown().await;
}
