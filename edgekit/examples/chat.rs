//! WebSocket chat: every text frame is relayed to all other active
//! sessions.
//!
//! ```sh
//! cargo run --example chat
//! # then connect a few clients to ws://127.0.0.1:8080/chat
//! ```

use edgekit::prelude::*;
use edgekit::{ListeningOptions, MessageType};

#[tokio::main]
async fn main() -> Result<(), EdgeError> {
    let app = EdgeApp::from_config(AppConfig::from_json_str(
        r#"{"http": "127.0.0.1:8080", "router": "web", "logger": {"level": "info"}}"#,
    )?)?;

    let sessions = app.sessions().clone();
    app.websocket_handler(
        Binding::new(),
        handler!(async |ctx: Arc<Context>| {
            let session_id = ctx.session().map(|s| s.id().to_string()).unwrap_or_default();
            match ctx.message_type() {
                MessageType::Connect => {
                    tracing::info!(%session_id, "joined");
                }
                MessageType::Disconnect => {
                    tracing::info!(%session_id, "left");
                }
                _ => {
                    let Some(text) = ctx.frame().and_then(WsFrame::as_text).map(str::to_string)
                    else {
                        return "";
                    };
                    let outgoing = format!("{session_id}: {text}");
                    for peer in sessions.get_active_sessions() {
                        if peer.id() != session_id {
                            let _ = peer.send_text(&outgoing).await;
                        }
                    }
                }
            }
            ""
        }),
    );

    app.listening(ListeningOptions::default()).await
}
