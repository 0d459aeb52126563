//! HTTP listener for the edgekit framework.
//!
//! The host HTTP server is axum; this crate never parses HTTP itself. Every
//! request becomes a canonical cms envelope dispatched as an ad-hoc message;
//! WebSocket upgrades hand the socket to the core session manager.

pub mod envelope;
pub mod response;
pub mod ws;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequestParts, Request, State, WebSocketUpgrade};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio_util::sync::CancellationToken;

use edgekit_core::config::{HttpEndpoint, SslConfig};
use edgekit_core::context::envelope::keys;
use edgekit_core::di::ServiceKey;
use edgekit_core::dispatcher::Dispatcher;
use edgekit_core::error::EdgeError;
use edgekit_core::listener::{Listener, Message};
use edgekit_core::ws::SessionManager;

use crate::ws::AxumSocket;

/// Process-monotonic request id counter, shared by all HTTP listeners.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct HttpState {
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
}

/// The catch-all router feeding the dispatcher. Exposed separately from the
/// listener so tests can drive it without binding a socket.
pub fn build_router(dispatcher: Arc<Dispatcher>, sessions: Arc<SessionManager>) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(HttpState {
            dispatcher,
            sessions,
        })
}

fn wants_upgrade(req: &Request) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
}

async fn handle_request(State(state): State<HttpState>, req: Request) -> Response {
    let request_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    if wants_upgrade(&req) {
        let (mut parts, _body) = req.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };
        let document = envelope::document_from_parts(&parts, client_ip, request_id);
        let cms = document.get(keys::CMS).cloned();
        let dispatcher = state.dispatcher.clone();
        let sessions = state.sessions.clone();
        return upgrade.on_upgrade(move |socket| async move {
            let transport = Arc::new(AxumSocket::new(socket));
            sessions.handle_connection(dispatcher, transport, cms).await;
        });
    }

    let document = envelope::document_from_request(req, client_ip, request_id).await;
    let (message, receiver) = Message::http(document);
    state.dispatcher.on_message_receive(message).await;
    match receiver.recv().await {
        Some(envelope) => response::encode(envelope).await,
        None => (StatusCode::INTERNAL_SERVER_ERROR, "no response produced").into_response(),
    }
}

/// One hosted HTTP listener per configured endpoint.
pub struct HttpListener {
    endpoint: String,
    ssl: Option<SslConfig>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
}

impl ServiceKey for HttpListener {}

impl HttpListener {
    pub fn new(
        endpoint: HttpEndpoint,
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            endpoint: endpoint.endpoint,
            ssl: endpoint.ssl,
            dispatcher,
            sessions,
            shutdown: CancellationToken::new(),
        }
    }
}

impl Listener for HttpListener {
    fn name(&self) -> &'static str {
        "http"
    }

    fn initialize<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<(), EdgeError>> + Send + 'a>> {
        Box::pin(async move {
            if self.ssl.is_some() {
                return Err(EdgeError::Config(format!(
                    "endpoint {} is configured with ssl; terminate tls in front of this server",
                    self.endpoint
                )));
            }
            let listener = tokio::net::TcpListener::bind(&self.endpoint)
                .await
                .map_err(|err| {
                    EdgeError::Listener(format!("http bind {} failed: {err}", self.endpoint))
                })?;
            tracing::info!(endpoint = %self.endpoint, "http listener up");

            let router = build_router(self.dispatcher.clone(), self.sessions.clone());
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                let serve = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(token.cancelled_owned());
                if let Err(err) = serve.await {
                    tracing::error!(error = %err, "http server terminated");
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
