//! Per-request contexts.
//!
//! A [`Context`] carries the protocol payload of one inbound message, the
//! parsed URL and captured URL segments, and a per-request DI scope. The
//! context registers itself in its own scope, so a handler taking
//! `Arc<Context>` through the container receives the active instance.

pub mod envelope;
mod factory;

pub use factory::ContextFactory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde_json::{json, Value};

use crate::di::injection::ValueMap;
use crate::di::{ServiceKey, ServiceProvider};
use crate::dispatcher::Dispatcher;
use crate::error::{status, DispatchError};
use crate::listener::{BrokerDelivery, MessageType};
use crate::path::lookup_key;
use crate::ws::{WebSocketSession, WsFrame};
use envelope::{mime, response_type, Content, ResponseEnvelope};

/// The closed set of context types handlers can be registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Restful,
    Web,
    WebSocket,
    Tcp,
    Broker,
}

impl ContextKind {
    /// The router tag naming this context type in configuration.
    pub fn tag(self) -> &'static str {
        match self {
            ContextKind::Restful => "restful",
            ContextKind::Web => "web",
            ContextKind::WebSocket => "websocket",
            ContextKind::Tcp => "socket",
            ContextKind::Broker => "broker",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "restful" => Some(ContextKind::Restful),
            "web" => Some(ContextKind::Web),
            "websocket" => Some(ContextKind::WebSocket),
            "socket" | "endpoint" => Some(ContextKind::Tcp),
            "broker" => Some(ContextKind::Broker),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            ContextKind::Restful => "RestfulContext",
            ContextKind::Web => "WebContext",
            ContextKind::WebSocket => "WebSocketContext",
            ContextKind::Tcp => "TcpContext",
            ContextKind::Broker => "BrokerContext",
        }
    }
}

/// Protocol-specific payload of a context.
pub enum Payload {
    /// HTTP-shaped request: the inner cms object (request, query, form, …).
    Http { cms: Value },
    /// One WebSocket frame plus the owning session. `frame` is `None` for
    /// the synthetic connect/disconnect messages.
    WebSocket {
        frame: Option<WsFrame>,
        session: Arc<WebSocketSession>,
    },
    /// Raw framed TCP message.
    Tcp {
        session_id: String,
        body: Option<Bytes>,
    },
    /// Message-broker delivery.
    Broker(BrokerDelivery),
}

struct ResponseProps {
    response_type: &'static str,
    status_code: String,
    mime: String,
}

/// A per-request context: protocol payload, URL segments, and DI scope.
pub struct Context {
    kind: ContextKind,
    message_type: MessageType,
    url: Option<String>,
    url_segments: Mutex<HashMap<String, String>>,
    scope: ServiceProvider,
    payload: Payload,
    props: Mutex<ResponseProps>,
    headers: Mutex<HashMap<String, Vec<String>>>,
    dispatcher: Arc<Dispatcher>,
}

impl ServiceKey for Context {}

impl Context {
    pub fn new(
        dispatcher: &Arc<Dispatcher>,
        kind: ContextKind,
        message_type: MessageType,
        url: Option<String>,
        payload: Payload,
    ) -> Arc<Self> {
        let scope = dispatcher.provider().create_scope();
        let default_mime = match kind {
            ContextKind::Web => mime::HTML,
            _ => mime::JSON,
        };
        let ctx = Arc::new(Self {
            kind,
            message_type,
            url,
            url_segments: Mutex::new(HashMap::new()),
            scope,
            payload,
            props: Mutex::new(ResponseProps {
                response_type: response_type::RENDERED,
                status_code: status::OK.to_string(),
                mime: default_mime.to_string(),
            }),
            headers: Mutex::new(HashMap::new()),
            dispatcher: dispatcher.clone(),
        });
        ctx.scope.add_singleton_weak::<Context>(Arc::downgrade(&ctx));
        ctx
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The per-request DI scope. Cleared when the context is dropped.
    pub fn scope(&self) -> &ServiceProvider {
        &self.scope
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The inner cms object, for HTTP-shaped contexts.
    pub fn cms(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Http { cms } => Some(cms),
            _ => None,
        }
    }

    /// The owning WebSocket session, for WebSocket contexts.
    pub fn session(&self) -> Option<&Arc<WebSocketSession>> {
        match &self.payload {
            Payload::WebSocket { session, .. } => Some(session),
            _ => None,
        }
    }

    /// The received frame, for WebSocket data contexts.
    pub fn frame(&self) -> Option<&WsFrame> {
        match &self.payload {
            Payload::WebSocket { frame, .. } => frame.as_ref(),
            _ => None,
        }
    }

    pub fn url_segments(&self) -> HashMap<String, String> {
        self.url_segments.lock().unwrap().clone()
    }

    /// Replace the captured URL segments (called by a matching Url
    /// predicate).
    pub fn set_url_segments(&self, segments: HashMap<String, String>) {
        *self.url_segments.lock().unwrap() = segments;
    }

    // ── Response shaping ────────────────────────────────────────────────

    pub fn set_status_code(&self, code: impl Into<String>) {
        self.props.lock().unwrap().status_code = code.into();
    }

    pub fn set_mime(&self, mime_type: impl Into<String>) {
        self.props.lock().unwrap().mime = mime_type.into();
    }

    pub fn set_response_type(&self, tag: &'static str) {
        self.props.lock().unwrap().response_type = tag;
    }

    /// Add a custom response header. Repeated names accumulate and are
    /// collapsed comma-separated in the envelope.
    pub fn add_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .lock()
            .unwrap()
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    // ── Value mapping ───────────────────────────────────────────────────

    /// URL segments merged with query parameters (where the protocol has
    /// them). Only built when a handler's plan has value parameters.
    pub fn effective_values(&self) -> ValueMap {
        let mut values = ValueMap::new();
        for (name, value) in self.url_segments.lock().unwrap().iter() {
            values.insert(name.clone(), value.clone());
        }
        if let Some(Value::Object(query)) = self.cms().and_then(|cms| cms.get(envelope::keys::QUERY))
        {
            for (name, value) in query {
                match value {
                    Value::Array(items) => values.insert_many(
                        name.clone(),
                        items
                            .iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                            .collect(),
                    ),
                    Value::String(s) => values.insert(name.clone(), s.clone()),
                    other => values.insert(name.clone(), other.to_string()),
                }
            }
        }
        values
    }

    // ── Predicate expression surface ────────────────────────────────────

    /// Resolve a compiled predicate path (without the leading `context`
    /// segment) against this context. Unknown paths resolve to `None`.
    pub fn lookup(&self, segments: &[String]) -> Option<Value> {
        let (head, rest) = segments.split_first()?;
        let head = head.to_ascii_lowercase();
        match head.as_str() {
            "url" => {
                if !rest.is_empty() {
                    return None;
                }
                self.url.as_ref().map(|url| json!(url))
            }
            "url_segments" => {
                let map = self.url_segments.lock().unwrap();
                let root = json!(map.clone());
                drop(map);
                descend(&root, rest)
            }
            "method" => {
                let cms = self.cms()?;
                let request = lookup_key(cms, envelope::keys::REQUEST)?;
                let method = lookup_key(request, envelope::keys::METHOD)?;
                rest.is_empty().then(|| method.clone())
            }
            "cms" => descend(self.cms()?, rest),
            "query" | "form" | "cookie" | "request" => {
                let node = lookup_key(self.cms()?, &head)?;
                descend(node, rest)
            }
            "session_id" => match &self.payload {
                Payload::WebSocket { session, .. } => {
                    rest.is_empty().then(|| json!(session.id()))
                }
                Payload::Tcp { session_id, .. } => rest.is_empty().then(|| json!(session_id)),
                _ => None,
            },
            "text" => match &self.payload {
                Payload::WebSocket {
                    frame: Some(WsFrame::Text(text)),
                    ..
                } => rest.is_empty().then(|| json!(text)),
                _ => None,
            },
            "queue" | "host" | "routing_key" | "message" => match &self.payload {
                Payload::Broker(delivery) => match head.as_str() {
                    "queue" => rest.is_empty().then(|| json!(delivery.queue)),
                    "host" => rest.is_empty().then(|| json!(delivery.host)),
                    "routing_key" => {
                        if !rest.is_empty() {
                            return None;
                        }
                        delivery.routing_key.as_ref().map(|key| json!(key))
                    }
                    _ => {
                        let parsed: Value = serde_json::from_slice(&delivery.body).ok()?;
                        descend(&parsed, rest)
                    }
                },
                _ => None,
            },
            _ => None,
        }
    }

    // ── Response generation ─────────────────────────────────────────────

    /// Encode a handler result into this context's protocol envelope.
    pub fn generate_response(&self, result: crate::di::injection::HandlerResult) -> ResponseEnvelope {
        use crate::di::injection::HandlerResult;

        let props = self.props.lock().unwrap();
        let headers = self.headers.lock().unwrap().clone();
        let template = self.cms().map(|cms| json!({ envelope::keys::CMS: cms.clone() }));

        let (content, mime_type, rtype) = match result {
            HandlerResult::Json(value) => (
                Content::Text(value.to_string()),
                props.mime.clone(),
                props.response_type,
            ),
            HandlerResult::Text(text) => {
                (Content::Text(text), props.mime.clone(), props.response_type)
            }
            HandlerResult::Html(html) => {
                (Content::Text(html), mime::HTML.to_string(), props.response_type)
            }
            HandlerResult::Bytes(bytes) => (
                Content::Blob(bytes),
                mime::OCTET_STREAM.to_string(),
                props.response_type,
            ),
            HandlerResult::File(path) => (
                Content::FilePath(path),
                props.mime.clone(),
                response_type::STATIC_FILE,
            ),
            HandlerResult::None => (
                Content::Text(String::new()),
                props.mime.clone(),
                props.response_type,
            ),
        };

        envelope::build(template, rtype, &props.status_code, &mime_type, content, &headers)
    }

    /// Encode a dispatch error into this context's protocol envelope.
    ///
    /// Short-circuit errors keep their status and code; everything else is a
    /// 500. For web contexts the body is HTML, elsewhere JSON.
    pub fn generate_error_response(&self, error: &DispatchError) -> ResponseEnvelope {
        let status_code = error.status_code();
        let headers = self.headers.lock().unwrap().clone();
        let template = self.cms().map(|cms| json!({ envelope::keys::CMS: cms.clone() }));

        let (error_code, message, data) = match error {
            DispatchError::ShortCircuit(sc) => (
                Some(sc.error_code),
                sc.message.clone().unwrap_or_default(),
                sc.data.clone(),
            ),
            other => (None, other.to_string(), None),
        };

        let log_error = self.dispatcher.log_error();
        let (content, mime_type) = match self.kind {
            ContextKind::Web => {
                let body = match data {
                    Some(data) => data.to_string().replace('\n', "</br>"),
                    None => {
                        let mut text = format!(
                            "{message} (Error Code: {})",
                            error_code.unwrap_or("none")
                        );
                        if log_error {
                            text.push_str(&format!("<hr/>{error:?}"));
                        }
                        text
                    }
                };
                (body, mime::HTML)
            }
            _ => {
                let body = match data {
                    Some(data) => data,
                    None => {
                        let mut object = json!({
                            "errorCode": error_code,
                            "errorMessage": message,
                        });
                        if log_error {
                            object["error"] = json!(format!("{error:?}"));
                        }
                        object
                    }
                };
                (body.to_string(), mime::JSON)
            }
        };

        envelope::build(
            template,
            response_type::RENDERED,
            status_code,
            mime_type,
            Content::Text(content),
            &headers,
        )
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.scope.clear_scope();
    }
}

fn descend(root: &Value, rest: &[String]) -> Option<Value> {
    let mut current = root;
    for segment in rest {
        current = lookup_key(current, segment)?;
    }
    Some(current.clone())
}
