//! The dispatcher: handler registry, predicate-guarded dispatch, and the
//! listener-facing message entry point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::json;

use crate::context::envelope::{self, mime, response_type, Content, ResponseEnvelope};
use crate::context::{Context, ContextFactory, ContextKind};
use crate::di::injection::{HandlerResult, HandlerSpec, ValueMap};
use crate::di::ServiceProvider;
use crate::error::{DispatchError, ShortCircuit};
use crate::listener::Message;
use crate::predicate::{build_predicates, Predicate};

/// Token identifying one handler registration, used for unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Route/method/predicate bundle accepted by the per-protocol registration
/// helpers.
#[derive(Default)]
pub struct Binding {
    route: Option<String>,
    methods: Vec<String>,
    predicates: Vec<Predicate>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(pattern: impl Into<String>) -> Self {
        Self {
            route: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    pub fn get(self) -> Self {
        self.method("get")
    }

    pub fn post(self) -> Self {
        self.method("post")
    }

    pub fn put(self) -> Self {
        self.method("put")
    }

    pub fn delete(self) -> Self {
        self.method("delete")
    }

    pub fn options(self) -> Self {
        self.method("options")
    }

    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn build(self) -> Vec<Predicate> {
        let methods: Vec<&str> = self.methods.iter().map(String::as_str).collect();
        build_predicates(self.route.as_deref(), &methods, self.predicates)
    }
}

type WrappedHandler = Arc<
    dyn Fn(
            Arc<Context>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Option<ResponseEnvelope>, DispatchError>> + Send>,
        > + Send
        + Sync,
>;

#[derive(Clone)]
struct CallbackInfo {
    id: HandlerId,
    predicates: Vec<Predicate>,
    callback: WrappedHandler,
}

impl CallbackInfo {
    /// Evaluate all predicates, then run the handler. A rejecting predicate
    /// yields `Ok(None)` so dispatch moves on; a short-circuiting one
    /// aborts with its error.
    async fn try_execute(&self, ctx: &Arc<Context>) -> Result<Option<ResponseEnvelope>, DispatchError> {
        for predicate in &self.predicates {
            match predicate.check(ctx).await {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(short_circuit) => return Err(DispatchError::ShortCircuit(short_circuit)),
            }
        }
        (self.callback)(ctx.clone()).await
    }
}

/// Routes contexts to handlers: per-context-type ordered handler lists,
/// predicate evaluation, injection-plan invocation, and response encoding.
pub struct Dispatcher {
    provider: ServiceProvider,
    factory: ContextFactory,
    lookup: RwLock<HashMap<ContextKind, Vec<CallbackInfo>>>,
    next_handler_id: AtomicU64,
    log_error: bool,
}

impl Dispatcher {
    pub fn new(provider: ServiceProvider, factory: ContextFactory) -> Arc<Self> {
        Self::with_options(provider, factory, false)
    }

    /// `log_error` controls whether error details are embedded in error
    /// responses (they are always logged).
    pub fn with_options(provider: ServiceProvider, factory: ContextFactory, log_error: bool) -> Arc<Self> {
        Arc::new(Self {
            provider,
            factory,
            lookup: RwLock::new(HashMap::new()),
            next_handler_id: AtomicU64::new(1),
            log_error,
        })
    }

    pub fn provider(&self) -> &ServiceProvider {
        &self.provider
    }

    pub fn factory(&self) -> &ContextFactory {
        &self.factory
    }

    pub fn log_error(&self) -> bool {
        self.log_error
    }

    // ── Handler registration ────────────────────────────────────────────

    pub fn restful_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.register_handler(ContextKind::Restful, binding.build(), spec)
    }

    pub fn web_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.register_handler(ContextKind::Web, binding.build(), spec)
    }

    pub fn websocket_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.register_handler(ContextKind::WebSocket, binding.build(), spec)
    }

    pub fn tcp_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.register_handler(ContextKind::Tcp, binding.build(), spec)
    }

    pub fn broker_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.register_handler(ContextKind::Broker, binding.build(), spec)
    }

    /// Register a compiled handler for a context type. Handlers are tried in
    /// registration order; the first whose predicates all accept wins.
    pub fn register_handler(
        &self,
        kind: ContextKind,
        predicates: Vec<Predicate>,
        spec: HandlerSpec,
    ) -> HandlerId {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        let callback = Self::wrap(spec);
        self.lookup
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(CallbackInfo {
                id,
                predicates,
                callback,
            });
        self.rebuild_router();
        id
    }

    /// Remove one handler by id, or all handlers for the context type when
    /// `handler` is `None`.
    pub fn unregister_handler(&self, kind: ContextKind, handler: Option<HandlerId>) {
        {
            let mut lookup = self.lookup.write().unwrap();
            match (lookup.get_mut(&kind), handler) {
                (Some(list), Some(id)) => list.retain(|info| info.id != id),
                (Some(list), None) => list.clear(),
                (None, _) => {}
            }
        }
        self.rebuild_router();
    }

    pub fn handler_count(&self, kind: ContextKind) -> usize {
        self.lookup
            .read()
            .unwrap()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// The wrapper executes the pre-compiled plan: the effective
    /// value-mapping is only materialized when the plan has value
    /// parameters, and the result is encoded into the context's envelope.
    fn wrap(spec: HandlerSpec) -> WrappedHandler {
        Arc::new(move |ctx: Arc<Context>| {
            let values = if spec.plan().has_value_parameters {
                ctx.effective_values()
            } else {
                ValueMap::new()
            };
            let future = spec.invoke(ctx.clone(), values);
            Box::pin(async move {
                match future.await? {
                    HandlerResult::None => Ok(None),
                    result => Ok(Some(ctx.generate_response(result))),
                }
            })
        })
    }

    fn rebuild_router(&self) {
        let lookup = self.lookup.read().unwrap();
        let kinds: Vec<ContextKind> = lookup
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(kind, _)| *kind)
            .collect();
        drop(lookup);
        self.factory.rebuild_auto(&kinds);
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Walk the handler list for the context's type. Errors (short-circuit
    /// or otherwise) become the context's error response; an exhausted list
    /// is a handler-not-found 404.
    pub async fn dispatch(&self, ctx: Arc<Context>) -> ResponseEnvelope {
        let callbacks: Vec<CallbackInfo> = self
            .lookup
            .read()
            .unwrap()
            .get(&ctx.kind())
            .cloned()
            .unwrap_or_default();

        for callback in &callbacks {
            match callback.try_execute(&ctx).await {
                Ok(Some(envelope)) => return envelope,
                Ok(None) => continue,
                Err(error) => {
                    tracing::error!(
                        context_type = ctx.kind().tag(),
                        error = %error,
                        "handler dispatch failed"
                    );
                    return ctx.generate_error_response(&error);
                }
            }
        }

        let error = DispatchError::ShortCircuit(ShortCircuit::handler_not_found(
            ctx.kind().type_name(),
        ));
        ctx.generate_error_response(&error)
    }

    /// Dispatch on a background task, returning its join handle.
    pub fn dispatch_in_background(
        self: &Arc<Self>,
        ctx: Arc<Context>,
    ) -> tokio::task::JoinHandle<ResponseEnvelope> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(ctx).await })
    }

    /// Listener entry point: build a context for the message, dispatch it,
    /// and fulfill the message's responder if it has response semantics.
    pub async fn on_message_receive(self: &Arc<Self>, mut message: Message) {
        let responder = message.take_responder();
        match self.factory.create_context(self, message) {
            Ok(ctx) => {
                let envelope = self.dispatch(ctx).await;
                if let Some(responder) = responder {
                    responder.send(envelope);
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to create context for inbound message");
                if let Some(responder) = responder {
                    responder.send(bare_error_envelope(&error));
                }
            }
        }
    }
}

/// Error envelope for failures before any context exists.
fn bare_error_envelope(error: &DispatchError) -> ResponseEnvelope {
    let body = json!({
        "errorCode": null,
        "errorMessage": error.to_string(),
    });
    envelope::build(
        None,
        response_type::RENDERED,
        error.status_code(),
        mime::JSON,
        Content::Text(body.to_string()),
        &HashMap::new(),
    )
}
