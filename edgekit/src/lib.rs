//! Edgekit — an edge framework routing HTTP requests, WebSocket frames,
//! framed TCP messages, and broker deliveries into handlers with typed
//! dependency injection.
//!
//! This facade crate wires the sub-crates together: build an [`EdgeApp`]
//! from an [`AppConfig`], register services and handlers, then call
//! [`EdgeApp::listening`].
//!
//! ```ignore
//! use edgekit::prelude::*;
//!
//! let app = EdgeApp::from_config(AppConfig::from_json_str(
//!     r#"{"http": "127.0.0.1:8080", "router": "restful"}"#,
//! )?)?;
//! app.restful_handler(
//!     Binding::route("api/users/:id").get(),
//!     handler!(async |id: Value<i64>| { Json(serde_json::json!({"id": id.0})) }),
//! );
//! app.listening(ListeningOptions::default()).await?;
//! ```

pub use edgekit_cache as cache;
pub use edgekit_core as core;
pub use edgekit_http as http;

pub use edgekit_core::*;

pub mod prelude {
    pub use edgekit_core::prelude::*;
    pub use crate::{EdgeApp, ListeningOptions};
    pub use edgekit_cache::{CacheManager, Cached};
}

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgekit_cache::{CacheManager, Cached};
use edgekit_core::config::AppConfig;
use edgekit_core::context::{ContextFactory, ContextKind};
use edgekit_core::di::injection::HandlerSpec;
use edgekit_core::di::ServiceProvider;
use edgekit_core::dispatcher::{Binding, Dispatcher, HandlerId};
use edgekit_core::error::EdgeError;
use edgekit_core::listener::{BrokerListener, BrokerTransport, HostedListener, TcpEdgeListener};
use edgekit_core::predicate::Predicate;
use edgekit_core::ws::SessionManager;
use edgekit_http::HttpListener;

/// Initialize `tracing` from the `logger` config section. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing(config: Option<&edgekit_core::config::LoggerConfig>) {
    let level = config
        .and_then(|logger| logger.level.as_deref())
        .unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let format = config.and_then(|logger| logger.format.as_deref());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match format {
        Some("json") => builder.json().try_init(),
        _ => builder.try_init(),
    };
}

/// Options for [`EdgeApp::listening`].
pub struct ListeningOptions {
    before_start: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    after_end: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    with_block: bool,
}

impl Default for ListeningOptions {
    fn default() -> Self {
        Self {
            before_start: None,
            after_end: None,
            with_block: true,
        }
    }
}

impl ListeningOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run before listeners start.
    pub fn before_start(mut self, fut: impl Future<Output = ()> + Send + 'static) -> Self {
        self.before_start = Some(Box::pin(fut));
        self
    }

    /// Run after the loop stops and hosted services are down.
    pub fn after_end(mut self, fut: impl Future<Output = ()> + Send + 'static) -> Self {
        self.after_end = Some(Box::pin(fut));
        self
    }

    /// When false, start listeners and return without blocking.
    pub fn with_block(mut self, block: bool) -> Self {
        self.with_block = block;
        self
    }
}

/// The assembled application: provider, dispatcher, session manager, cache
/// manager, and the listeners described by the configuration.
pub struct EdgeApp {
    config: AppConfig,
    provider: ServiceProvider,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
    cache: Arc<dyn CacheManager>,
    broker_transport: Mutex<Option<Arc<dyn BrokerTransport>>>,
}

impl EdgeApp {
    pub fn from_config(config: AppConfig) -> Result<Self, EdgeError> {
        init_tracing(config.logger.as_ref());

        let provider = ServiceProvider::new();
        let factory =
            ContextFactory::from_config(config.router.as_ref(), config.default_router.as_deref())?;
        let dispatcher = Dispatcher::with_options(
            provider.clone(),
            factory,
            config.log_error.unwrap_or(false),
        );
        let sessions = Arc::new(SessionManager::default());
        let cache = edgekit_cache::from_config(config.cache.as_ref());

        provider.add_singleton_instance::<AppConfig>(config.clone());
        provider.add_singleton_arc::<SessionManager>(sessions.clone());
        edgekit_core::config::register_config_sections(&provider);

        Ok(Self {
            config,
            provider,
            dispatcher,
            sessions,
            cache,
            broker_transport: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The root DI container.
    pub fn services(&self) -> &ServiceProvider {
        &self.provider
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn cache_manager(&self) -> &Arc<dyn CacheManager> {
        &self.cache
    }

    /// Supply the broker transport backing the configured `broker` section.
    pub fn with_broker_transport(self, transport: Arc<dyn BrokerTransport>) -> Self {
        *self.broker_transport.lock().unwrap() = Some(transport);
        self
    }

    // ── Handler registration passthrough ────────────────────────────────

    pub fn restful_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.dispatcher.restful_handler(binding, spec)
    }

    pub fn web_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.dispatcher.web_handler(binding, spec)
    }

    pub fn websocket_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.dispatcher.websocket_handler(binding, spec)
    }

    pub fn tcp_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.dispatcher.tcp_handler(binding, spec)
    }

    pub fn broker_handler(&self, binding: Binding, spec: HandlerSpec) -> HandlerId {
        self.dispatcher.broker_handler(binding, spec)
    }

    pub fn register_handler(
        &self,
        kind: ContextKind,
        predicates: Vec<Predicate>,
        spec: HandlerSpec,
    ) -> HandlerId {
        self.dispatcher.register_handler(kind, predicates, spec)
    }

    pub fn unregister_handler(&self, kind: ContextKind, handler: Option<HandlerId>) {
        self.dispatcher.unregister_handler(kind, handler)
    }

    /// Wrap a handler so its results are cached by the app's cache manager.
    /// `life_time` of zero caches until cleared.
    pub fn cache(&self, key: Option<String>, life_time: Duration, spec: HandlerSpec) -> HandlerSpec {
        Cached::wrap(self.cache.clone(), key, life_time, spec)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Register the configured listeners as hosted services. Called by
    /// [`listening`](Self::listening); call directly when embedding.
    pub fn register_listeners(&self) -> Result<(), EdgeError> {
        for endpoint in self.config.http_endpoints() {
            let listener = HttpListener::new(
                endpoint,
                self.dispatcher.clone(),
                self.sessions.clone(),
            );
            self.provider
                .add_hosted_arc(0, "HttpListener", Arc::new(HostedListener(listener)));
        }
        if let Some(addr) = &self.config.tcp {
            let listener = TcpEdgeListener::new(addr.clone(), self.dispatcher.clone());
            self.provider
                .add_hosted_arc(0, "TcpEdgeListener", Arc::new(HostedListener(listener)));
        }
        if let Some(broker) = &self.config.broker {
            match self.broker_transport.lock().unwrap().clone() {
                Some(transport) => {
                    let listener =
                        BrokerListener::new(broker.clone(), transport, self.dispatcher.clone());
                    self.provider
                        .add_hosted_arc(0, "BrokerListener", Arc::new(HostedListener(listener)));
                }
                None => {
                    return Err(EdgeError::Config(
                        "broker is configured but no transport was supplied; \
                         call with_broker_transport first"
                            .to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Start listening: run hosted-service start hooks in priority order,
    /// block until SIGINT/SIGTERM (unless `with_block` is off), then stop
    /// hosted services in reverse priority.
    pub async fn listening(&self, options: ListeningOptions) -> Result<(), EdgeError> {
        if let Some(before_start) = options.before_start {
            before_start.await;
        }
        self.register_listeners()?;
        self.provider.start_hosted_services().await?;
        if !options.with_block {
            return Ok(());
        }
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        self.provider.stop_hosted_services().await;
        if let Some(after_end) = options.after_end {
            after_end.await;
        }
        Ok(())
    }

    /// Stop hosted services without waiting for a signal. For embedders that
    /// started with `with_block(false)`.
    pub async fn shutdown(&self) {
        self.provider.stop_hosted_services().await;
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
