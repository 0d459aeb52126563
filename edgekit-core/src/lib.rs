//! Core runtime for the edgekit edge framework.
//!
//! Routes heterogeneous inbound events — HTTP requests, WebSocket frames,
//! framed TCP messages, and broker deliveries — into registered handlers
//! with typed dependency injection, predicate-based routing, and a
//! per-request lifecycle.

pub mod config;
pub mod context;
pub mod di;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod path;
pub mod predicate;
pub mod prelude;
pub mod ws;

pub use config::{
    register_config_sections, AppConfig, ConfigFor, ConfigSlice, SectionKey,
};
pub use context::{Context, ContextFactory, ContextKind, Payload};
pub use di::injection::{
    FromContext, FromValue, HandlerResult, HandlerSpec, InjectionPlan, IntoHandlerResult, Json,
    ParamStrategy, Svc, Value, ValueMap, ValueTarget,
};
pub use di::{
    Construct, HostedService, ResolveArgs, ServiceDescriptor, ServiceKey, ServiceLifetime,
    ServiceProvider,
};
pub use dispatcher::{Binding, Dispatcher, HandlerId};
pub use error::{DispatchError, EdgeError, ResolveError, ShortCircuit};
pub use listener::{
    BrokerDelivery, BrokerListener, BrokerTransport, Frame, FrameCodec, HostedListener, Listener,
    LocalBroker, Message, MessagePayload, MessageType, Responder, ResponseReceiver,
    TcpEdgeListener,
};
pub use predicate::Predicate;
pub use ws::{SessionManager, SocketTransport, WebSocketSession, WsFrame};
