//! Convenience re-exports for applications.
//!
//! ```ignore
//! use edgekit_core::prelude::*;
//! ```

pub use crate::config::AppConfig;
pub use crate::context::{envelope::ResponseEnvelope, Context, ContextKind};
pub use crate::di::injection::{HandlerResult, HandlerSpec, Json, Svc, Value};
pub use crate::di::{Construct, HostedService, ServiceKey, ServiceLifetime, ServiceProvider};
pub use crate::dispatcher::{Binding, Dispatcher, HandlerId};
pub use crate::error::{DispatchError, EdgeError, ShortCircuit};
pub use crate::predicate::Predicate;
pub use crate::ws::{SessionManager, WebSocketSession, WsFrame};
pub use crate::{blocking_handler, handler};

pub use std::sync::Arc;
