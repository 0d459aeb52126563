//! Context factory: maps an inbound message to a typed context via the
//! configurable router, and logs each request at the dispatch boundary.

use std::sync::{Arc, RwLock};

use regex::Regex;
use serde_json::Value;

use super::{envelope::keys, Context, ContextKind, Payload};
use crate::config::RouterSetting;
use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, EdgeError};
use crate::listener::{Message, MessagePayload, MessageType};
use crate::path::lookup_key;

enum Pattern {
    Wildcard,
    Regex(Regex),
}

/// Explicit router configuration: a fixed tag, or an ordered pattern table
/// with an optional default.
enum RouterConfig {
    Fixed(String),
    Table {
        patterns: Vec<(Pattern, String)>,
        default: Option<String>,
    },
}

pub struct ContextFactory {
    explicit: Option<RouterConfig>,
    /// Default tag derived from registered handlers when no explicit router
    /// is configured. Rebuilt on every handler (un)registration.
    auto_default: RwLock<String>,
}

impl ContextFactory {
    /// Build from the `router` / `defaultRouter` configuration keys.
    ///
    /// With neither key present the factory runs in auto mode, deriving the
    /// tag from registered handlers. An explicit but unusable configuration
    /// (an empty pattern table and no default) is a startup error.
    pub fn from_config(
        router: Option<&RouterSetting>,
        default_router: Option<&str>,
    ) -> Result<Self, EdgeError> {
        let explicit = match (router, default_router) {
            (Some(RouterSetting::Fixed(tag)), _) => Some(RouterConfig::Fixed(tag.clone())),
            (Some(RouterSetting::Table(table)), default) => {
                let mut patterns = Vec::new();
                let mut wildcard: Option<String> = None;
                for (tag, values) in table {
                    let tag = tag.trim();
                    if values.iter().any(|v| v == "*") {
                        wildcard.get_or_insert_with(|| tag.to_string());
                        continue;
                    }
                    for value in values {
                        let value = value.trim();
                        if value.is_empty() {
                            continue;
                        }
                        let regex = Regex::new(value).map_err(|err| {
                            EdgeError::Config(format!("invalid router pattern '{value}': {err}"))
                        })?;
                        patterns.push((Pattern::Regex(regex), tag.to_string()));
                    }
                }
                if let Some(tag) = wildcard {
                    patterns.push((Pattern::Wildcard, tag));
                }
                let default = default.map(str::to_string);
                if patterns.is_empty() && default.is_none() {
                    return Err(EdgeError::Config(
                        "invalid routing config: set at least one of 'router' or 'defaultRouter'"
                            .to_string(),
                    ));
                }
                Some(RouterConfig::Table { patterns, default })
            }
            (None, Some(default)) => Some(RouterConfig::Fixed(default.to_string())),
            (None, None) => None,
        };
        Ok(Self {
            explicit,
            auto_default: RwLock::new(ContextKind::Restful.tag().to_string()),
        })
    }

    /// Auto-mode factory with no explicit configuration.
    pub fn auto() -> Self {
        Self {
            explicit: None,
            auto_default: RwLock::new(ContextKind::Restful.tag().to_string()),
        }
    }

    pub fn is_auto(&self) -> bool {
        self.explicit.is_none()
    }

    /// Refresh the auto-detected default from the set of context types that
    /// currently have handlers. No-op under an explicit configuration.
    pub(crate) fn rebuild_auto(&self, kinds: &[ContextKind]) {
        if self.explicit.is_some() {
            return;
        }
        let preferred = [ContextKind::Restful, ContextKind::Web]
            .into_iter()
            .find(|kind| kinds.contains(kind))
            .unwrap_or(ContextKind::Restful);
        *self.auto_default.write().unwrap() = preferred.tag().to_string();
    }

    /// The context-type tag for a URL under the active configuration.
    pub fn detect(&self, url: Option<&str>) -> Option<String> {
        match &self.explicit {
            Some(RouterConfig::Fixed(tag)) => Some(tag.clone()),
            Some(RouterConfig::Table { patterns, default }) => {
                if let Some(url) = url {
                    for (pattern, tag) in patterns {
                        let matched = match pattern {
                            Pattern::Wildcard => true,
                            Pattern::Regex(regex) => regex.is_match(url),
                        };
                        if matched {
                            return Some(tag.clone());
                        }
                    }
                }
                default.clone()
            }
            None => Some(self.auto_default.read().unwrap().clone()),
        }
    }

    /// Map a message to a typed context with a fresh per-request DI scope.
    pub fn create_context(
        &self,
        dispatcher: &Arc<Dispatcher>,
        message: Message,
    ) -> Result<Arc<Context>, DispatchError> {
        let message_type = message.message_type;
        match message.payload {
            MessagePayload::Http(document) => {
                let cms = document
                    .get(keys::CMS)
                    .cloned()
                    .ok_or_else(|| DispatchError::Internal("cms key not found in message".into()))?;
                let request = lookup_key(&cms, keys::REQUEST)
                    .ok_or_else(|| DispatchError::Internal("request key not found in cms object".into()))?;
                let full_url = lookup_key(request, keys::FULL_URL)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DispatchError::Internal("full-url key not found in request".into())
                    })?
                    .to_string();
                let url = lookup_key(request, keys::URL)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let request_id = lookup_key(request, keys::REQUEST_ID)
                    .and_then(Value::as_str)
                    .unwrap_or("none")
                    .to_string();
                let method = lookup_key(request, keys::METHOD)
                    .and_then(Value::as_str)
                    .unwrap_or("none")
                    .to_string();

                let tag = if message_type == MessageType::AdHoc {
                    self.detect(Some(&full_url))
                } else {
                    Some("endpoint".to_string())
                }
                .ok_or_else(|| DispatchError::ContextType {
                    url: Some(full_url.clone()),
                    tag: None,
                })?;

                let kind = match ContextKind::from_tag(&tag) {
                    Some(kind @ (ContextKind::Restful | ContextKind::Web)) => kind,
                    _ => {
                        return Err(DispatchError::ContextType {
                            url: Some(full_url),
                            tag: Some(tag),
                        })
                    }
                };

                tracing::info!(
                    context_type = %tag,
                    message_type = ?message_type,
                    request_id = %request_id,
                    method = %method,
                    url = %full_url,
                    "request"
                );

                Ok(Context::new(
                    dispatcher,
                    kind,
                    message_type,
                    url,
                    Payload::Http { cms },
                ))
            }
            MessagePayload::WebSocket { frame, session } => {
                tracing::info!(
                    context_type = ContextKind::WebSocket.tag(),
                    message_type = ?message_type,
                    session_id = %session.id(),
                    "request"
                );
                let url = session.url().map(str::to_string);
                Ok(Context::new(
                    dispatcher,
                    ContextKind::WebSocket,
                    message_type,
                    url,
                    Payload::WebSocket { frame, session },
                ))
            }
            MessagePayload::Raw(body) => {
                tracing::info!(
                    context_type = ContextKind::Tcp.tag(),
                    message_type = ?message_type,
                    session_id = %message.session_id,
                    "request"
                );
                Ok(Context::new(
                    dispatcher,
                    ContextKind::Tcp,
                    message_type,
                    None,
                    Payload::Tcp {
                        session_id: message.session_id,
                        body,
                    },
                ))
            }
            MessagePayload::Broker(delivery) => {
                tracing::info!(
                    context_type = ContextKind::Broker.tag(),
                    message_type = ?message_type,
                    queue = %delivery.queue,
                    "request"
                );
                let url = Some(delivery.host.clone());
                Ok(Context::new(
                    dispatcher,
                    ContextKind::Broker,
                    message_type,
                    url,
                    Payload::Broker(delivery),
                ))
            }
        }
    }
}
