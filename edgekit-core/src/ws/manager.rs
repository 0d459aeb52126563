use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::session::{SocketTransport, WebSocketSession};
use crate::di::ServiceKey;
use crate::dispatcher::Dispatcher;

pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Registry of active WebSocket sessions, keyed by session id.
///
/// Entries are weak so a session that finishes its lifecycle disappears from
/// the registry without coordination.
pub struct SessionManager {
    sessions: DashMap<String, Weak<WebSocketSession>>,
    heartbeat: Duration,
}

impl ServiceKey for SessionManager {}

impl SessionManager {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            heartbeat,
        }
    }

    /// Drive one connection: create the session, register it, run its
    /// lifecycle to completion, then unregister. Returns the session id.
    pub async fn handle_connection(
        &self,
        dispatcher: Arc<Dispatcher>,
        transport: Arc<dyn SocketTransport>,
        cms: Option<Value>,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = WebSocketSession::new(session_id.clone(), cms, transport);
        self.sessions
            .insert(session_id.clone(), Arc::downgrade(&session));

        session.clone().run(dispatcher, self.heartbeat).await;

        self.sessions.remove(&session_id);
        session_id
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<WebSocketSession>> {
        self.sessions.get(session_id)?.value().upgrade()
    }

    pub fn get_active_sessions(&self) -> Vec<Arc<WebSocketSession>> {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Stop a session's lifecycle, close its socket, and drop the entry.
    pub async fn remove_session(&self, session_id: &str) {
        let session = self
            .sessions
            .remove(session_id)
            .and_then(|(_, weak)| weak.upgrade());
        if let Some(session) = session {
            session.stop();
            if !session.is_closed() {
                session.close().await;
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT)
    }
}
