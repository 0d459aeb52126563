//! WebSocket sessions: one long-lived receive loop per connection, a
//! heartbeat, and translation of frames into dispatchable messages.

mod manager;
mod session;

pub use manager::SessionManager;
pub use session::{SocketTransport, WebSocketSession, WsFrame};
