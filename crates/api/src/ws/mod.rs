//! WebSocket transport for live job updates.
//!
//! Clients join `subject:<id>` groups with `subscribe:subject` frames; the
//! [`NotificationRelay`](crate::relay::NotificationRelay) fans events out to
//! those groups through [`WsManager`].

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::{start_heartbeat, HEARTBEAT_INTERVAL};
pub use manager::WsManager;
