use std::sync::Arc;
use std::time::Duration;

use crate::ws::manager::WsManager;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn a background task that pings every connected client.
///
/// The task never ends on its own; shutdown aborts the returned handle.
pub fn start_heartbeat(ws_manager: Arc<WsManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        // The first tick completes immediately; skip it.
        interval.tick().await;

        loop {
            interval.tick().await;
            let count = ws_manager.connection_count().await;
            if count > 0 {
                tracing::debug!(count, "WebSocket heartbeat ping");
                ws_manager.ping_all().await;
            }
        }
    })
}
