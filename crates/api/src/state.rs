use std::sync::Arc;

use stemflow_db::{JobStore, SubjectStore};
use stemflow_events::EventBus;

use crate::config::ServerConfig;
use crate::relay::NotificationRelay;
use crate::stages::StageRegistry;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub subjects: Arc<dyn SubjectStore>,
    pub event_bus: Arc<EventBus>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    pub relay: Arc<NotificationRelay>,
    pub stages: Arc<StageRegistry>,
}
