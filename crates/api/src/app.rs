//! Application assembly shared by the binary and the integration tests.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, StatusCode};
use axum::Router;
use stemflow_core::retention::RetentionPolicy;
use stemflow_core::stage::ChainLink;
use stemflow_db::{JobStore, SubjectStore};
use stemflow_events::EventBus;
use stemflow_pipeline::{NotificationPort, RetentionSweeper, SubjectLayout};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::relay::NotificationRelay;
use crate::routes;
use crate::stages::{StageDeps, StageRegistry, StageTools};
use crate::state::AppState;
use crate::ws::{self, WsManager};

/// Inputs for [`App::start`].
pub struct AppParts {
    pub config: ServerConfig,
    pub jobs: Arc<dyn JobStore>,
    pub subjects: Arc<dyn SubjectStore>,
    pub tools: StageTools,
    pub chain: Vec<ChainLink>,
    pub retention: RetentionPolicy,
    pub layout: SubjectLayout,
    pub default_device: String,
    /// Remote notification target. The in-process relay is used when `None`.
    pub remote_notifier: Option<Arc<dyn NotificationPort>>,
}

/// A running application: shared state plus its background tasks.
pub struct App {
    pub state: AppState,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    heartbeat: JoinHandle<()>,
}

impl App {
    /// Wire the stages and start the relay, orchestrators, retention sweeper
    /// and heartbeat. Must be called inside a Tokio runtime.
    pub fn start(parts: AppParts) -> Self {
        let ws_manager = Arc::new(WsManager::new());
        let relay = Arc::new(NotificationRelay::new(Arc::clone(&ws_manager)));
        let event_bus = Arc::new(EventBus::default());

        let notifier: Arc<dyn NotificationPort> = match parts.remote_notifier {
            Some(remote) => remote,
            None => relay.clone(),
        };

        let stages = Arc::new(StageRegistry::build(
            parts.tools,
            parts.chain,
            StageDeps {
                jobs: parts.jobs.clone(),
                subjects: parts.subjects.clone(),
                bus: event_bus.clone(),
                notifier,
                layout: parts.layout,
                default_device: parts.default_device,
            },
        ));

        let cancel = CancellationToken::new();
        let mut tasks = vec![Arc::clone(&relay).spawn(&event_bus, cancel.clone())];
        tasks.extend(stages.spawn_orchestrators(&event_bus, &cancel));
        tracing::info!(links = stages.chain().len(), "Stage orchestrators started");

        if parts.retention != RetentionPolicy::KeepAll {
            let sweeper = RetentionSweeper::new(parts.retention, parts.jobs.clone());
            tasks.push(sweeper.spawn(&event_bus, cancel.clone()));
        }

        let heartbeat = ws::start_heartbeat(Arc::clone(&ws_manager));

        let state = AppState {
            config: Arc::new(parts.config),
            jobs: parts.jobs,
            subjects: parts.subjects,
            event_bus,
            ws_manager,
            relay,
            stages,
        };

        Self {
            state,
            cancel,
            tasks,
            heartbeat,
        }
    }

    /// The full router with all middleware layers.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Stop background loops, close WebSocket connections and stop the
    /// heartbeat. Running tool processes are left alone.
    pub async fn shutdown(self) {
        let timeout = Duration::from_secs(self.state.config.shutdown_timeout_secs);

        self.cancel.cancel();
        for handle in self.tasks {
            let _ = tokio::time::timeout(timeout, handle).await;
        }
        tracing::info!("Event loops stopped");

        let ws_manager = Arc::clone(&self.state.ws_manager);
        drop(self.state);

        let ws_count = ws_manager.connection_count().await;
        tracing::info!(ws_count, "Closing remaining WebSocket connections");
        ws_manager.shutdown_all().await;

        self.heartbeat.abort();
        tracing::info!("Heartbeat task stopped");
    }
}

/// Attach the middleware stack (CORS, request id, timeout, tracing, panic
/// recovery) to the route tree.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let request_id_header = HeaderName::from_static("x-request-id");
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);

    routes::api_routes()
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

/// Panics on an unparseable origin: a bad `CORS_ORIGINS` is a startup error.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}
