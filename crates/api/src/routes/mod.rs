pub mod health;
pub mod notify;
pub mod stage;
pub mod subjects;

use axum::routing::get;
use axum::Router;
use stemflow_core::stage::Stage;

use crate::state::AppState;
use crate::ws;

/// Build the full route tree.
///
/// ```text
/// /health                          liveness
/// /ws                              WebSocket (subject subscriptions)
/// /notify                          direct notification (POST)
///
/// /download                        submit (POST)
/// /download/job/{id}               job by id
/// /download/subject/{id}           current job for a subject
/// /separate/...                    same as /download
/// /analyze/...                     same as /download
///
/// /subjects/{id}/settings          get, replace
/// ```
pub fn api_routes() -> Router<AppState> {
    let mut router = Router::new()
        .merge(health::router())
        .merge(notify::router())
        .merge(subjects::router())
        .route("/ws", get(ws::ws_handler));

    for stage in Stage::ALL {
        router = router.nest(stage.root(), stage::router(stage));
    }
    router
}
