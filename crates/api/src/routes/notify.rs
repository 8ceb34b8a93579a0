//! `POST /notify`: direct notifications from other processes.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use stemflow_pipeline::NotifyError;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotifyBody {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// POST /notify
///
/// Relays `{event, data}` to the `subject:<data.subjectId>` group.
/// Returns 400 when `data.subjectId` is missing.
async fn notify(
    State(state): State<AppState>,
    Json(body): Json<NotifyBody>,
) -> AppResult<Json<Value>> {
    match state.relay.notify(&body.event, &body.data).await {
        Ok(_) => Ok(Json(json!({ "success": true }))),
        Err(NotifyError::Rejected(msg)) => Err(AppError::BadRequest(msg)),
        Err(e) => Err(AppError::BadRequest(e.to_string())),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/notify", post(notify))
}
