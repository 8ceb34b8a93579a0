//! Subject settings: per-stage auto-advance flags and default options.
//!
//! ```text
//! GET    /subjects/{id}/settings   current settings (defaults if never set)
//! PUT    /subjects/{id}/settings   replace settings
//! ```

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use stemflow_core::subject::{validate_subject_id, SubjectSettings};

use crate::error::AppResult;
use crate::state::AppState;

async fn get_settings(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> AppResult<Json<SubjectSettings>> {
    validate_subject_id(&subject_id)?;
    Ok(Json(state.subjects.settings(&subject_id).await?))
}

async fn put_settings(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
    Json(settings): Json<SubjectSettings>,
) -> AppResult<Json<SubjectSettings>> {
    validate_subject_id(&subject_id)?;
    for (stage, options) in &settings.default_options {
        state.stages.service(*stage)?.check_options(options)?;
    }
    state
        .subjects
        .put_settings(&subject_id, settings.clone())
        .await?;
    tracing::info!(subject_id = %subject_id, "Subject settings replaced");
    Ok(Json(settings))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/subjects/{id}/settings",
        get(get_settings).put(put_settings),
    )
}
