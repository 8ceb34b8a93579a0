//! Per-stage job surface, mounted once per stage root.
//!
//! ```text
//! POST   /                 submit a job         -> 202 {jobId, subjectId, status}
//! GET    /job/{id}         job by id
//! GET    /subject/{id}     current job for the subject, with artifacts
//! ```

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stemflow_core::artifacts::OutputArtifact;
use stemflow_core::error::CoreError;
use stemflow_core::job::{Job, JobStatus};
use stemflow_core::stage::Stage;
use stemflow_core::subject::validate_subject_id;
use stemflow_core::types::JobId;
use stemflow_pipeline::layout::list_artifacts;
use stemflow_pipeline::{PipelineError, SubmitRequest};

use crate::error::AppResult;
use crate::state::AppState;

/// Reported in place of a completed job whose output has disappeared.
const OUTPUT_NOT_FOUND: &str = "Output not found";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    #[serde(default)]
    pub subject_id: String,
    pub source_ref: Option<String>,
    pub options: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub subject_id: String,
    pub status: JobStatus,
}

/// A job plus what its output looks like on disk.
#[derive(Debug, Serialize)]
pub struct SubjectJob {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<OutputArtifact>>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /<stage>
///
/// Creates the job and starts its worker; returns before the tool runs.
async fn submit_job(
    State(state): State<AppState>,
    Extension(stage): Extension<Stage>,
    Json(body): Json<SubmitBody>,
) -> AppResult<impl IntoResponse> {
    let service = state.stages.service(stage)?;
    let submitted = service
        .submit(SubmitRequest {
            subject_id: body.subject_id,
            source_ref: body.source_ref,
            options: body.options,
        })
        .await?;

    let job = submitted.job;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            subject_id: job.subject_id,
            status: job.status,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /<stage>/job/{id}
async fn get_job(
    State(state): State<AppState>,
    Extension(stage): Extension<Stage>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<Job>> {
    let not_found = || CoreError::NotFound {
        entity: "Job",
        id: raw_id.clone(),
    };
    let id = JobId::parse_str(&raw_id).map_err(|_| not_found())?;
    let job = state
        .stages
        .service(stage)?
        .get_job(id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(job))
}

/// GET /<stage>/subject/{id}
///
/// Completed jobs are enriched with their artifacts. If the output is gone
/// the response reports an error without touching the stored job.
async fn get_subject_job(
    State(state): State<AppState>,
    Extension(stage): Extension<Stage>,
    Path(subject_id): Path<String>,
) -> AppResult<Json<SubjectJob>> {
    validate_subject_id(&subject_id)?;
    let job = state
        .stages
        .service(stage)?
        .current_job(&subject_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Subject job",
            id: subject_id.clone(),
        })?;

    Ok(Json(with_artifacts(job).await?))
}

async fn with_artifacts(mut job: Job) -> Result<SubjectJob, PipelineError> {
    let output_ref = match (&job.status, &job.output_ref) {
        (JobStatus::Completed, Some(output_ref)) => output_ref.clone(),
        _ => return Ok(SubjectJob { job, artifacts: None }),
    };

    match list_artifacts(&output_ref).await? {
        Some(artifacts) => Ok(SubjectJob {
            job,
            artifacts: Some(artifacts),
        }),
        None => {
            tracing::warn!(job_id = %job.id, output_ref = %output_ref, "Job output missing");
            job.status = JobStatus::Error;
            job.error = Some(OUTPUT_NOT_FOUND.to_string());
            Ok(SubjectJob { job, artifacts: None })
        }
    }
}

pub fn router(stage: Stage) -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/job/{id}", get(get_job))
        .route("/subject/{id}", get(get_subject_job))
        .layer(Extension(stage))
}
