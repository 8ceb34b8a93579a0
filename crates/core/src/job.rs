//! The Job record and its state machine.
//!
//! ```text
//! queued --start--> processing --progress--> processing
//! processing --finish_ok--> completed (terminal)
//! processing --finish_err--> error (terminal)
//! queued --finish_err--> error (terminal)
//! ```
//!
//! The store applies [`JobUpdate`]s blindly (last write wins). The
//! transition helpers on [`Job`] are what keep a worker from ever writing
//! an illegal transition.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::stage::Stage;
use crate::types::{JobId, Timestamp};

/// Progress value reserved for completed jobs.
pub const PROGRESS_COMPLETE: u8 = 100;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Execution status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// Completed and errored jobs never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// `processing -> processing` is allowed and models a progress tick.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Error)
                | (Queued, Error)
        )
    }

    fn check_transition(self, next: JobStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(CoreError::Validation(format!("Unknown job status: '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One execution attempt of one stage for one subject.
///
/// This is also the wire shape published on the bus and returned by the
/// HTTP surface, hence the camelCase field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub subject_id: String,
    pub stage: Stage,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub options: serde_json::Value,
    pub error: Option<String>,
    /// Structured stage output (the analysis document for `analyze`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Input for creating a job. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub subject_id: String,
    pub stage: Stage,
    pub options: serde_json::Value,
    pub input_ref: String,
}

impl NewJob {
    /// Materialise the queued job record with store-assigned identity.
    pub fn into_job(self, id: JobId, created_at: Timestamp) -> Job {
        Job {
            id,
            subject_id: self.subject_id,
            stage: self.stage,
            status: JobStatus::Queued,
            progress: 0,
            created_at,
            started_at: None,
            completed_at: None,
            input_ref: self.input_ref,
            output_ref: None,
            options: self.options,
            error: None,
            result: None,
        }
    }
}

/// A partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub output_ref: Option<String>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl JobUpdate {
    /// Overwrite the listed fields on `job`.
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(at) = self.started_at {
            job.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            job.completed_at = Some(at);
        }
        if let Some(output_ref) = &self.output_ref {
            job.output_ref = Some(output_ref.clone());
        }
        if let Some(error) = &self.error {
            job.error = Some(error.clone());
        }
        if let Some(result) = &self.result {
            job.result = Some(result.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == JobUpdate::default()
    }
}

impl Job {
    /// `queued -> processing`, stamping `started_at` and the stage's
    /// start-up progress reservation.
    pub fn start(&self, now: Timestamp, initial_progress: u8) -> Result<JobUpdate, CoreError> {
        if self.status != JobStatus::Queued {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        Ok(JobUpdate {
            status: Some(JobStatus::Processing),
            progress: Some(initial_progress.min(PROGRESS_COMPLETE - 1)),
            started_at: Some(now),
            ..Default::default()
        })
    }

    /// A progress tick while processing.
    ///
    /// Returns `Ok(None)` when `progress` would not raise the current value,
    /// which keeps observed progress non-decreasing even if the tool reports
    /// out of order. Values are capped below 100.
    pub fn advance(&self, progress: u8) -> Result<Option<JobUpdate>, CoreError> {
        if self.status != JobStatus::Processing {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        let progress = progress.min(PROGRESS_COMPLETE - 1);
        if progress <= self.progress {
            return Ok(None);
        }
        Ok(Some(JobUpdate {
            progress: Some(progress),
            ..Default::default()
        }))
    }

    /// `processing -> completed`.
    pub fn complete(
        &self,
        now: Timestamp,
        output_ref: String,
        result: Option<serde_json::Value>,
    ) -> Result<JobUpdate, CoreError> {
        self.status.check_transition(JobStatus::Completed)?;
        Ok(JobUpdate {
            status: Some(JobStatus::Completed),
            progress: Some(PROGRESS_COMPLETE),
            completed_at: Some(now),
            output_ref: Some(output_ref),
            result,
            ..Default::default()
        })
    }

    /// `queued|processing -> error`. Progress is left where it was.
    pub fn fail(&self, now: Timestamp, message: impl Into<String>) -> Result<JobUpdate, CoreError> {
        self.status.check_transition(JobStatus::Error)?;
        Ok(JobUpdate {
            status: Some(JobStatus::Error),
            completed_at: Some(now),
            error: Some(message.into()),
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn queued_job() -> Job {
        NewJob {
            subject_id: "t1".to_string(),
            stage: Stage::Download,
            options: serde_json::json!({"format": "mp3"}),
            input_ref: "https://open.spotify.com/track/t1".to_string(),
        }
        .into_job(uuid::Uuid::new_v4(), Utc::now())
    }

    fn apply(mut job: Job, update: JobUpdate) -> Job {
        update.apply_to(&mut job);
        job
    }

    #[test]
    fn new_job_is_queued_with_zero_progress() {
        let job = queued_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
        assert!(job.output_ref.is_none());
    }

    #[test]
    fn start_moves_to_processing() {
        let job = queued_job();
        let job = apply(job.clone(), job.start(Utc::now(), 10).unwrap());
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 10);
        assert!(job.started_at.is_some());
    }

    #[test]
    fn start_twice_is_rejected() {
        let job = queued_job();
        let job = apply(job.clone(), job.start(Utc::now(), 10).unwrap());
        assert_matches!(
            job.start(Utc::now(), 10),
            Err(CoreError::InvalidTransition {
                from: JobStatus::Processing,
                ..
            })
        );
    }

    #[test]
    fn advance_ignores_regressions() {
        let job = queued_job();
        let job = apply(job.clone(), job.start(Utc::now(), 10).unwrap());
        let job = apply(job.clone(), job.advance(50).unwrap().unwrap());
        assert_eq!(job.progress, 50);
        assert!(job.advance(40).unwrap().is_none());
        assert!(job.advance(50).unwrap().is_none());
    }

    #[test]
    fn advance_never_reaches_complete() {
        let job = queued_job();
        let job = apply(job.clone(), job.start(Utc::now(), 10).unwrap());
        let update = job.advance(100).unwrap().unwrap();
        assert_eq!(update.progress, Some(99));
    }

    #[test]
    fn advance_on_queued_job_is_rejected() {
        let job = queued_job();
        assert_matches!(job.advance(20), Err(CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn complete_sets_full_progress_and_output() {
        let job = queued_job();
        let job = apply(job.clone(), job.start(Utc::now(), 10).unwrap());
        let job = apply(
            job.clone(),
            job.complete(Utc::now(), "/data/t1/original.mp3".into(), None)
                .unwrap(),
        );
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, PROGRESS_COMPLETE);
        assert_eq!(job.output_ref.as_deref(), Some("/data/t1/original.mp3"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn queued_job_can_fail_directly() {
        let job = queued_job();
        let job = apply(job.clone(), job.fail(Utc::now(), "store down").unwrap());
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("store down"));
    }

    #[test]
    fn fail_keeps_progress() {
        let job = queued_job();
        let job = apply(job.clone(), job.start(Utc::now(), 10).unwrap());
        let job = apply(job.clone(), job.advance(42).unwrap().unwrap());
        let update = job.fail(Utc::now(), "boom").unwrap();
        assert!(update.progress.is_none());
        let job = apply(job, update);
        assert_eq!(job.progress, 42);
    }

    #[test]
    fn terminal_jobs_reject_every_transition() {
        let job = queued_job();
        let job = apply(job.clone(), job.fail(Utc::now(), "boom").unwrap());
        assert!(job.start(Utc::now(), 5).is_err());
        assert!(job.advance(60).is_err());
        assert!(job.complete(Utc::now(), "x".into(), None).is_err());
        assert!(job.fail(Utc::now(), "again").is_err());
    }

    #[test]
    fn queued_cannot_complete() {
        let job = queued_job();
        assert_matches!(
            job.complete(Utc::now(), "x".into(), None),
            Err(CoreError::InvalidTransition {
                from: JobStatus::Queued,
                to: JobStatus::Completed,
            })
        );
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let job = queued_job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["subjectId"], "t1");
        assert_eq!(json["stage"], "download");
        assert_eq!(json["status"], "queued");
        assert!(json["createdAt"].is_string());
        assert!(json["startedAt"].is_null());
        assert!(json["outputRef"].is_null());
        assert!(json.get("result").is_none());
    }

    #[test]
    fn empty_update_changes_nothing() {
        let job = queued_job();
        let update = JobUpdate::default();
        assert!(update.is_empty());
        assert_eq!(apply(job.clone(), update), job);
    }
}
