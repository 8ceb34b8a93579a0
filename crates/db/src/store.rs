use async_trait::async_trait;
use stemflow_core::job::{Job, JobUpdate, NewJob};
use stemflow_core::stage::Stage;
use stemflow_core::subject::SubjectSettings;
use stemflow_core::types::JobId;

use crate::error::StoreError;

/// Keyed record of jobs with a per-(subject, stage) index.
///
/// Plain CRUD: there is no concurrency control, so concurrent updates to
/// the same job race and the last write wins.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a queued job with progress 0. Id and `created_at` are
    /// assigned here.
    async fn create(&self, new_job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Overwrite the fields listed in `update` and return the stored job.
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, StoreError>;

    /// Ids of every job for (subject, stage), oldest first.
    async fn list_job_ids(&self, subject_id: &str, stage: Stage)
        -> Result<Vec<JobId>, StoreError>;

    /// Delete a job. Returns `false` if it did not exist.
    async fn remove(&self, id: JobId) -> Result<bool, StoreError>;

    /// The current (most recently created) job for (subject, stage).
    async fn current_job(&self, subject_id: &str, stage: Stage) -> Result<Option<Job>, StoreError> {
        match self.list_job_ids(subject_id, stage).await?.last() {
            Some(id) => self.get(*id).await,
            None => Ok(None),
        }
    }
}

/// Per-subject settings that survive across jobs.
#[async_trait]
pub trait SubjectStore: Send + Sync {
    /// Settings for `subject_id`, or the defaults if none were stored.
    async fn settings(&self, subject_id: &str) -> Result<SubjectSettings, StoreError>;

    /// Replace every setting of `subject_id`.
    async fn put_settings(
        &self,
        subject_id: &str,
        settings: SubjectSettings,
    ) -> Result<(), StoreError>;

    /// Set one stage's auto-advance flag, leaving the other settings alone.
    async fn set_auto_advance(
        &self,
        subject_id: &str,
        stage: Stage,
        enabled: bool,
    ) -> Result<(), StoreError>;

    /// Set one stage's default options, leaving the other settings alone.
    async fn set_default_options(
        &self,
        subject_id: &str,
        stage: Stage,
        options: serde_json::Value,
    ) -> Result<(), StoreError>;
}
