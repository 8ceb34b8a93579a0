//! Stage service: accepts work for one stage and hands it to the worker.

use std::sync::Arc;

use serde_json::Value;
use stemflow_core::error::CoreError;
use stemflow_core::job::{Job, JobStatus, NewJob};
use stemflow_core::options::normalize;
use stemflow_core::stage::Stage;
use stemflow_core::subject::validate_subject_id;
use stemflow_core::types::JobId;
use stemflow_db::{JobStore, SubjectStore};
use stemflow_events::{Channel, EventBus};
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::worker::StageWorker;

/// A request to run the stage for a subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitRequest {
    pub subject_id: String,
    /// Input location. When absent, the output of the subject's latest
    /// completed predecessor job is used.
    pub source_ref: Option<String>,
    /// Stage options. When present they also become the subject's
    /// defaults for this stage.
    pub options: Option<Value>,
}

/// A created job and the task executing it.
#[derive(Debug)]
pub struct Submitted {
    pub job: Job,
    pub handle: JoinHandle<Job>,
}

pub struct StageService {
    stage: Stage,
    predecessor: Option<Stage>,
    worker: Arc<StageWorker>,
    jobs: Arc<dyn JobStore>,
    subjects: Arc<dyn SubjectStore>,
    bus: Arc<EventBus>,
    default_device: String,
}

impl StageService {
    pub fn new(
        worker: Arc<StageWorker>,
        jobs: Arc<dyn JobStore>,
        subjects: Arc<dyn SubjectStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            stage: worker.tool().stage(),
            predecessor: None,
            worker,
            jobs,
            subjects,
            bus,
            default_device: "cpu".to_string(),
        }
    }

    /// Stage whose output feeds this one when no `source_ref` is given.
    pub fn with_predecessor(mut self, predecessor: Option<Stage>) -> Self {
        self.predecessor = predecessor;
        self
    }

    /// Device used for separation jobs that do not name one.
    pub fn with_default_device(mut self, device: impl Into<String>) -> Self {
        self.default_device = device.into();
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Check that `raw` would be accepted as options for this stage.
    pub fn check_options(&self, raw: &Value) -> Result<(), PipelineError> {
        normalize(self.stage, Some(raw), &self.default_device)?;
        Ok(())
    }

    /// Validate, create the job, publish `created`, and start the worker.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submitted, PipelineError> {
        validate_subject_id(&request.subject_id)?;
        let subject_id = request.subject_id;

        let input_ref = match request.source_ref.filter(|s| !s.trim().is_empty()) {
            Some(source) => source,
            None => self.predecessor_output(&subject_id).await?,
        };

        let options = match &request.options {
            Some(raw) => {
                let normalized = normalize(self.stage, Some(raw), &self.default_device)?;
                self.subjects
                    .set_default_options(&subject_id, self.stage, normalized.options.clone())
                    .await?;
                if let Some(flag) = normalized.auto_advance {
                    self.subjects
                        .set_auto_advance(&subject_id, self.stage, flag)
                        .await?;
                }
                normalized.options
            }
            None => {
                let settings = self.subjects.settings(&subject_id).await?;
                let stored = settings.default_options_for(self.stage);
                normalize(self.stage, stored, &self.default_device)?.options
            }
        };

        let job = self
            .jobs
            .create(NewJob {
                subject_id,
                stage: self.stage,
                options,
                input_ref,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            subject_id = %job.subject_id,
            stage = %self.stage,
            input_ref = %job.input_ref,
            "Job created"
        );
        self.bus.publish_job(Channel::created(self.stage), &job);

        let worker = Arc::clone(&self.worker);
        let queued = job.clone();
        let handle = tokio::spawn(async move { worker.run(queued).await });

        Ok(Submitted { job, handle })
    }

    /// Most recently created job for the subject at this stage.
    pub async fn current_job(&self, subject_id: &str) -> Result<Option<Job>, PipelineError> {
        Ok(self.jobs.current_job(subject_id, self.stage).await?)
    }

    /// A job of this stage by id. Jobs of other stages read as absent.
    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, PipelineError> {
        Ok(self
            .jobs
            .get(id)
            .await?
            .filter(|job| job.stage == self.stage))
    }

    /// Output of the subject's latest completed predecessor job.
    async fn predecessor_output(&self, subject_id: &str) -> Result<String, PipelineError> {
        let missing = || {
            PipelineError::Core(CoreError::Validation(
                "sourceRef is required when no completed upstream job exists".to_string(),
            ))
        };
        let Some(predecessor) = self.predecessor else {
            return Err(missing());
        };

        let ids = self.jobs.list_job_ids(subject_id, predecessor).await?;
        for id in ids.into_iter().rev() {
            let Some(job) = self.jobs.get(id).await? else {
                continue;
            };
            if job.status == JobStatus::Completed {
                if let Some(output_ref) = job.output_ref {
                    return Ok(output_ref);
                }
            }
        }
        Err(missing())
    }
}
