//! Generic stage worker.
//!
//! Drives one job through `queued -> processing -> completed|error` by
//! running the stage's tool, turning its output into progress updates and
//! publishing a bus event after every store write. Tool failures end in
//! the job's error state and never propagate out of [`StageWorker::run`].

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use stemflow_core::job::{Job, JobUpdate};
use stemflow_core::job_events::notification_event;
use stemflow_db::JobStore;
use stemflow_events::{Channel, EventBus};
use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::notify::{notify_best_effort, NotificationPort};
use crate::subprocess::{run_streaming, OutputLine, OutputStream};
use crate::tools::StageTool;

/// Placeholder for tool failures that wrote nothing to stderr.
const EMPTY_STDERR: &str = "no error output";

pub struct StageWorker {
    tool: Arc<dyn StageTool>,
    jobs: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    notifier: Arc<dyn NotificationPort>,
    layout: SubjectLayout,
}

impl StageWorker {
    pub fn new(
        tool: Arc<dyn StageTool>,
        jobs: Arc<dyn JobStore>,
        bus: Arc<EventBus>,
        notifier: Arc<dyn NotificationPort>,
        layout: SubjectLayout,
    ) -> Self {
        Self {
            tool,
            jobs,
            bus,
            notifier,
            layout,
        }
    }

    pub fn tool(&self) -> &dyn StageTool {
        self.tool.as_ref()
    }

    pub fn layout(&self) -> &SubjectLayout {
        &self.layout
    }

    /// Execute `job` to a terminal state and return the last stored
    /// snapshot.
    pub async fn run(&self, job: Job) -> Job {
        let stage = self.tool.stage();
        tracing::info!(job_id = %job.id, subject_id = %job.subject_id, %stage, "Job starting");

        let started = match self.start(&job).await {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(job_id = %job.id, %stage, error = %e, "Failed to start job");
                return self.fail(job, &e).await;
            }
        };

        match self.execute(started).await {
            Ok(job) => job,
            Err((job, e)) => self.fail(job, &e).await,
        }
    }

    /// `queued -> processing` plus the stage's start reservation.
    async fn start(&self, job: &Job) -> Result<Job, PipelineError> {
        let update = job.start(Utc::now(), self.tool.scale().start)?;
        let started = self.jobs.update(job.id, update).await?;
        self.bus.publish_job(Channel::updated(started.stage), &started);
        Ok(started)
    }

    /// Run the tool and finalise. On error the latest snapshot is handed
    /// back so the failure is recorded against it.
    async fn execute(&self, job: Job) -> Result<Job, (Job, PipelineError)> {
        let command = match self.tool.command(&job, &self.layout) {
            Ok(command) => command,
            Err(e) => return Err((job, e)),
        };

        let subject_dir = self.layout.subject_dir(&job.subject_id);
        if let Err(e) = tokio::fs::create_dir_all(&subject_dir).await {
            return Err((job, e.into()));
        }

        tracing::debug!(
            job_id = %job.id,
            program = %command.program,
            args = ?command.args,
            "Spawning tool"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let mut current = job;
        let (exit, ()) = tokio::join!(run_streaming(&command, tx), self.track_progress(&mut current, rx));

        let exit = match exit {
            Ok(exit) => exit,
            Err(source) => {
                let e = PipelineError::Spawn {
                    tool: self.tool.name().to_string(),
                    source,
                };
                return Err((current, e));
            }
        };

        if !exit.success() {
            let stderr = if exit.stderr_tail.is_empty() {
                EMPTY_STDERR.to_string()
            } else {
                exit.stderr_tail
            };
            let e = PipelineError::ToolFailed {
                tool: self.tool.name().to_string(),
                exit_code: exit.code.unwrap_or(-1),
                stderr,
            };
            return Err((current, e));
        }

        let finalized = match self.tool.finalize(&current, &self.layout).await {
            Ok(finalized) => finalized,
            Err(e) => return Err((current, e)),
        };

        let update = match current.complete(Utc::now(), finalized.output_ref, finalized.result) {
            Ok(update) => update,
            Err(e) => return Err((current, e.into())),
        };
        let completed = match self.jobs.update(current.id, update).await {
            Ok(job) => job,
            Err(e) => return Err((current, e.into())),
        };

        tracing::info!(
            job_id = %completed.id,
            subject_id = %completed.subject_id,
            stage = %completed.stage,
            output_ref = completed.output_ref.as_deref().unwrap_or_default(),
            "Job completed"
        );
        self.bus.publish_job(Channel::completed(completed.stage), &completed);
        notify_best_effort(
            self.notifier.as_ref(),
            &notification_event(completed.stage, "completed"),
            &json!({
                "subjectId": completed.subject_id,
                "jobId": completed.id,
                "status": completed.status,
                "progress": completed.progress,
                "outputRef": completed.output_ref,
            }),
        )
        .await;

        Ok(completed)
    }

    /// Consume tool output until the streams close, applying every
    /// progress match that raises the job's progress.
    async fn track_progress(&self, current: &mut Job, mut rx: mpsc::UnboundedReceiver<OutputLine>) {
        let parser = self.tool.parser();
        let scale = self.tool.scale();

        while let Some(line) = rx.recv().await {
            match line.stream {
                OutputStream::Stdout => tracing::trace!(job_id = %current.id, line = %line.text, "stdout"),
                OutputStream::Stderr => tracing::trace!(job_id = %current.id, line = %line.text, "stderr"),
            }

            let Some(raw) = parser.parse_progress(&line.text) else {
                continue;
            };
            let update = match current.advance(scale.map(raw)) {
                Ok(Some(update)) => update,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(job_id = %current.id, error = %e, "Ignoring progress for job");
                    continue;
                }
            };
            match self.jobs.update(current.id, update).await {
                Ok(job) => {
                    tracing::debug!(job_id = %job.id, progress = job.progress, "Job progress");
                    self.bus.publish_job(Channel::updated(job.stage), &job);
                    *current = job;
                }
                Err(e) => {
                    tracing::warn!(job_id = %current.id, error = %e, "Failed to store job progress");
                }
            }
        }
    }

    /// Move `job` to `error`, best effort. The store write may itself fail,
    /// in which case the failure is only logged.
    async fn fail(&self, job: Job, error: &PipelineError) -> Job {
        let message = error.to_string();
        tracing::error!(
            job_id = %job.id,
            subject_id = %job.subject_id,
            stage = %job.stage,
            error = %message,
            "Job failed"
        );

        let update: JobUpdate = match job.fail(Utc::now(), message.clone()) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Cannot record job failure");
                return job;
            }
        };

        let failed = match self.jobs.update(job.id, update).await {
            Ok(failed) => failed,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to store job failure");
                return job;
            }
        };

        self.bus.publish_job(Channel::error(failed.stage), &failed);
        notify_best_effort(
            self.notifier.as_ref(),
            &notification_event(failed.stage, "error"),
            &json!({
                "subjectId": failed.subject_id,
                "jobId": failed.id,
                "status": failed.status,
                "error": message,
            }),
        )
        .await;
        failed
    }
}
