//! Auto-advance between stages.
//!
//! One [`StageOrchestrator`] per chain link listens for the predecessor's
//! `completed` events and, when the subject has auto-advance enabled for
//! the successor, submits a successor job fed by the predecessor's output.
//! There is no retry: if the submit fails the chain for that subject stops.

use std::sync::Arc;

use serde_json::json;
use stemflow_core::job::{Job, JobStatus};
use stemflow_core::job_events::notification_event;
use stemflow_core::stage::ChainLink;
use stemflow_db::SubjectStore;
use stemflow_events::{Channel, EventBus, JobEvent, Subscription};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::notify::{notify_best_effort, NotificationPort};
use crate::service::{StageService, SubmitRequest};

pub struct StageOrchestrator {
    link: ChainLink,
    successor: Arc<StageService>,
    subjects: Arc<dyn SubjectStore>,
    notifier: Arc<dyn NotificationPort>,
}

impl StageOrchestrator {
    /// `successor` must be the service for `link.successor`.
    pub fn new(
        link: ChainLink,
        successor: Arc<StageService>,
        subjects: Arc<dyn SubjectStore>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        debug_assert_eq!(link.successor, successor.stage());
        Self {
            link,
            successor,
            subjects,
            notifier,
        }
    }

    /// Subscribe now and process events on a background task.
    ///
    /// Subscribing before spawning means no completion published after
    /// this call returns can be missed.
    pub fn spawn(self, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let subscription = bus.subscribe_to([Channel::completed(self.link.predecessor)]);
        tokio::spawn(self.run(subscription, cancel))
    }

    /// Process events until the bus closes or `cancel` fires.
    pub async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        tracing::info!(link = %self.link, "Stage orchestrator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    match self.handle(&event).await {
                        Ok(Some(job)) => tracing::info!(
                            link = %self.link,
                            subject_id = %job.subject_id,
                            job_id = %job.id,
                            "Auto-advanced subject"
                        ),
                        Ok(None) => {}
                        Err(e) => tracing::warn!(
                            link = %self.link,
                            subject_id = %event.job.subject_id,
                            error = %e,
                            "Auto-advance failed"
                        ),
                    }
                }
            }
        }
        tracing::info!(link = %self.link, "Stage orchestrator stopped");
    }

    /// React to one predecessor event. Returns the started successor job,
    /// if any.
    pub async fn handle(&self, event: &JobEvent) -> Result<Option<Job>, PipelineError> {
        let job = &event.job;
        if job.stage != self.link.predecessor || job.status != JobStatus::Completed {
            return Ok(None);
        }
        let Some(output_ref) = job.output_ref.clone() else {
            tracing::debug!(job_id = %job.id, "Completed job has no output, not advancing");
            return Ok(None);
        };

        let settings = self.subjects.settings(&job.subject_id).await?;
        if !settings.is_auto_advance(self.link.successor) {
            tracing::debug!(
                subject_id = %job.subject_id,
                successor = %self.link.successor,
                "Auto-advance disabled"
            );
            return Ok(None);
        }

        let submitted = self
            .successor
            .submit(SubmitRequest {
                subject_id: job.subject_id.clone(),
                source_ref: Some(output_ref),
                options: None,
            })
            .await?;
        let started = submitted.job;

        notify_best_effort(
            self.notifier.as_ref(),
            &notification_event(self.link.successor, "started"),
            &json!({
                "subjectId": started.subject_id,
                "jobId": started.id,
                "status": started.status,
                "message": format!(
                    "{} started automatically after {} completed",
                    self.link.successor, self.link.predecessor
                ),
            }),
        )
        .await;

        Ok(Some(started))
    }
}
