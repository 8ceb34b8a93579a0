//! Removes superseded jobs according to a [`RetentionPolicy`].

use std::sync::Arc;

use stemflow_core::retention::RetentionPolicy;
use stemflow_core::stage::Stage;
use stemflow_db::JobStore;
use stemflow_events::{Channel, EventBus, Subscription};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

pub struct RetentionSweeper {
    policy: RetentionPolicy,
    jobs: Arc<dyn JobStore>,
}

impl RetentionSweeper {
    pub fn new(policy: RetentionPolicy, jobs: Arc<dyn JobStore>) -> Self {
        Self { policy, jobs }
    }

    /// Subscribe to every stage's `created` channel and sweep on a
    /// background task.
    pub fn spawn(self, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let subscription = bus.subscribe_to(Stage::ALL.map(Channel::created));
        tokio::spawn(self.run(subscription, cancel))
    }

    pub async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        tracing::info!(policy = ?self.policy, "Retention sweeper started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    if let Err(e) = self.sweep(event.subject_id(), event.job.stage).await {
                        tracing::warn!(
                            subject_id = %event.job.subject_id,
                            stage = %event.job.stage,
                            error = %e,
                            "Retention sweep failed"
                        );
                    }
                }
            }
        }
        tracing::info!("Retention sweeper stopped");
    }

    /// Remove prunable jobs for (subject, stage). Returns how many were
    /// removed.
    pub async fn sweep(&self, subject_id: &str, stage: Stage) -> Result<usize, PipelineError> {
        if self.policy == RetentionPolicy::KeepAll {
            return Ok(0);
        }

        let ids = self.jobs.list_job_ids(subject_id, stage).await?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.jobs.get(id).await? {
                jobs.push(job);
            }
        }

        let mut removed = 0;
        for id in self.policy.prunable(&jobs) {
            if self.jobs.remove(id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(subject_id, %stage, removed, "Removed superseded jobs");
        }
        Ok(removed)
    }
}
