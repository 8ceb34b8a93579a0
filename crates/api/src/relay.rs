//! Bus-to-client notification relay.
//!
//! [`NotificationRelay`] subscribes to every `<stage>:job:<kind>` channel
//! and re-emits each event to the live connections in the job's
//! `subject:<id>` group. It also accepts direct notifications, either
//! in-process through [`NotificationPort`] or over `POST /notify`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message;
use serde_json::{json, Value};
use stemflow_core::job_events::subject_group;
use stemflow_events::{Channel, EventBus, JobEvent, Subscription};
use stemflow_pipeline::{Delivery, NotificationPort, NotifyError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ws::WsManager;

pub struct NotificationRelay {
    ws_manager: Arc<WsManager>,
}

impl NotificationRelay {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Subscribe to every job channel now and relay on a background task.
    pub fn spawn(self: Arc<Self>, bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
        let subscription = bus.subscribe_to(Channel::all());
        tokio::spawn(async move { self.run(subscription, cancel).await })
    }

    /// Relay events until the bus closes or `cancel` fires.
    pub async fn run(&self, mut subscription: Subscription, cancel: CancellationToken) {
        tracing::info!("Notification relay started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => {
                    let Some(event) = event else { break };
                    self.forward(&event).await;
                }
            }
        }
        tracing::info!("Notification relay stopped");
    }

    /// Send one bus event to its subject group. Returns the recipient count.
    pub async fn forward(&self, event: &JobEvent) -> usize {
        let data = match serde_json::to_value(&event.job) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(job_id = %event.job.id, error = %e, "Unserializable job event");
                return 0;
            }
        };
        let recipients = self
            .send(event.subject_id(), &event.channel.to_string(), data)
            .await;
        tracing::debug!(
            channel = %event.channel,
            subject_id = %event.subject_id(),
            recipients,
            "Relayed job event"
        );
        recipients
    }

    /// Deliver a direct notification. `data.subjectId` selects the group.
    pub async fn notify(&self, event: &str, data: &Value) -> Result<Delivery, NotifyError> {
        let subject_id = data
            .get("subjectId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NotifyError::Rejected("data.subjectId is required".to_string()))?;

        let recipients = self.send(subject_id, event, data.clone()).await;
        tracing::debug!(event, subject_id, recipients, "Relayed notification");
        if recipients == 0 {
            return Ok(Delivery::Skipped);
        }
        Ok(Delivery::Delivered { recipients })
    }

    async fn send(&self, subject_id: &str, event: &str, data: Value) -> usize {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.ws_manager
            .send_to_group(&subject_group(subject_id), Message::Text(frame.into()))
            .await
    }
}

#[async_trait]
impl NotificationPort for NotificationRelay {
    async fn notify(&self, event: &str, data: &Value) -> Result<Delivery, NotifyError> {
        NotificationRelay::notify(self, event, data).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use stemflow_core::job::NewJob;
    use stemflow_core::stage::Stage;

    use super::*;

    fn text(message: Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn job_event(subject_id: &str) -> JobEvent {
        let job = NewJob {
            subject_id: subject_id.to_string(),
            stage: Stage::Download,
            options: json!({}),
            input_ref: "https://example.com/track".to_string(),
        }
        .into_job(uuid::Uuid::new_v4(), Utc::now());
        JobEvent::new(Channel::created(Stage::Download), job)
    }

    #[tokio::test]
    async fn events_reach_only_the_subject_group() {
        let manager = Arc::new(WsManager::new());
        let mut t1 = manager.add("a".into()).await;
        let mut t2 = manager.add("b".into()).await;
        manager.join("a", "subject:t1").await;
        manager.join("b", "subject:t2").await;

        let relay = NotificationRelay::new(manager.clone());
        assert_eq!(relay.forward(&job_event("t1")).await, 1);

        let frame = text(t1.try_recv().unwrap());
        assert_eq!(frame["event"], "download:job:created");
        assert_eq!(frame["data"]["subjectId"], "t1");
        assert!(t2.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_requires_subject_id() {
        let relay = NotificationRelay::new(Arc::new(WsManager::new()));
        let result = relay.notify("separate:started", &json!({"jobId": "x"})).await;
        assert_matches!(result, Err(NotifyError::Rejected(_)));
    }

    #[tokio::test]
    async fn notify_reports_recipients() {
        let manager = Arc::new(WsManager::new());
        let mut rx = manager.add("a".into()).await;
        let relay = NotificationRelay::new(manager.clone());

        let data = json!({"subjectId": "t1", "status": "queued"});
        assert_eq!(relay.notify("separate:started", &data).await.unwrap(), Delivery::Skipped);

        manager.join("a", "subject:t1").await;
        assert_eq!(
            relay.notify("separate:started", &data).await.unwrap(),
            Delivery::Delivered { recipients: 1 }
        );
        let frame = text(rx.try_recv().unwrap());
        assert_eq!(frame["event"], "separate:started");
        assert_eq!(frame["data"]["status"], "queued");
    }
}
