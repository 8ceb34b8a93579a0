//! Direct, best-effort notifications from stage components to live clients.
//!
//! Callers send through a [`NotificationPort`] and explicitly ignore the
//! outcome; a failed delivery never affects a job.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

/// HTTP request timeout for a single remote notification.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to this many live connections.
    Delivered { recipients: usize },
    /// Handed to a remote relay.
    Accepted,
    /// Nothing to deliver to.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The payload was refused (e.g. no `subjectId`).
    #[error("Notification rejected: {0}")]
    Rejected(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Relay returned HTTP {0}")]
    HttpStatus(u16),
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// `data` must carry a `subjectId`.
    async fn notify(&self, event: &str, data: &Value) -> Result<Delivery, NotifyError>;
}

/// Send and log the outcome. Delivery failures are never propagated.
pub async fn notify_best_effort(port: &dyn NotificationPort, event: &str, data: &Value) {
    match port.notify(event, data).await {
        Ok(delivery) => tracing::debug!(event, ?delivery, "Notification sent"),
        Err(e) => tracing::debug!(event, error = %e, "Notification not delivered"),
    }
}

// ---------------------------------------------------------------------------
// NoopNotifier
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationPort for NoopNotifier {
    async fn notify(&self, _event: &str, _data: &Value) -> Result<Delivery, NotifyError> {
        Ok(Delivery::Skipped)
    }
}

// ---------------------------------------------------------------------------
// HttpNotifier
// ---------------------------------------------------------------------------

/// Posts `{event, data}` to a remote relay's `/notify` endpoint.
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(relay_base_url: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: format!("{}/notify", relay_base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationPort for HttpNotifier {
    async fn notify(&self, event: &str, data: &Value) -> Result<Delivery, NotifyError> {
        let body = serde_json::json!({ "event": event, "data": data });
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status().as_u16()));
        }
        Ok(Delivery::Accepted)
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Keeps every notification in memory. Used by tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn notify(&self, event: &str, data: &Value) -> Result<Delivery, NotifyError> {
        self.calls.lock().await.push((event.to_string(), data.clone()));
        Ok(Delivery::Delivered { recipients: 0 })
    }
}
