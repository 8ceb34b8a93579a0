//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is shared
//! via `Arc<EventBus>` between stage services, orchestrators and the relay.
//! Delivery is best-effort: nothing is persisted or replayed, and a
//! subscriber only sees events published after it subscribed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stemflow_core::job::Job;
use tokio::sync::broadcast;

use crate::channel::Channel;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job snapshot published on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub channel: Channel,
    pub job: Job,
    pub published_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(channel: Channel, job: Job) -> Self {
        Self {
            channel,
            job,
            published_at: Utc::now(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.job.subject_id
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use stemflow_events::{Channel, EventBus};
/// use stemflow_core::stage::Stage;
///
/// let bus = EventBus::default();
/// let _sub = bus.subscribe_to([Channel::completed(Stage::Download)]);
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed events are dropped and
    /// slow receivers observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn publish(&self, event: JobEvent) {
        tracing::debug!(
            channel = %event.channel,
            job_id = %event.job.id,
            subject_id = %event.job.subject_id,
            "Publishing job event"
        );
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Shorthand for publishing a job snapshot on `channel`.
    pub fn publish_job(&self, channel: Channel, job: &Job) {
        self.publish(JobEvent::new(channel, job.clone()));
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to a set of channels.
    pub fn subscribe_to(&self, channels: impl IntoIterator<Item = Channel>) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            channels: channels.into_iter().collect(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A receiver that yields only events on its channels.
pub struct Subscription {
    receiver: broadcast::Receiver<JobEvent>,
    channels: HashSet<Channel>,
}

impl Subscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once the bus is dropped. Lagging is logged and
    /// skipped over.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.channels.contains(&event.channel) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Subscriber lagged, some job events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
