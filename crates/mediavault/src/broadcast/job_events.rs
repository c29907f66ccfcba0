//! Job change events for real-time status streaming.
//!
//! Delivery is at-least-once and lossy under lag; every event carries the
//! row snapshot it was minted from, so consumers reconcile by overwriting,
//! never by accumulating.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::ledger::{JobRecord, JobStatus};

/// Snapshot of a job row, published after the row update became durable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobChangeEvent {
    pub job_id: String,
    pub owner_id: String,
    pub original_name: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobChangeEvent {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            original_name: record.original_name.clone(),
            status: record.status,
            progress: record.progress,
            error_detail: record.error_detail.clone(),
            timestamp: record.updated_at,
        }
    }
}

/// Broadcasts job change events to any number of subscribers.
#[derive(Clone)]
pub struct JobChangeBroadcaster {
    sender: Arc<broadcast::Sender<JobChangeEvent>>,
}

impl JobChangeBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: JobChangeEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for job change events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobChangeBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
