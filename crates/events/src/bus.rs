//! In-process job status bus backed by a `tokio::sync::broadcast` channel.
//!
//! Fire-and-forget: publishing never blocks and never fails, subscribers
//! that fall behind lose the oldest events. Shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use gatehouse_core::job::JobKind;
use gatehouse_core::types::{Credits, DbId, JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobStatusEvent
// ---------------------------------------------------------------------------

/// Lifecycle phase carried by a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventStatus {
    Queued,
    Started,
    Succeeded,
    Failed,
}

impl JobEventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobEventStatus::Succeeded | JobEventStatus::Failed)
    }
}

/// One status change of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_id: JobId,
    pub user_id: DbId,
    pub kind: JobKind,
    pub status: JobEventStatus,
    pub created_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub num_outputs: u32,
    #[serde(default)]
    pub nsfw_count: u32,
    /// Caller's unexpired balance after the transition, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Credits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the event was emitted (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobStatusEvent {
    pub fn new(job_id: JobId, user_id: DbId, kind: JobKind, status: JobEventStatus) -> Self {
        Self {
            job_id,
            user_id,
            kind,
            status,
            created_at: None,
            started_at: None,
            completed_at: None,
            num_outputs: 0,
            nsfw_count: 0,
            balance: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamps(
        mut self,
        created_at: Option<Timestamp>,
        started_at: Option<Timestamp>,
        completed_at: Option<Timestamp>,
    ) -> Self {
        self.created_at = created_at;
        self.started_at = started_at;
        self.completed_at = completed_at;
        self
    }

    pub fn with_counts(mut self, num_outputs: u32, nsfw_count: u32) -> Self {
        self.num_outputs = num_outputs;
        self.nsfw_count = nsfw_count;
        self
    }

    pub fn with_balance(mut self, balance: Credits) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out bus: every subscriber independently receives every event.
pub struct EventBus {
    sender: broadcast::Sender<JobStatusEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: JobStatusEvent) {
        tracing::debug!(
            job_id = %event.job_id,
            status = ?event.status,
            "Broadcasting job status",
        );
        // SendError only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.sender.subscribe()
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
// Tests
// ---------------------------------------------------------------------------
