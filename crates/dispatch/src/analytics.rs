//! Completion analytics. Shipping the records anywhere is someone else's
//! job; the default sink just emits a structured tracing event.

use std::time::Duration;

use serde::Serialize;
use gatehouse_core::job::JobKind;
use gatehouse_core::types::{Credits, DbId, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRecord {
    pub job_id: JobId,
    pub user_id: DbId,
    pub kind: JobKind,
    pub cost: Credits,
    /// From creation until a worker started it (or until completion when
    /// it never started).
    pub queue_wait: Duration,
    /// From start until completion; zero when it never started.
    pub processing: Duration,
    pub outcome: Outcome,
}

pub trait AnalyticsSink: Send + Sync {
    fn record(&self, record: CompletionRecord);
}

pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn record(&self, record: CompletionRecord) {
        tracing::info!(
            target: "gatehouse::analytics",
            job_id = %record.job_id,
            user_id = record.user_id,
            kind = %record.kind,
            cost = record.cost,
            queue_wait_ms = record.queue_wait.as_millis() as u64,
            processing_ms = record.processing.as_millis() as u64,
            outcome = ?record.outcome,
            "Job completed",
        );
    }
}
