//! Job rows and DTOs. Generation, upscale and voiceover jobs share one table.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use gatehouse_core::error::CoreError;
use gatehouse_core::job::JobKind;
use gatehouse_core::types::{Credits, DbId, JobId, Timestamp};

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: DbId,
    pub kind: String,
    pub status_id: StatusId,
    pub cost: Credits,
    pub priority: i32,
    pub parameters: serde_json::Value,
    pub outputs: Option<serde_json::Value>,
    pub nsfw_count: i32,
    pub invalid_count: i32,
    pub failure_reason: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(JobStatus::is_terminal)
    }

    pub fn job_kind(&self) -> Result<JobKind, CoreError> {
        self.kind.parse()
    }
}

/// Insert payload for a freshly admitted job (always created `queued`).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub user_id: DbId,
    pub kind: String,
    pub cost: Credits,
    pub priority: i32,
    pub parameters: serde_json::Value,
}

/// Terminal success payload.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub outputs: serde_json::Value,
    pub nsfw_count: i32,
    pub invalid_count: i32,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status ID (e.g. 1 = queued, 4 = failed).
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
