//! Repository for the `jobs` table.
//!
//! Every status change is guarded in its `WHERE` clause, so a transition the
//! state machine forbids simply affects zero rows. Callers use the returned
//! `bool` to detect that they lost a race with another finalizer.

use sqlx::{PgExecutor, PgPool};
use gatehouse_core::types::{DbId, JobId};

use crate::models::job::{Job, JobCompletion, JobListQuery, NewJob};
use crate::models::status::{JobStatus, IN_FLIGHT_STATUSES};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, kind, status_id, cost, priority, parameters, outputs, \
    nsfw_count, invalid_count, failure_reason, \
    created_at, started_at, completed_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD and lifecycle operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job in `queued` state.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &NewJob,
    ) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, user_id, kind, status_id, cost, priority, parameters) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.id)
            .bind(input.user_id)
            .bind(&input.kind)
            .bind(JobStatus::Queued.id())
            .bind(input.cost)
            .bind(input.priority)
            .bind(&input.parameters)
            .fetch_one(executor)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: JobId,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// `queued -> started`. Returns `false` if the job was not queued.
    pub async fn mark_started<'e, E: PgExecutor<'e>>(
        executor: E,
        id: JobId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET status_id = $2, started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(JobStatus::Started.id())
        .bind(JobStatus::Queued.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `{queued, started} -> succeeded` with outputs and counters.
    ///
    /// Returns `false` if the job was already terminal.
    pub async fn complete<'e, E: PgExecutor<'e>>(
        executor: E,
        id: JobId,
        completion: &JobCompletion,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, outputs = $3, nsfw_count = $4, invalid_count = $5, \
                 completed_at = NOW(), updated_at = NOW(), \
                 started_at = COALESCE(started_at, NOW()) \
             WHERE id = $1 AND status_id IN ($6, $7)",
        )
        .bind(id)
        .bind(JobStatus::Succeeded.id())
        .bind(&completion.outputs)
        .bind(completion.nsfw_count)
        .bind(completion.invalid_count)
        .bind(IN_FLIGHT_STATUSES[0])
        .bind(IN_FLIGHT_STATUSES[1])
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `{queued, started} -> failed` with a reason.
    ///
    /// Returns `false` if the job was already terminal.
    pub async fn fail<'e, E: PgExecutor<'e>>(
        executor: E,
        id: JobId,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, failure_reason = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id IN ($4, $5)",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(reason)
        .bind(IN_FLIGHT_STATUSES[0])
        .bind(IN_FLIGHT_STATUSES[1])
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store outputs from a completion that arrived after the job was
    /// already failed. Status and ledger are left untouched; only the first
    /// late completion is kept.
    pub async fn attach_late_outputs<'e, E: PgExecutor<'e>>(
        executor: E,
        id: JobId,
        completion: &JobCompletion,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET outputs = $2, nsfw_count = $3, invalid_count = $4, updated_at = NOW() \
             WHERE id = $1 AND status_id = $5 AND outputs IS NULL",
        )
        .bind(id)
        .bind(&completion.outputs)
        .bind(completion.nsfw_count)
        .bind(completion.invalid_count)
        .bind(JobStatus::Failed.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All jobs that have not reached a terminal state, oldest first.
    ///
    /// Used at start-up to re-arm watchdogs lost with the previous process.
    pub async fn list_in_flight(pool: &PgPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id IN ($1, $2) \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(IN_FLIGHT_STATUSES[0])
            .bind(IN_FLIGHT_STATUSES[1])
            .fetch_all(pool)
            .await
    }

    /// List a user's jobs, newest first, with optional status filter.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: DbId,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE user_id = $1 AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(user_id)
            .bind(params.status_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
