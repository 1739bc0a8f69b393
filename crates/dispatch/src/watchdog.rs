//! Per-job timeout watchdog and start-up recovery.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use gatehouse_core::types::JobId;
use gatehouse_db::repositories::JobRepo;
use gatehouse_queue::ClaimStore;

use crate::callback::CallbackProcessor;
use crate::config::DispatchConfig;
use crate::error::DispatchError;

#[derive(Clone)]
pub struct TimeoutWatchdog {
    processor: Arc<CallbackProcessor>,
}

impl TimeoutWatchdog {
    pub fn new(processor: Arc<CallbackProcessor>) -> Self {
        Self { processor }
    }

    /// Finalize `job_id` as timed out after `after`, unless a callback
    /// claims it first.
    pub fn arm(&self, job_id: JobId, after: Duration) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Err(e) = processor.finalize_timeout(job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "Timeout finalization failed");
            }
        })
    }

    /// Re-arm markers and watchdogs for every job left in flight by a
    /// previous process. Jobs already past their deadline time out
    /// immediately. Returns the number of jobs re-armed.
    pub async fn recover(
        &self,
        pool: &PgPool,
        claims: &dyn ClaimStore,
        config: &DispatchConfig,
    ) -> Result<usize, DispatchError> {
        let jobs = JobRepo::list_in_flight(pool).await?;
        let now = Utc::now();
        let mut armed = 0;

        for job in jobs {
            let kind = match job.job_kind() {
                Ok(kind) => kind,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Skipping in-flight job with unknown kind");
                    continue;
                }
            };
            let elapsed = (now - job.created_at).to_std().unwrap_or_default();
            let remaining = config.timeout_for(kind).saturating_sub(elapsed);

            claims.arm(job.id, config.claim_ttl(kind)).await?;
            // The in-memory throttle did not survive the restart.
            self.processor.throttle.increment_by(1, &job.user_id);
            self.arm(job.id, remaining);
            armed += 1;
        }

        if armed > 0 {
            tracing::info!(jobs = armed, "Re-armed watchdogs for in-flight jobs");
        }
        Ok(armed)
    }
}
