//! Callback processor: drives the job state machine from worker callbacks
//! and timeouts, settles the ledger and notifies waiters and subscribers.
//!
//! Every terminal transition first claims the job's marker in the
//! [`ClaimStore`]. A caller that loses the claim is a no-op, even while the
//! winner's transaction is still open. Only when the marker's TTL has
//! provably run out does a losing caller fall through to the guarded row
//! update, which admits exactly one terminal transition per job; the
//! refund shares that transaction.

use std::sync::Arc;
use serde::Serialize;
use sqlx::PgPool;
use gatehouse_core::callback::{CallbackMessage, CallbackStatus};
use gatehouse_core::correlation::CorrelationTable;
use gatehouse_core::throttle::QueueThrottle;
use gatehouse_core::types::{Credits, DbId, JobId};
use gatehouse_db::models::job::{Job, JobCompletion};
use gatehouse_db::repositories::JobRepo;
use gatehouse_db::{with_tx, CreditLedger};
use gatehouse_events::{EventBus, JobEventStatus, JobStatusEvent};
use gatehouse_queue::ClaimStore;

use crate::analytics::{AnalyticsSink, CompletionRecord, Outcome};
use crate::config::DispatchConfig;
use crate::error::DispatchError;

/// Failure reason recorded for jobs finalized by their timeout.
pub const TIMEOUT_REASON: &str = "Job timed out";

/// Failure reason used when a worker reports failure without one.
const DEFAULT_FAILURE_REASON: &str = "Worker reported failure";

/// What a callback or timeout did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Informational callback, nothing changed.
    Acknowledged,
    Started,
    Finalized,
    /// Success after the job was already terminal; outputs were kept.
    LateOutputs,
    /// Duplicate, late or unknown; nothing changed.
    Ignored,
}

pub struct CallbackProcessor {
    pub(crate) pool: PgPool,
    pub(crate) config: Arc<DispatchConfig>,
    pub(crate) ledger: CreditLedger,
    pub(crate) claims: Arc<dyn ClaimStore>,
    pub(crate) throttle: Arc<QueueThrottle<DbId>>,
    pub(crate) correlation: Arc<CorrelationTable<CallbackMessage>>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) analytics: Arc<dyn AnalyticsSink>,
}

impl CallbackProcessor {
    /// Apply one worker callback.
    ///
    /// Delivery is at-least-once, so any message for a terminal job is a
    /// no-op (late success only attaches outputs).
    pub async fn dispatch(&self, msg: CallbackMessage) -> Result<CallbackOutcome, DispatchError> {
        tracing::debug!(job_id = %msg.job_id, status = msg.status.as_str(), "Callback received");

        match msg.status {
            CallbackStatus::Queued => Ok(CallbackOutcome::Acknowledged),
            CallbackStatus::Processing => self.mark_started(msg).await,
            CallbackStatus::Succeeded => {
                if !self.claim_or_check(msg.job_id).await? {
                    return self.attach_late_outputs(&msg).await;
                }
                self.finalize_success(msg).await
            }
            CallbackStatus::Failed => {
                if !self.claim_or_check(msg.job_id).await? {
                    tracing::warn!(job_id = %msg.job_id, "Ignoring failure for finalized job");
                    return Ok(CallbackOutcome::Ignored);
                }
                let reason = msg
                    .error
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string());
                self.finalize_failure(msg.job_id, &reason, Outcome::Failed).await
            }
        }
    }

    /// Finalize `job_id` as timed out, unless a callback got there first.
    pub async fn finalize_timeout(&self, job_id: JobId) -> Result<CallbackOutcome, DispatchError> {
        if !self.claim_or_check(job_id).await? {
            return Ok(CallbackOutcome::Ignored);
        }
        tracing::info!(job_id = %job_id, "Job timed out");
        self.finalize_failure(job_id, TIMEOUT_REASON, Outcome::TimedOut).await
    }

    /// Fail and refund a job whose envelope never reached the broker.
    pub async fn abort_dispatch(&self, job_id: JobId, reason: &str) -> Result<CallbackOutcome, DispatchError> {
        if let Err(e) = self.claims.claim(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Claim store unavailable while aborting dispatch");
        }
        self.finalize_failure(job_id, reason, Outcome::Failed).await
    }

    /// `true` if this caller may try to finalize `job_id`.
    ///
    /// Winning the claim always qualifies. Losing it qualifies only when
    /// the row is still in flight and its marker's TTL has run out, so the
    /// marker cannot have been taken by a finalizer that is still mid-way.
    async fn claim_or_check(&self, job_id: JobId) -> Result<bool, DispatchError> {
        if self.claims.claim(job_id).await? {
            return Ok(true);
        }
        let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            tracing::warn!(job_id = %job_id, "Callback for unknown job");
            return Ok(false);
        };
        if job.is_terminal() {
            return Ok(false);
        }
        if !self.marker_expired(&job)? {
            tracing::debug!(job_id = %job_id, "Claim lost to a concurrent finalizer");
            return Ok(false);
        }
        tracing::warn!(job_id = %job_id, "Claim marker expired for in-flight job, settling by row guard");
        Ok(true)
    }

    fn marker_expired(&self, job: &Job) -> Result<bool, DispatchError> {
        let ttl = self.config.claim_ttl(job.job_kind()?);
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| DispatchError::Internal(format!("Claim TTL out of range: {e}")))?;
        Ok(chrono::Utc::now() >= job.created_at + ttl)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    async fn mark_started(&self, msg: CallbackMessage) -> Result<CallbackOutcome, DispatchError> {
        if !JobRepo::mark_started(&self.pool, msg.job_id).await? {
            return Ok(CallbackOutcome::Ignored);
        }
        if let Some(job) = JobRepo::find_by_id(&self.pool, msg.job_id).await? {
            tracing::info!(job_id = %job.id, user_id = job.user_id, "Job started");
            self.broadcast(&job, JobEventStatus::Started, None, None);
        }
        self.forward(msg);
        Ok(CallbackOutcome::Started)
    }

    async fn finalize_success(&self, msg: CallbackMessage) -> Result<CallbackOutcome, DispatchError> {
        let job_id = msg.job_id;
        let completion = completion_of(&msg)?;
        let ledger = self.ledger;

        let settled = with_tx(&self.pool, move |conn| {
            Box::pin(async move {
                if !JobRepo::complete(&mut *conn, job_id, &completion).await? {
                    return Ok(None);
                }
                let job = JobRepo::find_by_id(&mut *conn, job_id)
                    .await?
                    .ok_or_else(|| DispatchError::Internal(format!("Job {job_id} vanished")))?;
                let balance = ledger.balance_non_expired(&mut *conn, job.user_id).await?;
                Ok::<_, DispatchError>(Some((job, balance)))
            })
        })
        .await?;

        let Some((job, balance)) = settled else {
            return self.attach_late_outputs(&msg).await;
        };

        tracing::info!(
            job_id = %job.id,
            user_id = job.user_id,
            outputs = msg.outputs.len(),
            "Job succeeded",
        );
        self.throttle.decrement_by(1, &job.user_id);
        self.broadcast(&job, JobEventStatus::Succeeded, Some(balance), None);
        self.record(&job, Outcome::Succeeded);
        self.forward(msg);
        Ok(CallbackOutcome::Finalized)
    }

    /// Set the job failed and refund its cost in one transaction, retrying
    /// with linear backoff. If every attempt fails the job is still failed
    /// (without refund) so it never stays in flight, and the lost refund is
    /// logged as an error.
    async fn finalize_failure(
        &self,
        job_id: JobId,
        reason: &str,
        outcome: Outcome,
    ) -> Result<CallbackOutcome, DispatchError> {
        let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            tracing::warn!(job_id = %job_id, "Cannot fail unknown job");
            return Ok(CallbackOutcome::Ignored);
        };
        if job.is_terminal() {
            return Ok(CallbackOutcome::Ignored);
        }

        let attempts = self.config.refund_retry_attempts.max(1);
        let mut attempt = 0;
        let settled = loop {
            attempt += 1;
            match self.fail_and_refund(job_id, job.user_id, job.cost, reason).await {
                Ok(settled) => break settled,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %e,
                        "Refund attempt failed, retrying",
                    );
                    tokio::time::sleep(self.config.refund_retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        user_id = job.user_id,
                        amount = job.cost,
                        attempts,
                        error = %e,
                        "Refund failed, credit was not returned",
                    );
                    self.fail_without_refund(&job, reason).await;
                    return Err(DispatchError::Internal(format!(
                        "Refund of {} credits for job {job_id} failed: {e}",
                        job.cost
                    )));
                }
            }
        };

        let Some((job, balance)) = settled else {
            return Ok(CallbackOutcome::Ignored);
        };

        tracing::info!(
            job_id = %job_id,
            user_id = job.user_id,
            refunded = job.cost,
            reason,
            "Job failed, credit refunded",
        );
        self.throttle.decrement_by(1, &job.user_id);
        self.broadcast(&job, JobEventStatus::Failed, Some(balance), Some(reason));
        self.record(&job, outcome);
        self.forward(CallbackMessage::failed(job_id, reason));
        Ok(CallbackOutcome::Finalized)
    }

    async fn fail_and_refund(
        &self,
        job_id: JobId,
        user_id: DbId,
        cost: Credits,
        reason: &str,
    ) -> Result<Option<(Job, Credits)>, DispatchError> {
        let ledger = self.ledger;
        let reason = reason.to_string();
        with_tx(&self.pool, move |conn| {
            Box::pin(async move {
                if !JobRepo::fail(&mut *conn, job_id, &reason).await? {
                    return Ok(None);
                }
                if !ledger.refund(&mut *conn, user_id, cost).await? {
                    return Err(DispatchError::Internal(format!(
                        "Refund of {cost} credits to user {user_id} was not applied"
                    )));
                }
                let job = JobRepo::find_by_id(&mut *conn, job_id)
                    .await?
                    .ok_or_else(|| DispatchError::Internal(format!("Job {job_id} vanished")))?;
                let balance = ledger.balance_non_expired(&mut *conn, user_id).await?;
                Ok::<_, DispatchError>(Some((job, balance)))
            })
        })
        .await
    }

    async fn fail_without_refund(&self, job: &Job, reason: &str) {
        match JobRepo::fail(&self.pool, job.id, reason).await {
            Ok(true) => {
                self.throttle.decrement_by(1, &job.user_id);
                self.broadcast(job, JobEventStatus::Failed, None, Some(reason));
                self.record(job, Outcome::Failed);
                self.forward(CallbackMessage::failed(job.id, reason));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Could not mark job failed");
            }
        }
    }

    async fn attach_late_outputs(&self, msg: &CallbackMessage) -> Result<CallbackOutcome, DispatchError> {
        let completion = completion_of(msg)?;
        if JobRepo::attach_late_outputs(&self.pool, msg.job_id, &completion).await? {
            tracing::info!(job_id = %msg.job_id, "Attached outputs from late success callback");
            return Ok(CallbackOutcome::LateOutputs);
        }
        tracing::warn!(job_id = %msg.job_id, "Ignoring duplicate success callback");
        Ok(CallbackOutcome::Ignored)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Hand `msg` to the synchronous waiter, if one is registered.
    fn forward(&self, msg: CallbackMessage) {
        let Some(sink) = self.correlation.get(&msg.job_id) else {
            return;
        };
        let job_id = msg.job_id;
        if let Err(e) = sink.try_send(msg) {
            tracing::warn!(job_id = %job_id, error = %e, "Could not deliver callback to waiter");
        }
    }

    fn broadcast(&self, job: &Job, status: JobEventStatus, balance: Option<Credits>, error: Option<&str>) {
        let kind = match job.job_kind() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Not broadcasting job with unknown kind");
                return;
            }
        };
        let num_outputs = job
            .outputs
            .as_ref()
            .and_then(|o| o.as_array())
            .map_or(0, |a| a.len() as u32);
        let mut event = JobStatusEvent::new(job.id, job.user_id, kind, status)
            .with_timestamps(Some(job.created_at), job.started_at, job.completed_at)
            .with_counts(num_outputs, job.nsfw_count.max(0) as u32);
        if let Some(balance) = balance {
            event = event.with_balance(balance);
        }
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.events.publish(event);
    }

    fn record(&self, job: &Job, outcome: Outcome) {
        let Ok(kind) = job.job_kind() else {
            return;
        };
        let completed_at = job.completed_at.unwrap_or_else(chrono::Utc::now);
        let (queue_wait, processing) = match job.started_at {
            Some(started_at) => (started_at - job.created_at, completed_at - started_at),
            None => (completed_at - job.created_at, chrono::Duration::zero()),
        };
        self.analytics.record(CompletionRecord {
            job_id: job.id,
            user_id: job.user_id,
            kind,
            cost: job.cost,
            queue_wait: queue_wait.to_std().unwrap_or_default(),
            processing: processing.to_std().unwrap_or_default(),
            outcome,
        });
    }
}

fn completion_of(msg: &CallbackMessage) -> Result<JobCompletion, DispatchError> {
    let flagged = msg.outputs.iter().filter(|o| o.nsfw).count() as u32;
    let outputs = serde_json::to_value(&msg.outputs)
        .map_err(|e| DispatchError::Internal(format!("Cannot encode outputs: {e}")))?;
    Ok(JobCompletion {
        outputs,
        nsfw_count: msg.counters.nsfw_count.max(flagged) as i32,
        invalid_count: msg.counters.invalid_count as i32,
    })
}
