//! Job dispatcher: admission, debit, job creation, enqueue and, for
//! synchronous callers, waiting for the outcome.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;
use gatehouse_core::callback::{CallbackMessage, CallbackStatus, OutputDescriptor};
use gatehouse_core::correlation::{CorrelationGuard, CorrelationTable, DEFAULT_SINK_CAPACITY};
use gatehouse_core::job::{Caller, JobKind};
use gatehouse_core::request::JobRequest;
use gatehouse_core::roles::{priority_for, Ceiling};
use gatehouse_core::types::{Credits, DbId, JobId, Timestamp};
use gatehouse_db::models::job::{Job, NewJob};
use gatehouse_db::models::status::JobStatus;
use gatehouse_db::repositories::JobRepo;
use gatehouse_db::{with_tx, CreditLedger};
use gatehouse_events::{EventBus, JobEventStatus, JobStatusEvent};
use gatehouse_queue::broker::publish_envelope;
use gatehouse_queue::{Broker, ClaimStore, JobEnvelope};

use crate::admission::AdmissionController;
use crate::callback::{CallbackProcessor, TIMEOUT_REASON};
use crate::catalog::Catalog;
use crate::config::DispatchConfig;
use crate::error::{AdmissionError, DispatchError};
use crate::screener::{PromptScreener, ScreenVerdict};
use crate::watchdog::TimeoutWatchdog;

/// Terminal success as returned to a synchronous caller.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub kind: JobKind,
    pub outputs: Vec<OutputDescriptor>,
    pub nsfw_count: i32,
    pub invalid_count: i32,
    pub balance: Credits,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Interactive callers get this as soon as the job is enqueued.
    Queued {
        job_id: JobId,
        kind: JobKind,
        balance: Credits,
    },
    Succeeded(JobResult),
}

pub struct JobDispatcher {
    pub(crate) pool: PgPool,
    pub(crate) config: Arc<DispatchConfig>,
    pub(crate) ledger: CreditLedger,
    pub(crate) admission: AdmissionController,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) screener: Arc<dyn PromptScreener>,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) claims: Arc<dyn ClaimStore>,
    pub(crate) correlation: Arc<CorrelationTable<CallbackMessage>>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) processor: Arc<CallbackProcessor>,
    pub(crate) watchdog: TimeoutWatchdog,
}

impl JobDispatcher {
    /// Admit, debit, create and enqueue one job.
    ///
    /// Interactive callers return [`SubmitOutcome::Queued`] right after the
    /// enqueue. Everyone else blocks until the job is terminal: success
    /// yields [`SubmitOutcome::Succeeded`], failure and timeout come back as
    /// [`DispatchError::Worker`] / [`DispatchError::Timeout`] after the
    /// debit was refunded.
    pub async fn submit(&self, caller: &Caller, mut request: JobRequest) -> Result<SubmitOutcome, DispatchError> {
        if caller.is_banned {
            return Err(AdmissionError::Banned.into());
        }
        let user_id = caller.user_id;
        let privileged = caller.is_privileged() || self.catalog.is_admin(user_id);

        self.prepare(&mut request, privileged).await?;

        let ceiling = if privileged {
            Ceiling::Unbounded
        } else {
            self.config.ceilings.ceiling_for(&caller.roles)
        };
        let slot = self.admission.admit(caller, ceiling).await?;

        let job_id = Uuid::new_v4();
        let kind = request.kind();
        let cost = request.cost();
        let priority = priority_for(&caller.roles);

        let (job, balance) = self.debit_and_create(job_id, user_id, priority, request).await?;
        // From here on the throttle entry is released by finalization.
        slot.hand_off();
        tracing::info!(
            job_id = %job_id,
            user_id,
            kind = %kind,
            cost,
            channel = caller.channel.as_str(),
            "Job admitted",
        );

        self.events.publish(
            JobStatusEvent::new(job_id, user_id, kind, JobEventStatus::Queued)
                .with_timestamps(Some(job.created_at), None, None)
                .with_balance(balance),
        );

        let waiter = if caller.channel.waits_for_result() {
            match self.correlation.register(job_id, DEFAULT_SINK_CAPACITY) {
                Ok(registration) => Some(registration),
                Err(e) => {
                    self.abort(job_id, &format!("Could not register waiter: {e}")).await;
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let timeout = self.config.timeout_for(kind);
        if let Err(e) = self.enqueue(&job, kind, priority, timeout).await {
            self.abort(job_id, &format!("Failed to enqueue job: {e}")).await;
            return Err(e);
        }
        self.watchdog.arm(job_id, timeout);

        match waiter {
            None => Ok(SubmitOutcome::Queued { job_id, kind, balance }),
            Some((guard, rx)) => self
                .wait(guard, rx, timeout + self.config.wait_grace)
                .await
                .map(SubmitOutcome::Succeeded),
        }
    }

    /// Validate (or, for privileged callers, default) the request fields
    /// and resolve the generation model against the catalog.
    async fn prepare(&self, request: &mut JobRequest, privileged: bool) -> Result<(), DispatchError> {
        if privileged {
            request.apply_defaults();
        } else {
            request.validate_fields()?;
        }

        if let JobRequest::Generation(generation) = request {
            let model = self
                .catalog
                .resolve_model(generation.model.as_deref())
                .await?
                .ok_or_else(|| {
                    DispatchError::Validation(match &generation.model {
                        Some(name) => format!("Unknown model '{name}'"),
                        None => "No default model is configured".to_string(),
                    })
                })?;

            let max_outputs = model.max_outputs.max(1) as u32;
            if generation.num_outputs > max_outputs {
                if !privileged {
                    return Err(DispatchError::Validation(format!(
                        "num_outputs must be at most {max_outputs} for model '{}'",
                        model.name
                    )));
                }
                generation.num_outputs = max_outputs;
            }
            generation.model = Some(model.name);
        }
        Ok(())
    }

    /// One transaction: debit, screen, create the job row, read the new
    /// balance. Any failure rolls all of it back.
    async fn debit_and_create(
        &self,
        job_id: JobId,
        user_id: DbId,
        priority: i32,
        request: JobRequest,
    ) -> Result<(Job, Credits), DispatchError> {
        let ledger = self.ledger;
        let screener = Arc::clone(&self.screener);

        with_tx(&self.pool, move |conn| {
            Box::pin(async move {
                let mut request = request;
                let cost = request.cost();

                if !ledger.deduct(&mut *conn, user_id, cost, false).await? {
                    tracing::warn!(user_id, cost, "Insufficient credits");
                    return Err(DispatchError::InsufficientCredits { required: cost });
                }

                if let Some(text) = request.screened_text().map(str::to_owned) {
                    match screener.screen(&text).await? {
                        ScreenVerdict::Accepted(screened) => request.set_screened_text(screened),
                        ScreenVerdict::Flagged(reason) => {
                            return Err(DispatchError::ContentRejected(reason));
                        }
                    }
                }

                let new_job = NewJob {
                    id: job_id,
                    user_id,
                    kind: request.kind().as_str().to_string(),
                    cost,
                    priority,
                    parameters: request.parameters(),
                };
                let job = JobRepo::create(&mut *conn, &new_job).await?;
                let balance = ledger.balance_non_expired(&mut *conn, user_id).await?;
                Ok::<_, DispatchError>((job, balance))
            })
        })
        .await
    }

    /// Arm the claim marker, then publish the envelope.
    async fn enqueue(&self, job: &Job, kind: JobKind, priority: i32, timeout: Duration) -> Result<(), DispatchError> {
        self.claims.arm(job.id, self.config.claim_ttl(kind)).await?;
        let envelope = JobEnvelope::new(
            job.id,
            kind,
            job.user_id,
            priority,
            job.parameters.clone(),
            timeout.as_secs(),
        );
        publish_envelope(self.broker.as_ref(), &envelope).await?;
        Ok(())
    }

    async fn abort(&self, job_id: JobId, reason: &str) {
        tracing::error!(job_id = %job_id, reason, "Dispatch failed after commit, refunding");
        if let Err(e) = self.processor.abort_dispatch(job_id, reason).await {
            tracing::error!(job_id = %job_id, error = %e, "Could not abort dispatched job");
        }
    }

    /// Block until the job's terminal callback arrives, or until `deadline`
    /// passes, in which case the timeout is settled here.
    async fn wait(
        &self,
        guard: CorrelationGuard<CallbackMessage>,
        mut rx: mpsc::Receiver<CallbackMessage>,
        deadline: Duration,
    ) -> Result<JobResult, DispatchError> {
        let job_id = guard.job_id();
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                received = rx.recv() => {
                    let Some(msg) = received else {
                        return Err(DispatchError::Internal(format!("Callback channel for job {job_id} closed")));
                    };
                    match msg.status {
                        CallbackStatus::Queued | CallbackStatus::Processing => {
                            tracing::debug!(job_id = %job_id, status = msg.status.as_str(), "Waiter saw progress");
                        }
                        CallbackStatus::Succeeded => return self.load_result(job_id).await,
                        CallbackStatus::Failed => return Err(failure_error(msg.error)),
                    }
                }
                _ = &mut expiry => {
                    tracing::warn!(job_id = %job_id, "Waiter deadline passed, settling timeout");
                    self.processor.finalize_timeout(job_id).await?;
                    return self.settled_result(job_id).await;
                }
            }
        }
    }

    /// Result for a job the waiter did not hear about: whatever the row says.
    async fn settled_result(&self, job_id: JobId) -> Result<JobResult, DispatchError> {
        let job = find_job(&self.pool, job_id).await?;
        match job.status() {
            Some(JobStatus::Succeeded) => self.load_result(job_id).await,
            Some(JobStatus::Failed) => Err(failure_error(job.failure_reason)),
            _ => Err(DispatchError::Timeout),
        }
    }

    async fn load_result(&self, job_id: JobId) -> Result<JobResult, DispatchError> {
        let job = find_job(&self.pool, job_id).await?;
        let outputs: Vec<OutputDescriptor> = match &job.outputs {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| DispatchError::Internal(format!("Stored outputs are malformed: {e}")))?,
            None => Vec::new(),
        };
        let balance = self.ledger.balance_non_expired(&self.pool, job.user_id).await?;
        Ok(JobResult {
            job_id,
            kind: job.job_kind()?,
            outputs,
            nsfw_count: job.nsfw_count,
            invalid_count: job.invalid_count,
            balance,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        })
    }
}

async fn find_job(pool: &PgPool, job_id: JobId) -> Result<Job, DispatchError> {
    JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or_else(|| DispatchError::Internal(format!("Job {job_id} vanished")))
}

fn failure_error(reason: Option<String>) -> DispatchError {
    match reason {
        Some(reason) if reason == TIMEOUT_REASON => DispatchError::Timeout,
        Some(reason) => DispatchError::Worker(reason),
        None => DispatchError::Worker("Worker reported failure".to_string()),
    }
}
