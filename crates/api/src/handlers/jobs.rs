//! Handlers for the `/jobs` resource.
//!
//! Submission blocks until the job is terminal for API and bot tokens and
//! returns as soon as the job is queued for web UI tokens.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use gatehouse_core::error::CoreError;
use gatehouse_core::request::{GenerationRequest, JobRequest, UpscaleRequest, VoiceoverRequest};
use gatehouse_core::types::JobId;
use gatehouse_db::repositories::JobRepo;
use gatehouse_dispatch::SubmitOutcome;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

async fn submit(auth: AuthUser, state: AppState, request: JobRequest) -> AppResult<impl IntoResponse> {
    let kind = request.kind();
    let outcome = state.services.dispatcher.submit(&auth.caller(), request).await?;

    let status = match &outcome {
        SubmitOutcome::Queued { .. } => StatusCode::ACCEPTED,
        SubmitOutcome::Succeeded(_) => StatusCode::OK,
    };
    tracing::debug!(user_id = auth.user_id, kind = %kind, status = status.as_u16(), "Submission answered");

    Ok((status, Json(DataResponse { data: outcome })))
}

/// POST /api/v1/jobs/generation
pub async fn submit_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<GenerationRequest>,
) -> AppResult<impl IntoResponse> {
    submit(auth, state, JobRequest::Generation(input)).await
}

/// POST /api/v1/jobs/upscale
pub async fn submit_upscale(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<UpscaleRequest>,
) -> AppResult<impl IntoResponse> {
    submit(auth, state, JobRequest::Upscale(input)).await
}

/// POST /api/v1/jobs/voiceover
pub async fn submit_voiceover(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<VoiceoverRequest>,
) -> AppResult<impl IntoResponse> {
    submit(auth, state, JobRequest::Voiceover(input)).await
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// Owners see their own jobs; admins see any job.
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = JobRepo::find_by_id(&state.services.pool, job_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

    if job.user_id != auth.user_id && !auth.is_admin(&state) {
        return Err(CoreError::Forbidden("Cannot view another user's job".into()).into());
    }

    Ok(Json(DataResponse { data: job }))
}
