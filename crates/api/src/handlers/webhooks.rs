//! Worker callback ingress.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use gatehouse_core::callback::CallbackMessage;
use gatehouse_core::types::JobId;
use gatehouse_dispatch::CallbackOutcome;

use crate::error::AppResult;
use crate::middleware::worker::WorkerAuth;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub job_id: JobId,
    pub outcome: CallbackOutcome,
}

/// POST /api/v1/webhooks/worker
///
/// Duplicates and callbacks for finished jobs are acknowledged with 200 so
/// workers do not keep redelivering them.
pub async fn worker_callback(
    _auth: WorkerAuth,
    State(state): State<AppState>,
    Json(message): Json<CallbackMessage>,
) -> AppResult<impl IntoResponse> {
    let job_id = message.job_id;
    let outcome = state.services.processor.dispatch(message).await?;
    Ok(Json(DataResponse {
        data: CallbackAck { job_id, outcome },
    }))
}
