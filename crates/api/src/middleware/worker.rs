//! Shared-secret check for worker callbacks.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use gatehouse_core::error::CoreError;
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

/// Present when the request carries the configured worker secret.
pub struct WorkerAuth;

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(WORKER_SECRET_HEADER)
            .map(|v| v.as_bytes())
            .ok_or_else(|| CoreError::Unauthorized("Missing worker secret".into()))?;

        if !secret_matches(presented, state.config.worker_callback_secret.as_bytes()) {
            tracing::warn!("Rejected worker callback with a bad secret");
            return Err(CoreError::Unauthorized("Invalid worker secret".into()).into());
        }
        Ok(WorkerAuth)
    }
}

fn secret_matches(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len() && bool::from(presented.ct_eq(expected))
}
