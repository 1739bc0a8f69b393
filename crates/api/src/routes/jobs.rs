use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generation", post(jobs::submit_generation))
        .route("/upscale", post(jobs::submit_upscale))
        .route("/voiceover", post(jobs::submit_voiceover))
        .route("/{id}", get(jobs::get_job))
}
