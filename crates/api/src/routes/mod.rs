pub mod credits;
pub mod health;
pub mod jobs;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs/generation        submit (POST)
/// /jobs/upscale           submit (POST)
/// /jobs/voiceover         submit (POST)
/// /jobs/{id}              get
///
/// /credits/balance        caller's unexpired balance
///
/// /webhooks/worker        worker callbacks (X-Worker-Secret)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/credits", credits::router())
        .nest("/webhooks", webhooks::router())
}
