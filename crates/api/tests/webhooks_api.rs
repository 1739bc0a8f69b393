//! Worker callback ingress.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;
use gatehouse_core::job::CallerChannel;

use common::*;

fn succeeded(job_id: &str) -> serde_json::Value {
    json!({
        "job_id": job_id,
        "status": "succeeded",
        "outputs": [{ "uri": "s3://out/1.png", "mime_type": "image/png", "nsfw": false }],
    })
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn callback_without_secret_is_unauthorized(pool: PgPool) {
    let app = build_test_app(pool).await;
    let response = app
        .post_json("/api/v1/webhooks/worker", &[], succeeded(&uuid::Uuid::new_v4().to_string()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn callback_with_wrong_secret_is_unauthorized(pool: PgPool) {
    let app = build_test_app(pool).await;
    let response = app
        .post_json(
            "/api/v1/webhooks/worker",
            &[("x-worker-secret", "guess".to_string())],
            succeeded(&uuid::Uuid::new_v4().to_string()),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn callback_for_unknown_job_is_ignored(pool: PgPool) {
    let app = build_test_app(pool).await;
    let response = app
        .post_json(
            "/api/v1/webhooks/worker",
            &[worker_secret()],
            json!({ "job_id": uuid::Uuid::new_v4(), "status": "failed", "error": "boom" }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["outcome"], "ignored");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn success_callback_finalizes_queued_job(pool: PgPool) {
    let user = create_user(&pool, "alice", &["pro"]).await;
    grant(&pool, user, 10).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let created = body_json(
        app.post_json(
            "/api/v1/jobs/generation",
            &[bearer(&token)],
            json!({ "prompt": "a lighthouse at dusk" }),
        )
        .await,
    )
    .await;
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();

    let response = app
        .post_json(
            "/api/v1/webhooks/worker",
            &[worker_secret()],
            json!({ "job_id": job_id, "status": "processing" }),
        )
        .await;
    assert_eq!(body_json(response).await["data"]["outcome"], "started");

    let response = app
        .post_json("/api/v1/webhooks/worker", &[worker_secret()], succeeded(&job_id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["outcome"], "finalized");

    let duplicate = app
        .post_json("/api/v1/webhooks/worker", &[worker_secret()], succeeded(&job_id))
        .await;
    assert_eq!(body_json(duplicate).await["data"]["outcome"], "ignored");

    let job = body_json(app.get(&format!("/api/v1/jobs/{job_id}"), Some(&token)).await).await;
    assert_eq!(job["data"]["status_id"], 3);
    assert_eq!(job["data"]["outputs"][0]["uri"], "s3://out/1.png");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn failure_callback_refunds(pool: PgPool) {
    let user = create_user(&pool, "bob", &["pro"]).await;
    grant(&pool, user, 10).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let created = body_json(
        app.post_json(
            "/api/v1/jobs/generation",
            &[bearer(&token)],
            json!({ "prompt": "a lighthouse at dusk", "num_outputs": 3 }),
        )
        .await,
    )
    .await;
    assert_eq!(created["data"]["balance"], 7);
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();

    app.post_json(
        "/api/v1/webhooks/worker",
        &[worker_secret()],
        json!({ "job_id": job_id, "status": "failed", "error": "CUDA out of memory" }),
    )
    .await;

    let json = body_json(app.get("/api/v1/credits/balance", Some(&token)).await).await;
    assert_eq!(json["data"]["balance"], 10);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn api_caller_receives_result_once_worker_reports(pool: PgPool) {
    let user = create_user(&pool, "mallory", &["bot"]).await;
    grant(&pool, user, 10).await;
    let app = std::sync::Arc::new(build_test_app(pool).await);
    let token = app.token(user, &["bot"], CallerChannel::Bot);

    let submitter = {
        let app = std::sync::Arc::clone(&app);
        tokio::spawn(async move {
            app.post_json(
                "/api/v1/jobs/generation",
                &[bearer(&token)],
                json!({ "prompt": "a lighthouse at dusk" }),
            )
            .await
        })
    };

    let mut published = None;
    for _ in 0..200 {
        if let Some(message) = app.broker.take("generation") {
            published = Some(message);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let message = published.expect("job was published");

    app.post_json(
        "/api/v1/webhooks/worker",
        &[worker_secret()],
        succeeded(&message.message_id.to_string()),
    )
    .await;

    let response = submitter.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "succeeded");
    assert_eq!(json["data"]["balance"], 9);
    assert_eq!(json["data"]["outputs"][0]["mime_type"], "image/png");
}
