//! Job submission, lookup and balance endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;
use gatehouse_core::job::CallerChannel;

use common::*;

#[sqlx::test(migrations = "../../db/migrations")]
async fn submit_without_token_is_unauthorized(pool: PgPool) {
    let app = build_test_app(pool).await;
    let response = app
        .post_json("/api/v1/jobs/upscale", &[], json!({ "image_url": "s3://in/a.png" }))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn token_for_unknown_user_is_unauthorized(pool: PgPool) {
    let app = build_test_app(pool).await;
    let token = app.token(9999, &["pro"], CallerChannel::WebUi);

    let response = app.get("/api/v1/credits/balance", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn web_ui_submission_is_accepted_and_queued(pool: PgPool) {
    let user = create_user(&pool, "alice", &["pro"]).await;
    grant(&pool, user, 10).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let response = app
        .post_json(
            "/api/v1/jobs/generation",
            &[bearer(&token)],
            json!({ "prompt": "a lighthouse at dusk", "num_outputs": 2 }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "queued");
    assert_eq!(json["data"]["kind"], "generation");
    assert_eq!(json["data"]["balance"], 8);
    assert_eq!(app.broker.len(), 1);

    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();
    let response = app.get(&format!("/api/v1/jobs/{job_id}"), Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["data"]["cost"], 2);
    assert_eq!(job["data"]["user_id"], user);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn jobs_are_visible_to_owner_and_admin_only(pool: PgPool) {
    let owner = create_user(&pool, "bob", &["pro"]).await;
    let stranger = create_user(&pool, "carol", &["pro"]).await;
    let admin = create_user(&pool, "root", &["admin"]).await;
    grant(&pool, owner, 5).await;
    let app = build_test_app(pool).await;

    let owner_token = app.token(owner, &["pro"], CallerChannel::WebUi);
    let created = body_json(
        app.post_json(
            "/api/v1/jobs/upscale",
            &[bearer(&owner_token)],
            json!({ "image_url": "s3://in/a.png", "scale": 4 }),
        )
        .await,
    )
    .await;
    let uri = format!("/api/v1/jobs/{}", created["data"]["job_id"].as_str().unwrap());

    let stranger_token = app.token(stranger, &["pro"], CallerChannel::WebUi);
    let response = app.get(&uri, Some(&stranger_token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin_token = app.token(admin, &["admin"], CallerChannel::WebUi);
    let response = app.get(&uri, Some(&admin_token)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn unknown_job_is_not_found(pool: PgPool) {
    let user = create_user(&pool, "dave", &["pro"]).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let response = app
        .get(&format!("/api/v1/jobs/{}", uuid::Uuid::new_v4()), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn out_of_range_field_is_a_validation_error(pool: PgPool) {
    let user = create_user(&pool, "erin", &["pro"]).await;
    grant(&pool, user, 10).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let response = app
        .post_json(
            "/api/v1/jobs/generation",
            &[bearer(&token)],
            json!({ "prompt": "x", "inference_steps": 500 }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn insufficient_credit_is_payment_required(pool: PgPool) {
    let user = create_user(&pool, "frank", &["pro"]).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let response = app
        .post_json("/api/v1/jobs/voiceover", &[bearer(&token)], json!({ "text": "hello" }))
        .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["code"], "INSUFFICIENT_CREDITS");
    assert!(app.broker.is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn banned_user_is_forbidden(pool: PgPool) {
    let user = create_user(&pool, "grace", &["pro"]).await;
    grant(&pool, user, 10).await;
    gatehouse_db::repositories::UserRepo::set_banned(&pool, user, true)
        .await
        .unwrap();
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let response = app
        .post_json("/api/v1/jobs/upscale", &[bearer(&token)], json!({ "image_url": "s3://in/a.png" }))
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "BANNED");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn second_web_ui_job_over_ceiling_is_rejected(pool: PgPool) {
    let user = create_user(&pool, "heidi", &["free"]).await;
    grant(&pool, user, 10).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["free"], CallerChannel::WebUi);
    let body = json!({ "image_url": "s3://in/a.png" });

    let first = app.post_json("/api/v1/jobs/upscale", &[bearer(&token)], body.clone()).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app.post_json("/api/v1/jobs/upscale", &[bearer(&token)], body).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(second).await["code"], "QUEUE_FULL");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn balance_reflects_debits(pool: PgPool) {
    let user = create_user(&pool, "ivan", &["pro"]).await;
    grant(&pool, user, 7).await;
    let app = build_test_app(pool).await;
    let token = app.token(user, &["pro"], CallerChannel::WebUi);

    let json = body_json(app.get("/api/v1/credits/balance", Some(&token)).await).await;
    assert_eq!(json["data"]["balance"], 7);

    app.post_json("/api/v1/jobs/upscale", &[bearer(&token)], json!({ "image_url": "s3://in/a.png" }))
        .await;

    let json = body_json(app.get("/api/v1/credits/balance", Some(&token)).await).await;
    assert_eq!(json["data"]["balance"], 6);
    assert_eq!(json["data"]["user_id"], user);
}
