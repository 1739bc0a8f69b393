#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;
use gatehouse_api::auth::jwt::{generate_token, JwtConfig};
use gatehouse_api::config::ServerConfig;
use gatehouse_api::router::build_app_router;
use gatehouse_api::state::AppState;
use gatehouse_core::job::CallerChannel;
use gatehouse_core::types::{Credits, DbId};
use gatehouse_db::models::credit::{NewCredit, CREDIT_TYPE_PURCHASE};
use gatehouse_db::models::user::NewUser;
use gatehouse_db::repositories::{CreditRepo, CreditTypeRepo, UserRepo};
use gatehouse_dispatch::analytics::TracingAnalytics;
use gatehouse_dispatch::catalog::Catalog;
use gatehouse_dispatch::config::JobTimeouts;
use gatehouse_dispatch::screener::PassthroughScreener;
use gatehouse_dispatch::{DispatchConfig, Services};
use gatehouse_queue::{InMemoryBroker, InMemoryClaimStore};

pub const WORKER_SECRET: &str = "test-worker-secret";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        worker_callback_secret: WORKER_SECRET.to_string(),
        jwt: JwtConfig {
            secret: "test-jwt-secret-that-is-long-enough".to_string(),
            expiry_mins: 15,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub broker: Arc<InMemoryBroker>,
}

impl TestApp {
    pub fn token(&self, user_id: DbId, roles: &[&str], channel: CallerChannel) -> String {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        generate_token(user_id, &roles, channel, &self.state.config.jwt).unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, headers: &[(&str, String)], body: serde_json::Value) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("authorization", format!("Bearer {token}"))
}

pub fn worker_secret() -> (&'static str, String) {
    ("x-worker-secret", WORKER_SECRET.to_string())
}

/// The production router over in-process broker and claim store.
pub async fn build_test_app(pool: PgPool) -> TestApp {
    let mut dispatch_config = DispatchConfig::default();
    dispatch_config.timeouts = JobTimeouts {
        generation: Duration::from_secs(2),
        upscale: Duration::from_secs(2),
        voiceover: Duration::from_secs(2),
    };
    dispatch_config.wait_grace = Duration::from_millis(500);

    let catalog = Catalog::load(pool.clone(), dispatch_config.catalog_refresh)
        .await
        .unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let services = Services::new(
        pool,
        dispatch_config,
        catalog,
        broker.clone(),
        Arc::new(InMemoryClaimStore::new()),
        Arc::new(PassthroughScreener),
        Arc::new(TracingAnalytics),
    );

    let config = test_config();
    let state = AppState {
        services,
        config: Arc::new(config.clone()),
    };
    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        broker,
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn create_user(pool: &PgPool, username: &str, roles: &[&str]) -> DbId {
    UserRepo::create(
        pool,
        &NewUser {
            username: username.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        },
    )
    .await
    .unwrap()
    .id
}

pub async fn grant(pool: &PgPool, user_id: DbId, amount: Credits) {
    let credit_type = CreditTypeRepo::find_by_name(pool, CREDIT_TYPE_PURCHASE)
        .await
        .unwrap()
        .unwrap();
    CreditRepo::create(
        pool,
        &NewCredit {
            user_id,
            credit_type_id: credit_type.id,
            amount,
            expires_at: Utc::now() + chrono::Duration::days(30),
        },
    )
    .await
    .unwrap();
}
