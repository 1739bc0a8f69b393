#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use gatehouse_core::callback::OutputDescriptor;
use gatehouse_core::job::{Caller, CallerChannel};
use gatehouse_core::request::JobRequest;
use gatehouse_core::types::{Credits, DbId};
use gatehouse_db::models::credit::{NewCredit, CREDIT_TYPE_PURCHASE};
use gatehouse_db::models::user::NewUser;
use gatehouse_db::repositories::{CreditRepo, CreditTypeRepo, UserRepo};
use gatehouse_dispatch::analytics::{AnalyticsSink, CompletionRecord};
use gatehouse_dispatch::catalog::Catalog;
use gatehouse_dispatch::config::{DispatchConfig, JobTimeouts};
use gatehouse_dispatch::screener::{PassthroughScreener, PromptScreener};
use gatehouse_dispatch::Services;
use gatehouse_queue::{ClaimStore, InMemoryBroker, InMemoryClaimStore, PublishedMessage};

pub const JOB_TIMEOUT: Duration = Duration::from_millis(300);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingAnalytics {
    records: Mutex<Vec<CompletionRecord>>,
}

impl RecordingAnalytics {
    pub fn records(&self) -> Vec<CompletionRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn record(&self, record: CompletionRecord) {
        self.records.lock().unwrap().push(record);
    }
}

pub struct Harness {
    pub services: Services,
    pub broker: Arc<InMemoryBroker>,
    pub claims: Arc<InMemoryClaimStore>,
    pub analytics: Arc<RecordingAnalytics>,
}

/// Short timeouts so timeout paths run in well under a second.
pub fn test_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.timeouts = JobTimeouts {
        generation: JOB_TIMEOUT,
        upscale: JOB_TIMEOUT,
        voiceover: JOB_TIMEOUT,
    };
    config.wait_grace = Duration::from_millis(200);
    config.overflow_penalty = Duration::from_millis(20);
    config.refund_retry_backoff = Duration::from_millis(10);
    config
}

pub async fn harness(pool: PgPool) -> Harness {
    harness_with(pool, test_config(), Arc::new(PassthroughScreener)).await
}

pub async fn harness_with(
    pool: PgPool,
    config: DispatchConfig,
    screener: Arc<dyn PromptScreener>,
) -> Harness {
    build_harness(pool, config, screener, |claims| claims as Arc<dyn ClaimStore>).await
}

/// Like [`harness`], but the services see the claim store through `wrap`.
pub async fn harness_with_claims<F>(pool: PgPool, wrap: F) -> Harness
where
    F: FnOnce(Arc<InMemoryClaimStore>) -> Arc<dyn ClaimStore>,
{
    build_harness(pool, test_config(), Arc::new(PassthroughScreener), wrap).await
}

async fn build_harness<F>(
    pool: PgPool,
    config: DispatchConfig,
    screener: Arc<dyn PromptScreener>,
    wrap: F,
) -> Harness
where
    F: FnOnce(Arc<InMemoryClaimStore>) -> Arc<dyn ClaimStore>,
{
    let catalog = Catalog::load(pool.clone(), config.catalog_refresh)
        .await
        .expect("catalog loads");
    let broker = Arc::new(InMemoryBroker::new());
    let claims = Arc::new(InMemoryClaimStore::new());
    let analytics = Arc::new(RecordingAnalytics::default());
    let services = Services::new(
        pool,
        config,
        catalog,
        broker.clone(),
        wrap(claims.clone()),
        screener,
        analytics.clone(),
    );
    Harness {
        services,
        broker,
        claims,
        analytics,
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub async fn create_user(pool: &PgPool, username: &str, roles: &[&str]) -> DbId {
    UserRepo::create(
        pool,
        &NewUser {
            username: username.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        },
    )
    .await
    .expect("create user")
    .id
}

pub async fn grant(pool: &PgPool, user_id: DbId, amount: Credits, days: i64) {
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
            expires_at: Utc::now() + chrono::Duration::days(days),
        },
    )
    .await
    .expect("grant credit");
}

pub async fn balance(pool: &PgPool, user_id: DbId) -> Credits {
    CreditRepo::balance_non_expired(pool, user_id).await.unwrap()
}

pub fn caller(user_id: DbId, roles: &[&str], channel: CallerChannel) -> Caller {
    Caller {
        user_id,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        is_banned: false,
        channel,
    }
}

pub fn generation(num_outputs: u32) -> JobRequest {
    serde_json::from_value(json!({
        "kind": "generation",
        "prompt": "a lighthouse at dusk",
        "num_outputs": num_outputs,
    }))
    .unwrap()
}

pub fn upscale() -> JobRequest {
    serde_json::from_value(json!({
        "kind": "upscale",
        "image_url": "s3://inputs/photo.png",
        "scale": 2,
    }))
    .unwrap()
}

pub fn output(nsfw: bool) -> OutputDescriptor {
    OutputDescriptor {
        uri: "s3://outputs/1.png".into(),
        mime_type: "image/png".into(),
        width: Some(1024),
        height: Some(1024),
        duration_secs: None,
        nsfw,
    }
}

/// Poll the broker until a message for `routing_key` shows up.
pub async fn next_message(broker: &InMemoryBroker, routing_key: &str) -> PublishedMessage {
    for _ in 0..200 {
        if let Some(message) = broker.take(routing_key) {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no message published under '{routing_key}'");
}
