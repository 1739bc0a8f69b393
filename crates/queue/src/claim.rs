//! Per-job claim markers.
//!
//! A marker is armed when a job is dispatched. Finalizing the job (by
//! callback or by timeout) first claims the marker; the claim deletes it
//! and succeeds for exactly one caller. Everyone else sees `false`.
//!
//! Markers carry a TTL as a leak bound, so it must comfortably exceed the
//! job timeout: an expired marker can no longer be claimed.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use gatehouse_core::types::JobId;

use crate::error::QueueError;

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Create (or refresh) the marker for `job_id`.
    async fn arm(&self, job_id: JobId, ttl: Duration) -> Result<(), QueueError>;

    /// Atomically delete the marker. `true` for exactly one caller.
    async fn claim(&self, job_id: JobId) -> Result<bool, QueueError>;

    async fn is_armed(&self, job_id: JobId) -> Result<bool, QueueError>;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// `SET key 1 EX ttl` to arm, `DEL key` to claim (DEL returns 1 once).
pub struct RedisClaimStore {
    client: redis::Client,
}

impl RedisClaimStore {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn key(job_id: JobId) -> String {
        format!("gatehouse:claim:{job_id}")
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn arm(&self, job_id: JobId, ttl: Duration) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(Self::key(job_id), 1, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn claim(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let deleted: i64 = conn.del(Self::key(job_id)).await?;
        Ok(deleted == 1)
    }

    async fn is_armed(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(Self::key(job_id)).await?;
        Ok(exists)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local markers with the same expiry semantics as Redis.
#[derive(Default)]
pub struct InMemoryClaimStore {
    markers: Mutex<HashMap<JobId, Instant>>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Instant>> {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn arm(&self, job_id: JobId, ttl: Duration) -> Result<(), QueueError> {
        let mut markers = self.lock();
        let now = Instant::now();
        markers.retain(|_, deadline| *deadline > now);
        markers.insert(job_id, now + ttl);
        Ok(())
    }

    async fn claim(&self, job_id: JobId) -> Result<bool, QueueError> {
        Ok(self
            .lock()
            .remove(&job_id)
            .is_some_and(|deadline| deadline > Instant::now()))
    }

    async fn is_armed(&self, job_id: JobId) -> Result<bool, QueueError> {
        Ok(self
            .lock()
            .get(&job_id)
            .is_some_and(|deadline| *deadline > Instant::now()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
