//! Publish side of the worker queue.
//!
//! Delivery is at-least-once and the message id is always the job id, so
//! workers and the callback processor can correlate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use redis::AsyncCommands;
use gatehouse_core::types::JobId;

use crate::envelope::JobEnvelope;
use crate::error::QueueError;

const KEY_PREFIX: &str = "gatehouse";

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        routing_key: &str,
        message_id: JobId,
        payload: Vec<u8>,
        priority: i32,
    ) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Serialize `envelope` and publish it under its kind's routing key.
pub async fn publish_envelope(broker: &dyn Broker, envelope: &JobEnvelope) -> Result<(), QueueError> {
    broker
        .publish(
            envelope.routing_key(),
            envelope.job_id,
            envelope.to_payload()?,
            envelope.priority,
        )
        .await
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

/// One sorted set per routing key (score = priority, member = message id)
/// plus one hash holding the payloads. Workers pop the highest score.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn queue_key(routing_key: &str) -> String {
        format!("{KEY_PREFIX}:queue:{routing_key}")
    }

    fn payload_key(routing_key: &str) -> String {
        format!("{KEY_PREFIX}:payload:{routing_key}")
    }

    /// Number of messages waiting under `routing_key`.
    pub async fn depth(&self, routing_key: &str) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.zcard(Self::queue_key(routing_key)).await?;
        Ok(depth)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(
        &self,
        routing_key: &str,
        message_id: JobId,
        payload: Vec<u8>,
        priority: i32,
    ) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let member = message_id.to_string();
        redis::pipe()
            .atomic()
            .hset(Self::payload_key(routing_key), &member, payload)
            .ignore()
            .zadd(Self::queue_key(routing_key), &member, priority)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        tracing::debug!(routing_key, message_id = %message_id, priority, "Published job envelope");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub message_id: JobId,
    pub payload: Vec<u8>,
    pub priority: i32,
}

impl PublishedMessage {
    pub fn envelope(&self) -> Result<JobEnvelope, QueueError> {
        JobEnvelope::from_payload(&self.payload)
    }
}

/// Process-local broker. Messages stay until taken.
#[derive(Default)]
pub struct InMemoryBroker {
    messages: Mutex<Vec<PublishedMessage>>,
    unavailable: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of everything published and not yet taken.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the highest-priority message for `routing_key`.
    /// Equal priorities come out in publish order.
    pub fn take(&self, routing_key: &str) -> Option<PublishedMessage> {
        let mut messages = self.lock();
        let index = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.routing_key == routing_key)
            .max_by_key(|(i, m)| (m.priority, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)?;
        Some(messages.remove(index))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PublishedMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        routing_key: &str,
        message_id: JobId,
        payload: Vec<u8>,
        priority: i32,
    ) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory broker disabled".into()));
        }
        self.lock().push(PublishedMessage {
            routing_key: routing_key.to_string(),
            message_id,
            payload,
            priority,
        });
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory broker disabled".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
