//! The message a worker receives for one job.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use gatehouse_core::job::JobKind;
use gatehouse_core::types::{DbId, JobId, Timestamp};

use crate::error::QueueError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Also used as the broker message id.
    pub job_id: JobId,
    pub kind: JobKind,
    pub user_id: DbId,
    /// Worker-side scheduling priority, higher runs first.
    pub priority: i32,
    /// Kind-specific parameters after validation and screening.
    pub parameters: serde_json::Value,
    /// Seconds after which gatehouse will give up on the job.
    pub timeout_secs: u64,
    pub enqueued_at: Timestamp,
}

impl JobEnvelope {
    pub fn new(
        job_id: JobId,
        kind: JobKind,
        user_id: DbId,
        priority: i32,
        parameters: serde_json::Value,
        timeout_secs: u64,
    ) -> Self {
        Self {
            job_id,
            kind,
            user_id,
            priority,
            parameters,
            timeout_secs,
            enqueued_at: Utc::now(),
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.kind.routing_key()
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, QueueError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn payload_keeps_kind_tag_and_parameters() {
        let envelope = JobEnvelope::new(
            Uuid::new_v4(),
            JobKind::Voiceover,
            3,
            10,
            json!({"text": "hello"}),
            180,
        );
        let payload = envelope.to_payload().unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(raw["kind"], "voiceover");
        assert_eq!(raw["parameters"]["text"], "hello");
        assert_eq!(JobEnvelope::from_payload(&payload).unwrap(), envelope);
        assert_eq!(envelope.routing_key(), "voiceover");
    }
}
