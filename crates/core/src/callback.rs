//! Worker -> gatehouse callback message schema.
//!
//! Delivery is at-least-once: the same message may arrive twice, or after
//! the job was already finalized by its timeout. Consumers must treat any
//! message for a terminal job as a no-op.

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Status reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    /// The worker accepted the envelope but has not begun executing it.
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl CallbackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallbackStatus::Succeeded | CallbackStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallbackStatus::Queued => "queued",
            CallbackStatus::Processing => "processing",
            CallbackStatus::Succeeded => "succeeded",
            CallbackStatus::Failed => "failed",
        }
    }
}

/// One produced artifact (image, audio clip, upscaled image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub uri: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Set by the worker's safety classifier.
    #[serde(default)]
    pub nsfw: bool,
}

/// Output validity counters reported with a terminal callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackCounters {
    #[serde(default)]
    pub nsfw_count: u32,
    #[serde(default)]
    pub invalid_count: u32,
}

/// A callback as delivered to the callback processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackMessage {
    pub job_id: JobId,
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,
    #[serde(default)]
    pub counters: CallbackCounters,
}

impl CallbackMessage {
    pub fn processing(job_id: JobId) -> Self {
        Self {
            job_id,
            status: CallbackStatus::Processing,
            error: None,
            outputs: Vec::new(),
            counters: CallbackCounters::default(),
        }
    }

    pub fn succeeded(job_id: JobId, outputs: Vec<OutputDescriptor>) -> Self {
        let nsfw_count = outputs.iter().filter(|o| o.nsfw).count() as u32;
        Self {
            job_id,
            status: CallbackStatus::Succeeded,
            error: None,
            outputs,
            counters: CallbackCounters {
                nsfw_count,
                invalid_count: 0,
            },
        }
    }

    pub fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status: CallbackStatus::Failed,
            error: Some(error.into()),
            outputs: Vec::new(),
            counters: CallbackCounters::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
