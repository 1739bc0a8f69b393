//! Request payloads, field bounds, defaults and cost computation.
//!
//! Regular callers get hard validation. Privileged callers skip it: their
//! out-of-range fields are replaced with defaults or clamped instead.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::job::JobKind;
use crate::types::Credits;

// ---------------------------------------------------------------------------
// Bounds and defaults
// ---------------------------------------------------------------------------

pub const MAX_PROMPT_CHARS: usize = 1000;
pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 1536;
/// Latent-space stride; width and height must be multiples of this.
pub const DIMENSION_STEP: u32 = 8;
pub const MAX_OUTPUTS: u32 = 4;
pub const MAX_INFERENCE_STEPS: u32 = 80;
pub const MIN_GUIDANCE_SCALE: f32 = 1.0;
pub const MAX_GUIDANCE_SCALE: f32 = 20.0;
pub const VALID_UPSCALE_FACTORS: &[u32] = &[2, 4];
pub const MAX_VOICEOVER_CHARS: usize = 5000;

pub const DEFAULT_DIMENSION: u32 = 512;
pub const DEFAULT_OUTPUTS: u32 = 1;
pub const DEFAULT_INFERENCE_STEPS: u32 = 30;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.0;
pub const DEFAULT_UPSCALE_FACTOR: u32 = 2;
pub const DEFAULT_VOICEOVER_TEMPERATURE: f32 = 0.7;

/// Characters of voiceover text billed as one credit.
pub const VOICEOVER_CHARS_PER_CREDIT: usize = 100;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

fn default_dimension() -> u32 {
    DEFAULT_DIMENSION
}

fn default_outputs() -> u32 {
    DEFAULT_OUTPUTS
}

fn default_steps() -> u32 {
    DEFAULT_INFERENCE_STEPS
}

fn default_guidance() -> f32 {
    DEFAULT_GUIDANCE_SCALE
}

fn default_upscale_factor() -> u32 {
    DEFAULT_UPSCALE_FACTOR
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 1000))]
    pub prompt: String,
    #[validate(length(max = 1000))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Catalog model name; the catalog default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[validate(range(min = 256, max = 1536))]
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[validate(range(min = 256, max = 1536))]
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[validate(range(min = 1, max = 4))]
    #[serde(default = "default_outputs")]
    pub num_outputs: u32,
    #[validate(range(min = 1, max = 80))]
    #[serde(default = "default_steps")]
    pub inference_steps: u32,
    #[validate(range(min = 1.0, max = 20.0))]
    #[serde(default = "default_guidance")]
    pub guidance_scale: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpscaleRequest {
    #[validate(length(min = 1, max = 2048))]
    pub image_url: String,
    #[serde(default = "default_upscale_factor")]
    pub scale: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct VoiceoverRequest {
    #[validate(length(min = 1, max = 5000))]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A request for any job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobRequest {
    Generation(GenerationRequest),
    Upscale(UpscaleRequest),
    Voiceover(VoiceoverRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Generation(_) => JobKind::Generation,
            JobRequest::Upscale(_) => JobKind::Upscale,
            JobRequest::Voiceover(_) => JobKind::Voiceover,
        }
    }

    /// Ledger units debited for this request.
    pub fn cost(&self) -> Credits {
        match self {
            JobRequest::Generation(r) => Credits::from(r.num_outputs.max(1)),
            JobRequest::Upscale(_) => 1,
            JobRequest::Voiceover(r) => {
                let chars = r.text.chars().count();
                chars.div_ceil(VOICEOVER_CHARS_PER_CREDIT).max(1) as Credits
            }
        }
    }

    /// Enforce field bounds.
    pub fn validate_fields(&self) -> Result<(), CoreError> {
        match self {
            JobRequest::Generation(r) => {
                r.validate()?;
                for (name, value) in [("width", r.width), ("height", r.height)] {
                    if value % DIMENSION_STEP != 0 {
                        return Err(CoreError::Validation(format!(
                            "{name} must be a multiple of {DIMENSION_STEP}"
                        )));
                    }
                }
                Ok(())
            }
            JobRequest::Upscale(r) => {
                r.validate()?;
                if !VALID_UPSCALE_FACTORS.contains(&r.scale) {
                    return Err(CoreError::Validation(format!(
                        "scale must be one of {VALID_UPSCALE_FACTORS:?}"
                    )));
                }
                Ok(())
            }
            JobRequest::Voiceover(r) => Ok(r.validate()?),
        }
    }

    /// Replace or clamp out-of-range fields instead of rejecting them.
    ///
    /// Text fields are truncated to their maximum length; empty text is left
    /// alone since there is nothing sensible to default it to.
    pub fn apply_defaults(&mut self) {
        match self {
            JobRequest::Generation(r) => {
                truncate_chars(&mut r.prompt, MAX_PROMPT_CHARS);
                if let Some(neg) = r.negative_prompt.as_mut() {
                    truncate_chars(neg, MAX_PROMPT_CHARS);
                }
                r.width = snap_dimension(r.width);
                r.height = snap_dimension(r.height);
                if !(1..=MAX_OUTPUTS).contains(&r.num_outputs) {
                    r.num_outputs = DEFAULT_OUTPUTS;
                }
                if !(1..=MAX_INFERENCE_STEPS).contains(&r.inference_steps) {
                    r.inference_steps = DEFAULT_INFERENCE_STEPS;
                }
                if !(MIN_GUIDANCE_SCALE..=MAX_GUIDANCE_SCALE).contains(&r.guidance_scale) {
                    r.guidance_scale = DEFAULT_GUIDANCE_SCALE;
                }
            }
            JobRequest::Upscale(r) => {
                if !VALID_UPSCALE_FACTORS.contains(&r.scale) {
                    r.scale = DEFAULT_UPSCALE_FACTOR;
                }
            }
            JobRequest::Voiceover(r) => {
                truncate_chars(&mut r.text, MAX_VOICEOVER_CHARS);
                if let Some(t) = r.temperature {
                    if !(0.0..=1.0).contains(&t) {
                        r.temperature = Some(DEFAULT_VOICEOVER_TEMPERATURE);
                    }
                }
            }
        }
    }

    /// The free text that goes through content screening, if any.
    pub fn screened_text(&self) -> Option<&str> {
        match self {
            JobRequest::Generation(r) => Some(&r.prompt),
            JobRequest::Upscale(_) => None,
            JobRequest::Voiceover(r) => Some(&r.text),
        }
    }

    /// Replace the screened text (e.g. with its translation).
    pub fn set_screened_text(&mut self, text: String) {
        match self {
            JobRequest::Generation(r) => r.prompt = text,
            JobRequest::Upscale(_) => {}
            JobRequest::Voiceover(r) => r.text = text,
        }
    }

    /// Worker-facing parameters, without the `kind` tag.
    pub fn parameters(&self) -> serde_json::Value {
        let value = match self {
            JobRequest::Generation(r) => serde_json::to_value(r),
            JobRequest::Upscale(r) => serde_json::to_value(r),
            JobRequest::Voiceover(r) => serde_json::to_value(r),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

fn truncate_chars(s: &mut String, max: usize) {
    if let Some((idx, _)) = s.char_indices().nth(max) {
        s.truncate(idx);
    }
}

/// Clamp into the allowed range and round down to the dimension step.
fn snap_dimension(value: u32) -> u32 {
    let clamped = value.clamp(MIN_DIMENSION, MAX_DIMENSION);
    clamped - clamped % DIMENSION_STEP
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
