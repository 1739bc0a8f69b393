//! Content screening of prompt and voiceover text.
//!
//! Runs inside the admission transaction after the debit, so a flagged
//! request rolls the debit back with everything else.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenVerdict {
    /// Possibly rewritten text (e.g. translated) to send to the worker.
    Accepted(String),
    Flagged(String),
}

#[async_trait]
pub trait PromptScreener: Send + Sync {
    async fn screen(&self, text: &str) -> Result<ScreenVerdict, DispatchError>;
}

/// Accepts everything unchanged.
pub struct PassthroughScreener;

#[async_trait]
impl PromptScreener for PassthroughScreener {
    async fn screen(&self, text: &str) -> Result<ScreenVerdict, DispatchError> {
        Ok(ScreenVerdict::Accepted(text.to_string()))
    }
}

/// Flags text matching any configured pattern, case-insensitively.
pub struct BlocklistScreener {
    patterns: Vec<Regex>,
}

impl BlocklistScreener {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

#[async_trait]
impl PromptScreener for BlocklistScreener {
    async fn screen(&self, text: &str) -> Result<ScreenVerdict, DispatchError> {
        match self.patterns.iter().find(|p| p.is_match(text)) {
            Some(pattern) => {
                tracing::warn!(pattern = pattern.as_str(), "Prompt flagged by blocklist");
                Ok(ScreenVerdict::Flagged(format!(
                    "Text matches blocked pattern '{}'",
                    pattern.as_str()
                )))
            }
            None => Ok(ScreenVerdict::Accepted(text.to_string())),
        }
    }
}

/// Blocklist screener when `patterns` is non-empty, passthrough otherwise.
pub fn from_patterns(patterns: &[String]) -> Result<Arc<dyn PromptScreener>, regex::Error> {
    if patterns.is_empty() {
        return Ok(Arc::new(PassthroughScreener));
    }
    Ok(Arc::new(BlocklistScreener::new(patterns)?))
}
