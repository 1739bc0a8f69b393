//! Job kinds and how they are routed to the worker fleet.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::roles;
use crate::types::DbId;

/// The three request families that share the job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generation,
    Upscale,
    Voiceover,
}

/// All kinds, in declaration order.
pub const ALL_JOB_KINDS: [JobKind; 3] = [JobKind::Generation, JobKind::Upscale, JobKind::Voiceover];

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Generation => "generation",
            JobKind::Upscale => "upscale",
            JobKind::Voiceover => "voiceover",
        }
    }

    /// Broker routing key for envelopes of this kind.
    pub fn routing_key(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_JOB_KINDS
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job kind '{s}'")))
    }
}

/// Where a request came from, which decides how it is admitted and
/// whether the caller waits for the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerChannel {
    /// Interactive web UI: rejected when the queue is full, never blocks.
    WebUi,
    /// Programmatic API client.
    Api,
    /// Chat bot integration.
    Bot,
}

impl CallerChannel {
    pub fn is_interactive(self) -> bool {
        matches!(self, CallerChannel::WebUi)
    }

    /// Whether the submitting call blocks until the job is terminal.
    pub fn waits_for_result(self) -> bool {
        !self.is_interactive()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallerChannel::WebUi => "web_ui",
            CallerChannel::Api => "api",
            CallerChannel::Bot => "bot",
        }
    }
}

/// The identity submitting a request, as resolved by the HTTP boundary.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: DbId,
    pub roles: Vec<String>,
    pub is_banned: bool,
    pub channel: CallerChannel,
}

impl Caller {
    pub fn is_privileged(&self) -> bool {
        roles::is_privileged(&self.roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ALL_JOB_KINDS {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("painting".parse::<JobKind>().is_err());
    }

    #[test]
    fn only_web_ui_is_interactive() {
        assert!(CallerChannel::WebUi.is_interactive());
        assert!(CallerChannel::Api.waits_for_result());
        assert!(CallerChannel::Bot.waits_for_result());
    }
}
