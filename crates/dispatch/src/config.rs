//! Dispatch configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatehouse_core::job::JobKind;
use gatehouse_core::roles::{
    Ceiling, CeilingTable, ROLE_ADMIN, ROLE_BOT, ROLE_FREE, ROLE_PRO, ROLE_STARTER,
};
use gatehouse_core::types::Timestamp;
use gatehouse_db::ledger::default_never_expires_at;

/// Extra lifetime given to claim markers beyond the job timeout and grace.
const CLAIM_TTL_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{var} must be set")]
    Missing { var: &'static str },
}

#[derive(Debug, Clone)]
pub struct JobTimeouts {
    pub generation: Duration,
    pub upscale: Duration,
    pub voiceover: Duration,
}

impl JobTimeouts {
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Generation => self.generation,
            JobKind::Upscale => self.upscale,
            JobKind::Voiceover => self.voiceover,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-role concurrent job ceilings (`qMax`).
    pub ceilings: CeilingTable,
    /// Hard cap on callers waiting in one user's overflow queue.
    pub overflow_max: usize,
    /// Per-waiter sleep unit; a waiter sleeps `penalty * overflow_size`.
    pub overflow_penalty: Duration,
    /// Queue-depth entries stop counting after this long.
    pub queue_entry_ttl: Duration,
    pub timeouts: JobTimeouts,
    /// How much longer than the job timeout a synchronous waiter listens.
    pub wait_grace: Duration,
    pub refund_retry_attempts: u32,
    /// Linear backoff unit between refund attempts.
    pub refund_retry_backoff: Duration,
    pub catalog_refresh: Duration,
    /// Expiry of refund rows opened when the user has no live credit row.
    pub never_expires_at: Timestamp,
    /// Case-insensitive regex patterns rejected by the blocklist screener.
    pub prompt_blocklist: Vec<String>,
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                |
    /// |---------------------------|------------------------|
    /// | `QMAX_FREE`               | `1`                    |
    /// | `QMAX_STARTER`            | `2`                    |
    /// | `QMAX_PRO`                | `4`                    |
    /// | `QMAX_BOT`                | `2`                    |
    /// | `OVERFLOW_MAX`            | `10`                   |
    /// | `OVERFLOW_PENALTY_MS`     | `1000`                 |
    /// | `QUEUE_ENTRY_TTL_SECS`    | `600`                  |
    /// | `GENERATION_TIMEOUT_SECS` | `180`                  |
    /// | `UPSCALE_TIMEOUT_SECS`    | `180`                  |
    /// | `VOICEOVER_TIMEOUT_SECS`  | `180`                  |
    /// | `WAIT_GRACE_SECS`         | `10`                   |
    /// | `REFUND_RETRY_ATTEMPTS`   | `3`                    |
    /// | `REFUND_RETRY_BACKOFF_MS` | `200`                  |
    /// | `CATALOG_REFRESH_SECS`    | `300`                  |
    /// | `CREDIT_NEVER_EXPIRES_AT` | `2100-01-01T00:00:00Z` |
    /// | `PROMPT_BLOCKLIST`        | (empty)                |
    ///
    /// Admins are always unbounded.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let qmax_free: u32 = parse_or(&lookup, "QMAX_FREE", 1)?;
        let qmax_starter: u32 = parse_or(&lookup, "QMAX_STARTER", 2)?;
        let qmax_pro: u32 = parse_or(&lookup, "QMAX_PRO", 4)?;
        let qmax_bot: u32 = parse_or(&lookup, "QMAX_BOT", 2)?;

        let ceilings = CeilingTable::new(Ceiling::Limited(qmax_free))
            .with_role(ROLE_FREE, Ceiling::Limited(qmax_free))
            .with_role(ROLE_STARTER, Ceiling::Limited(qmax_starter))
            .with_role(ROLE_PRO, Ceiling::Limited(qmax_pro))
            .with_role(ROLE_BOT, Ceiling::Limited(qmax_bot))
            .with_role(ROLE_ADMIN, Ceiling::Unbounded);

        let never_expires_at = match lookup("CREDIT_NEVER_EXPIRES_AT") {
            Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .map_err(|e| ConfigError::Invalid {
                    var: "CREDIT_NEVER_EXPIRES_AT",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?
                .with_timezone(&Utc),
            None => default_never_expires_at(),
        };

        let prompt_blocklist = lookup("PROMPT_BLOCKLIST")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            ceilings,
            overflow_max: parse_or(&lookup, "OVERFLOW_MAX", 10)?,
            overflow_penalty: Duration::from_millis(parse_or(&lookup, "OVERFLOW_PENALTY_MS", 1000)?),
            queue_entry_ttl: Duration::from_secs(parse_or(&lookup, "QUEUE_ENTRY_TTL_SECS", 600)?),
            timeouts: JobTimeouts {
                generation: Duration::from_secs(parse_or(&lookup, "GENERATION_TIMEOUT_SECS", 180)?),
                upscale: Duration::from_secs(parse_or(&lookup, "UPSCALE_TIMEOUT_SECS", 180)?),
                voiceover: Duration::from_secs(parse_or(&lookup, "VOICEOVER_TIMEOUT_SECS", 180)?),
            },
            wait_grace: Duration::from_secs(parse_or(&lookup, "WAIT_GRACE_SECS", 10)?),
            refund_retry_attempts: parse_or(&lookup, "REFUND_RETRY_ATTEMPTS", 3)?,
            refund_retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "REFUND_RETRY_BACKOFF_MS",
                200,
            )?),
            catalog_refresh: Duration::from_secs(positive_or(&lookup, "CATALOG_REFRESH_SECS", 300)?),
            never_expires_at,
            prompt_blocklist,
        })
    }

    pub fn timeout_for(&self, kind: JobKind) -> Duration {
        self.timeouts.for_kind(kind)
    }

    /// Claim markers must outlive the watchdog and the waiter's grace.
    pub fn claim_ttl(&self, kind: JobKind) -> Duration {
        self.timeout_for(kind) + self.wait_grace + CLAIM_TTL_MARGIN
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        // With no variables set every value takes its default and parsing
        // cannot fail.
        match Self::from_lookup(|_| None) {
            Ok(config) => config,
            Err(e) => unreachable!("default dispatch config is invalid: {e}"),
        }
    }
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// [`parse_or`] for values that must be greater than zero.
fn positive_or<F>(lookup: &F, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, var, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
