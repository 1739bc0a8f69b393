//! Well-known role names and per-role admission ceilings.
//!
//! Role names must match the values the identity provider puts into the
//! `roles` claim and the `users.roles` column.

use std::collections::HashMap;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_PRO: &str = "pro";
pub const ROLE_STARTER: &str = "starter";
pub const ROLE_FREE: &str = "free";
pub const ROLE_BOT: &str = "bot";

/// Roles whose requests skip hard field validation and get defaults instead.
pub const PRIVILEGED_ROLES: &[&str] = &[ROLE_ADMIN];

/// Whether any of `roles` is privileged.
pub fn is_privileged(roles: &[String]) -> bool {
    roles.iter().any(|r| PRIVILEGED_ROLES.contains(&r.as_str()))
}

// ---------------------------------------------------------------------------
// Ceilings
// ---------------------------------------------------------------------------

/// Maximum number of concurrently in-flight jobs a user may hold (`qMax`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    Limited(u32),
    Unbounded,
}

impl Ceiling {
    /// Whether a user currently holding `in_flight` jobs may start one more.
    pub fn admits(self, in_flight: usize) -> bool {
        match self {
            Ceiling::Limited(max) => in_flight < max as usize,
            Ceiling::Unbounded => true,
        }
    }

    /// The larger of two ceilings. `Unbounded` dominates everything.
    pub fn max(self, other: Ceiling) -> Ceiling {
        match (self, other) {
            (Ceiling::Unbounded, _) | (_, Ceiling::Unbounded) => Ceiling::Unbounded,
            (Ceiling::Limited(a), Ceiling::Limited(b)) => Ceiling::Limited(a.max(b)),
        }
    }
}

/// Role -> ceiling lookup with a fallback for users holding no known role.
#[derive(Debug, Clone)]
pub struct CeilingTable {
    by_role: HashMap<String, Ceiling>,
    fallback: Ceiling,
}

impl CeilingTable {
    pub fn new(fallback: Ceiling) -> Self {
        Self {
            by_role: HashMap::new(),
            fallback,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>, ceiling: Ceiling) -> Self {
        self.by_role.insert(role.into(), ceiling);
        self
    }

    /// Compute the ceiling for a user holding `roles`.
    ///
    /// Takes the maximum over every role the user holds, so a user with
    /// several roles is never limited by the lowest one. Roles without an
    /// entry are ignored; if none match, the fallback applies.
    pub fn ceiling_for(&self, roles: &[String]) -> Ceiling {
        roles
            .iter()
            .filter_map(|r| self.by_role.get(r).copied())
            .reduce(Ceiling::max)
            .unwrap_or(self.fallback)
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Broker priority for a user holding `roles`; higher is scheduled first.
///
/// Like ceilings, the best role wins.
pub fn priority_for(roles: &[String]) -> i32 {
    roles
        .iter()
        .map(|r| match r.as_str() {
            ROLE_ADMIN => 100,
            ROLE_PRO => 30,
            ROLE_STARTER => 20,
            ROLE_BOT => 10,
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
