//! Deduction planning over a user's credit rows.
//!
//! The database layer loads the candidate rows and applies the plan; the
//! ordering policy lives here so it can be tested without a database.
//!
//! Policy: soonest-expiring credit is spent first, so short-lived grants are
//! used before they lapse. A plan either covers the whole amount or does not
//! exist; partial plans are never produced.

use crate::types::{Credits, DbId, Timestamp};

/// A credit row as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditSlice {
    pub credit_id: DbId,
    pub remaining: Credits,
    pub expires_at: Timestamp,
}

/// Take `amount` from the credit row `credit_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debit {
    pub credit_id: DbId,
    pub amount: Credits,
}

/// Rows that may be spent at `now`, in spending order (expiry, then id).
fn spendable(slices: &[CreditSlice], now: Timestamp) -> Vec<CreditSlice> {
    let mut rows: Vec<CreditSlice> = slices
        .iter()
        .copied()
        .filter(|s| s.expires_at > now && s.remaining > 0)
        .collect();
    rows.sort_by_key(|s| (s.expires_at, s.credit_id));
    rows
}

/// Spread `amount` across rows in ascending expiry, exhausting each row
/// before touching the next.
///
/// Returns `None` when the unexpired total cannot cover `amount`. An
/// `amount` of zero yields an empty plan.
pub fn plan_deduction(slices: &[CreditSlice], amount: Credits, now: Timestamp) -> Option<Vec<Debit>> {
    if amount < 0 {
        return None;
    }
    let mut outstanding = amount;
    let mut plan = Vec::new();
    for slice in spendable(slices, now) {
        if outstanding == 0 {
            break;
        }
        let take = slice.remaining.min(outstanding);
        plan.push(Debit {
            credit_id: slice.credit_id,
            amount: take,
        });
        outstanding -= take;
    }
    (outstanding == 0).then_some(plan)
}

/// Pick the row a refund is credited to: the soonest-expiring unexpired row.
///
/// `None` means the user has no unexpired row and the refund must open a
/// new ledger row.
pub fn refund_target(slices: &[CreditSlice], now: Timestamp) -> Option<DbId> {
    slices
        .iter()
        .filter(|s| s.expires_at > now)
        .min_by_key(|s| (s.expires_at, s.credit_id))
        .map(|s| s.credit_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
