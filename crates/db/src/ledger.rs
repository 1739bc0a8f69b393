//! Credit ledger: expiration-ordered deduction, refund and balance.
//!
//! Deduct and refund take a transaction-scoped connection so the debit
//! commits or rolls back together with whatever else the caller does in the
//! same unit of work (job creation, status change).

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{PgConnection, PgExecutor};
use gatehouse_core::ledger::{plan_deduction, refund_target, CreditSlice};
use gatehouse_core::types::{Credits, DbId, Timestamp};

use crate::models::credit::{NewCredit, CREDIT_TYPE_REFUND};
use crate::repositories::{CreditRepo, CreditTypeRepo};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The rows changed between planning and applying a deduction, or an
    /// amount was negative. The surrounding transaction must roll back.
    #[error("Ledger inconsistency: {0}")]
    Inconsistent(String),
}

/// Default expiry for refund rows created when the user has no live row.
pub fn default_never_expires_at() -> Timestamp {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Copy)]
pub struct CreditLedger {
    never_expires_at: Timestamp,
}

impl CreditLedger {
    pub fn new(never_expires_at: Timestamp) -> Self {
        Self { never_expires_at }
    }

    pub fn never_expires_at(&self) -> Timestamp {
        self.never_expires_at
    }

    /// Subtract `amount` from the user's unexpired credit.
    ///
    /// With `strict` the whole amount must come from one row (the
    /// soonest-expiring row that can cover it). Otherwise the amount is
    /// spread across rows in ascending `expires_at`, each exhausted before
    /// the next is touched.
    ///
    /// `Ok(false)` means insufficient credit; nothing was changed.
    pub async fn deduct(
        &self,
        conn: &mut PgConnection,
        user_id: DbId,
        amount: Credits,
        strict: bool,
    ) -> Result<bool, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::Inconsistent(format!(
                "Negative deduction of {amount} for user {user_id}"
            )));
        }
        if amount == 0 {
            return Ok(true);
        }

        if strict {
            let debited = CreditRepo::deduct_single(&mut *conn, user_id, amount).await?;
            return Ok(debited.is_some());
        }

        let now = transaction_now(&mut *conn).await?;
        let rows = CreditRepo::lock_unexpired(&mut *conn, user_id, now).await?;
        let slices: Vec<CreditSlice> = rows.iter().map(CreditSlice::from).collect();

        let Some(plan) = plan_deduction(&slices, amount, now) else {
            tracing::debug!(user_id, amount, "Insufficient credit for deduction");
            return Ok(false);
        };

        for debit in &plan {
            if !CreditRepo::debit_row(&mut *conn, debit.credit_id, debit.amount).await? {
                return Err(LedgerError::Inconsistent(format!(
                    "Credit row {} could not cover planned debit of {}",
                    debit.credit_id, debit.amount
                )));
            }
        }

        tracing::debug!(user_id, amount, rows = plan.len(), "Credit deducted");
        Ok(true)
    }

    /// Give `amount` back to the user.
    ///
    /// Credited to the soonest-expiring unexpired row; when the user has
    /// none, a new row of the `refund` credit type is opened that never
    /// expires. `Ok(false)` only if that credit type is missing.
    pub async fn refund(
        &self,
        conn: &mut PgConnection,
        user_id: DbId,
        amount: Credits,
    ) -> Result<bool, LedgerError> {
        if amount < 0 {
            return Err(LedgerError::Inconsistent(format!(
                "Negative refund of {amount} for user {user_id}"
            )));
        }
        if amount == 0 {
            return Ok(true);
        }

        let now = transaction_now(&mut *conn).await?;
        let rows = CreditRepo::lock_unexpired(&mut *conn, user_id, now).await?;
        let slices: Vec<CreditSlice> = rows.iter().map(CreditSlice::from).collect();

        if let Some(credit_id) = refund_target(&slices, now) {
            let credited = CreditRepo::credit_row(&mut *conn, credit_id, amount).await?;
            tracing::debug!(user_id, amount, credit_id, "Credit refunded to existing row");
            return Ok(credited);
        }

        let Some(refund_type) = CreditTypeRepo::find_by_name(&mut *conn, CREDIT_TYPE_REFUND).await?
        else {
            tracing::error!(user_id, amount, "Refund credit type is missing");
            return Ok(false);
        };

        let row = CreditRepo::create(
            &mut *conn,
            &NewCredit {
                user_id,
                credit_type_id: refund_type.id,
                amount,
                expires_at: self.never_expires_at,
            },
        )
        .await?;
        tracing::debug!(user_id, amount, credit_id = row.id, "Credit refunded to new row");
        Ok(true)
    }

    /// Sum of remaining credit over the user's unexpired rows.
    pub async fn balance_non_expired<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        user_id: DbId,
    ) -> Result<Credits, LedgerError> {
        Ok(CreditRepo::balance_non_expired(executor, user_id).await?)
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self::new(default_never_expires_at())
    }
}

/// Transaction start time, so planning and the `expires_at` filter agree.
async fn transaction_now(conn: &mut PgConnection) -> Result<Timestamp, sqlx::Error> {
    sqlx::query_scalar::<_, Timestamp>("SELECT NOW()")
        .fetch_one(conn)
        .await
}
