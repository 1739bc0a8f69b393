//! Repository for the `credits` and `credit_types` tables.
//!
//! Row-level primitives only. Spending and refund policy is composed in
//! [`crate::ledger::CreditLedger`].

use sqlx::{PgConnection, PgExecutor};
use gatehouse_core::types::{Credits, DbId, Timestamp};

use crate::models::credit::{Credit, CreditType, NewCredit};

const COLUMNS: &str = "\
    id, user_id, credit_type_id, remaining_amount, expires_at, \
    replenished_at, created_at, updated_at";

pub struct CreditRepo;

impl CreditRepo {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &NewCredit,
    ) -> Result<Credit, sqlx::Error> {
        let query = format!(
            "INSERT INTO credits (user_id, credit_type_id, remaining_amount, expires_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Credit>(&query)
            .bind(input.user_id)
            .bind(input.credit_type_id)
            .bind(input.amount)
            .bind(input.expires_at)
            .fetch_one(executor)
            .await
    }

    /// Every credit row of a user, expired ones included, in spending order.
    pub async fn list_by_user<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
    ) -> Result<Vec<Credit>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM credits WHERE user_id = $1 ORDER BY expires_at, id"
        );
        sqlx::query_as::<_, Credit>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    /// Lock and return the user's rows still unexpired at `now`, in
    /// spending order. Locks are held until the transaction ends.
    pub async fn lock_unexpired(
        conn: &mut PgConnection,
        user_id: DbId,
        now: Timestamp,
    ) -> Result<Vec<Credit>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM credits \
             WHERE user_id = $1 AND expires_at > $2 \
             ORDER BY expires_at, id \
             FOR UPDATE"
        );
        sqlx::query_as::<_, Credit>(&query)
            .bind(user_id)
            .bind(now)
            .fetch_all(conn)
            .await
    }

    /// Take `amount` from the single soonest-expiring unexpired row that can
    /// cover it alone. Returns the debited row id, or `None` if no row fits.
    pub async fn deduct_single<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
        amount: Credits,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "UPDATE credits \
             SET remaining_amount = remaining_amount - $2, updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM credits \
                 WHERE user_id = $1 AND expires_at > NOW() AND remaining_amount >= $2 \
                 ORDER BY expires_at, id \
                 LIMIT 1 \
                 FOR UPDATE \
             ) AND remaining_amount >= $2 \
             RETURNING id",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(executor)
        .await
    }

    /// Take `amount` from row `credit_id`. Returns `false` when the row no
    /// longer holds enough.
    pub async fn debit_row<'e, E: PgExecutor<'e>>(
        executor: E,
        credit_id: DbId,
        amount: Credits,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE credits \
             SET remaining_amount = remaining_amount - $2, updated_at = NOW() \
             WHERE id = $1 AND remaining_amount >= $2",
        )
        .bind(credit_id)
        .bind(amount)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add `amount` back to row `credit_id`.
    pub async fn credit_row<'e, E: PgExecutor<'e>>(
        executor: E,
        credit_id: DbId,
        amount: Credits,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE credits \
             SET remaining_amount = remaining_amount + $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(credit_id)
        .bind(amount)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sum of `remaining_amount` over the user's unexpired rows.
    pub async fn balance_non_expired<'e, E: PgExecutor<'e>>(
        executor: E,
        user_id: DbId,
    ) -> Result<Credits, sqlx::Error> {
        sqlx::query_scalar::<_, Credits>(
            "SELECT COALESCE(SUM(remaining_amount), 0)::BIGINT FROM credits \
             WHERE user_id = $1 AND expires_at > NOW()",
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }
}

pub struct CreditTypeRepo;

impl CreditTypeRepo {
    pub async fn find_by_name<'e, E: PgExecutor<'e>>(
        executor: E,
        name: &str,
    ) -> Result<Option<CreditType>, sqlx::Error> {
        sqlx::query_as::<_, CreditType>(
            "SELECT id, name, created_at FROM credit_types WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(executor)
        .await
    }
}
