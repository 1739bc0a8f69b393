#![allow(dead_code)]

use chrono::{Duration, Utc};
use sqlx::PgPool;
use gatehouse_core::types::{Credits, DbId};
use gatehouse_db::models::credit::{Credit, NewCredit, CREDIT_TYPE_PURCHASE};
use gatehouse_db::models::user::NewUser;
use gatehouse_db::repositories::{CreditRepo, CreditTypeRepo, UserRepo};

pub async fn create_user(pool: &PgPool, username: &str) -> DbId {
    UserRepo::create(
        pool,
        &NewUser {
            username: username.to_string(),
            roles: vec!["free".to_string()],
        },
    )
    .await
    .expect("create user")
    .id
}

/// Grant `amount` purchase credit expiring `days` from now (negative for
/// already expired rows).
pub async fn grant(pool: &PgPool, user_id: DbId, amount: Credits, days: i64) -> Credit {
    let credit_type = CreditTypeRepo::find_by_name(pool, CREDIT_TYPE_PURCHASE)
        .await
        .unwrap()
        .expect("purchase credit type is seeded");
    CreditRepo::create(
        pool,
        &NewCredit {
            user_id,
            credit_type_id: credit_type.id,
            amount,
            expires_at: Utc::now() + Duration::days(days),
        },
    )
    .await
    .expect("grant credit")
}

/// Remaining amounts of the user's rows in spending order.
pub async fn remaining(pool: &PgPool, user_id: DbId) -> Vec<Credits> {
    CreditRepo::list_by_user(pool, user_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.remaining_amount)
        .collect()
}
