//! Credit ledger behaviour against a real database.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use sqlx::PgPool;
use gatehouse_db::models::credit::CREDIT_TYPE_REFUND;
use gatehouse_db::repositories::{CreditRepo, CreditTypeRepo};
use gatehouse_db::{with_tx, CreditLedger, LedgerError};

use common::{create_user, grant, remaining};

async fn deduct(pool: &PgPool, user_id: i64, amount: i64, strict: bool) -> bool {
    let ledger = CreditLedger::default();
    with_tx(pool, move |conn| {
        Box::pin(async move { ledger.deduct(conn, user_id, amount, strict).await })
    })
    .await
    .unwrap()
}

async fn refund(pool: &PgPool, user_id: i64, amount: i64) -> bool {
    let ledger = CreditLedger::default();
    with_tx(pool, move |conn| {
        Box::pin(async move { ledger.refund(conn, user_id, amount).await })
    })
    .await
    .unwrap()
}

// -- deduct -----------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deduct_consumes_rows_in_expiry_order(pool: PgPool) {
    let user = create_user(&pool, "alice").await;
    grant(&pool, user, 1, 3).await;
    grant(&pool, user, 1, 1).await;
    grant(&pool, user, 1, 2).await;

    assert!(deduct(&pool, user, 2, false).await);
    assert_eq!(remaining(&pool, user).await, vec![0, 0, 1]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deduct_exhausts_earlier_row_first(pool: PgPool) {
    let user = create_user(&pool, "bob").await;
    grant(&pool, user, 50, 1).await;
    grant(&pool, user, 50, 2).await;

    assert!(deduct(&pool, user, 70, false).await);
    assert_eq!(remaining(&pool, user).await, vec![0, 30]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deduct_more_than_balance_leaves_rows_unchanged(pool: PgPool) {
    let user = create_user(&pool, "carol").await;
    grant(&pool, user, 3, 1).await;
    grant(&pool, user, 3, 2).await;
    grant(&pool, user, 100, -1).await;

    assert!(!deduct(&pool, user, 7, false).await);
    assert_eq!(remaining(&pool, user).await, vec![100, 3, 3]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_strict_deduct_needs_one_covering_row(pool: PgPool) {
    let user = create_user(&pool, "dave").await;
    grant(&pool, user, 3, 1).await;
    grant(&pool, user, 3, 2).await;

    assert!(!deduct(&pool, user, 5, true).await);
    assert_eq!(remaining(&pool, user).await, vec![3, 3]);

    assert!(deduct(&pool, user, 2, true).await);
    assert_eq!(remaining(&pool, user).await, vec![1, 3]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_negative_deduct_is_inconsistent(pool: PgPool) {
    let user = create_user(&pool, "erin").await;
    let ledger = CreditLedger::default();
    let result = with_tx(&pool, move |conn| {
        Box::pin(async move { ledger.deduct(conn, user, -1, false).await })
    })
    .await;
    assert_matches!(result, Err(LedgerError::Inconsistent(_)));
}

// -- refund -----------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deduct_then_refund_restores_row(pool: PgPool) {
    let user = create_user(&pool, "frank").await;
    grant(&pool, user, 100, 30).await;

    assert!(deduct(&pool, user, 1, false).await);
    assert_eq!(remaining(&pool, user).await, vec![99]);

    assert!(refund(&pool, user, 1).await);
    assert_eq!(remaining(&pool, user).await, vec![100]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_refund_without_live_row_opens_refund_row(pool: PgPool) {
    let user = create_user(&pool, "grace").await;
    grant(&pool, user, 5, -1).await;

    assert!(refund(&pool, user, 4).await);

    let rows = CreditRepo::list_by_user(&pool, user).await.unwrap();
    assert_eq!(rows.len(), 2);
    let refund_type = CreditTypeRepo::find_by_name(&pool, CREDIT_TYPE_REFUND)
        .await
        .unwrap()
        .unwrap();
    let opened = rows.iter().find(|r| r.credit_type_id == refund_type.id).unwrap();
    assert_eq!(opened.remaining_amount, 4);
    assert_eq!(opened.expires_at, CreditLedger::default().never_expires_at());

    let balance = CreditLedger::default().balance_non_expired(&pool, user).await.unwrap();
    assert_eq!(balance, 4);
}

// -- balance ----------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_balance_ignores_expired_rows(pool: PgPool) {
    let user = create_user(&pool, "heidi").await;
    grant(&pool, user, 100, -2).await;
    grant(&pool, user, 7, 1).await;
    grant(&pool, user, 3, 9).await;

    let balance = CreditLedger::default().balance_non_expired(&pool, user).await.unwrap();
    assert_eq!(balance, 10);
}

// -- transaction coordinator ------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_error_in_unit_of_work_rolls_back_deduction(pool: PgPool) {
    let user = create_user(&pool, "ivan").await;
    grant(&pool, user, 10, 5).await;

    let ledger = CreditLedger::default();
    let result: Result<(), LedgerError> = with_tx(&pool, move |conn| {
        Box::pin(async move {
            assert!(ledger.deduct(conn, user, 4, false).await?);
            Err(LedgerError::Inconsistent("later step failed".into()))
        })
    })
    .await;

    assert!(result.is_err());
    assert_eq!(remaining(&pool, user).await, vec![10]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_panic_in_unit_of_work_rolls_back_deduction(pool: PgPool) {
    let user = create_user(&pool, "judy").await;
    grant(&pool, user, 10, 5).await;

    let task_pool = pool.clone();
    let handle = tokio::spawn(async move {
        let ledger = CreditLedger::default();
        let _: Result<(), LedgerError> = with_tx(&task_pool, move |conn| {
            Box::pin(async move {
                ledger.deduct(conn, user, 4, false).await?;
                panic!("boom");
            })
        })
        .await;
    });
    assert!(handle.await.unwrap_err().is_panic());

    assert_eq!(remaining(&pool, user).await, vec![10]);
}

// -- concurrency ------------------------------------------------------------

/// Concurrent deducts never overdraw and the final balance accounts for
/// every successful deduct and refund.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_deduct_and_refund_conserve_balance(pool: PgPool) {
    let user = create_user(&pool, "mallory").await;
    grant(&pool, user, 3, 1).await;
    grant(&pool, user, 4, 2).await;

    let pool = Arc::new(pool);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { deduct(&pool, user, 1, false).await }));
    }
    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 7);
    assert_eq!(remaining(&pool, user).await, vec![0, 0]);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move { refund(&pool, user, 2).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    let balance = CreditLedger::default()
        .balance_non_expired(&*pool, user)
        .await
        .unwrap();
    assert_eq!(balance, 7 - 7 + 6);
}
