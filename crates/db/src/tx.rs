//! Transaction coordinator.
//!
//! [`with_tx`] runs a unit of work on one transaction: commit when the work
//! returns `Ok`, roll back when it returns `Err`. If the work panics the
//! transaction is dropped without commit and sqlx rolls it back when the
//! connection returns to the pool.
//!
//! The work receives `&mut PgConnection`, not the pool, so it cannot open a
//! second top-level transaction from inside the first.

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool};

/// Run `work` inside a fresh transaction on `pool`.
///
/// The closure must return a boxed future borrowing only the connection;
/// capture owned values (`move`) for everything else.
///
/// ```ignore
/// let id = with_tx(&pool, move |conn| Box::pin(async move {
///     let job = JobRepo::create(&mut *conn, &new_job).await?;
///     ledger.deduct(conn, user_id, cost, false).await?;
///     Ok::<_, DispatchError>(job.id)
/// })).await?;
/// ```
pub async fn with_tx<T, E, F>(pool: &PgPool, work: F) -> Result<T, E>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>> + Send,
    T: Send,
    E: From<sqlx::Error> + Send,
{
    let mut tx = pool.begin().await?;

    match work(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}
