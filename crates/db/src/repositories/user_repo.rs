//! Repository for the `users` table.

use sqlx::{PgExecutor, PgPool};
use gatehouse_core::roles::ROLE_ADMIN;
use gatehouse_core::types::DbId;

use crate::models::user::{NewUser, User};

const COLUMNS: &str = "id, username, is_banned, roles, created_at, updated_at";

pub struct UserRepo;

impl UserRepo {
    pub async fn create(pool: &PgPool, input: &NewUser) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (username, roles) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(&input.username)
            .bind(&input.roles)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn set_banned(pool: &PgPool, id: DbId, banned: bool) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE users SET is_banned = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(banned)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids of every user holding the admin role.
    pub async fn admin_ids(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT id FROM users WHERE $1 = ANY(roles) ORDER BY id")
            .bind(ROLE_ADMIN)
            .fetch_all(pool)
            .await
    }
}
