//! Bearer-token extractor resolving the submitting [`Caller`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use gatehouse_core::error::CoreError;
use gatehouse_core::job::{Caller, CallerChannel};
use gatehouse_core::roles::ROLE_ADMIN;
use gatehouse_core::types::DbId;
use gatehouse_db::repositories::UserRepo;

use crate::auth::jwt::validate_token;
use crate::error::AppError;
use crate::state::AppState;

/// Authenticated user. Roles and channel come from the token, the ban
/// flag from the `users` row.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: DbId,
    pub roles: Vec<String>,
    pub channel: CallerChannel,
    pub is_banned: bool,
}

impl AuthUser {
    pub fn caller(&self) -> Caller {
        Caller {
            user_id: self.user_id,
            roles: self.roles.clone(),
            is_banned: self.is_banned,
            channel: self.channel,
        }
    }

    pub fn is_admin(&self, state: &AppState) -> bool {
        self.roles.iter().any(|r| r == ROLE_ADMIN) || state.services.catalog.is_admin(self.user_id)
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CoreError::Unauthorized("Missing Authorization header".into()))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            CoreError::Unauthorized("Invalid Authorization format. Expected: Bearer <token>".into())
        })?;

        let claims = validate_token(token, &state.config.jwt)
            .map_err(|_| CoreError::Unauthorized("Invalid or expired token".into()))?;

        let user = UserRepo::find_by_id(&state.services.pool, claims.sub)
            .await?
            .ok_or_else(|| CoreError::Unauthorized("Unknown user".into()))?;

        Ok(AuthUser {
            user_id: user.id,
            roles: claims.roles,
            channel: claims.channel,
            is_banned: user.is_banned,
        })
    }
}
