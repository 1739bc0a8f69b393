use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use gatehouse_core::types::{Credits, DbId};
use gatehouse_dispatch::DispatchError;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: DbId,
    /// Sum of unexpired credit.
    pub balance: Credits,
}

/// GET /api/v1/credits/balance
pub async fn get_balance(auth: AuthUser, State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let balance = state
        .services
        .ledger
        .balance_non_expired(&state.services.pool, auth.user_id)
        .await
        .map_err(DispatchError::from)?;

    Ok(Json(DataResponse {
        data: BalanceResponse {
            user_id: auth.user_id,
            balance,
        },
    }))
}
