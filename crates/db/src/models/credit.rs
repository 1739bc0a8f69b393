//! Credit ledger rows.

use serde::Serialize;
use sqlx::FromRow;
use gatehouse_core::ledger::CreditSlice;
use gatehouse_core::types::{Credits, DbId, Timestamp};

/// Well-known credit type names seeded by the migrations.
pub const CREDIT_TYPE_FREE: &str = "free";
pub const CREDIT_TYPE_SUBSCRIPTION: &str = "subscription";
pub const CREDIT_TYPE_PURCHASE: &str = "purchase";
pub const CREDIT_TYPE_REFUND: &str = "refund";

/// A row from the `credit_types` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditType {
    pub id: DbId,
    pub name: String,
    pub created_at: Timestamp,
}

/// A row from the `credits` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Credit {
    pub id: DbId,
    pub user_id: DbId,
    pub credit_type_id: DbId,
    pub remaining_amount: Credits,
    pub expires_at: Timestamp,
    pub replenished_at: Timestamp,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Credit> for CreditSlice {
    fn from(row: &Credit) -> Self {
        CreditSlice {
            credit_id: row.id,
            remaining: row.remaining_amount,
            expires_at: row.expires_at,
        }
    }
}

/// Insert payload for a credit grant.
#[derive(Debug, Clone)]
pub struct NewCredit {
    pub user_id: DbId,
    pub credit_type_id: DbId,
    pub amount: Credits,
    pub expires_at: Timestamp,
}
