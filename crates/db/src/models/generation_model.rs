use serde::Serialize;
use sqlx::FromRow;
use gatehouse_core::types::{DbId, Timestamp};

/// A row from the `generation_models` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationModel {
    pub id: DbId,
    pub name: String,
    pub default_width: i32,
    pub default_height: i32,
    pub max_outputs: i32,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: Timestamp,
}
