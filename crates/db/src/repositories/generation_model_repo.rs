//! Repository for the `generation_models` lookup table.

use sqlx::PgPool;

use crate::models::generation_model::GenerationModel;

const COLUMNS: &str =
    "id, name, default_width, default_height, max_outputs, is_default, is_active, created_at";

pub struct GenerationModelRepo;

impl GenerationModelRepo {
    /// All active models, default first.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<GenerationModel>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generation_models \
             WHERE is_active = true \
             ORDER BY is_default DESC, name"
        );
        sqlx::query_as::<_, GenerationModel>(&query)
            .fetch_all(pool)
            .await
    }
}
