//! Read-through cache of lookup data: generation models and admin ids.
//!
//! Constructed explicitly and shared by `Arc`. Loaded once at start-up,
//! refreshed by [`Catalog::run`] on an interval, and reloaded on a lookup
//! miss before the miss is reported, at most once per
//! [`MISS_RELOAD_COOLDOWN`].

use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, PoisonError};
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use gatehouse_core::types::{DbId, Timestamp};
use gatehouse_db::models::generation_model::GenerationModel;
use gatehouse_db::repositories::{GenerationModelRepo, UserRepo};

/// Minimum age of the snapshot before a lookup miss may reload it.
pub const MISS_RELOAD_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Snapshot {
    models: Vec<GenerationModel>,
    admin_ids: HashSet<DbId>,
    loaded_at: Option<Timestamp>,
}

pub struct Catalog {
    pool: PgPool,
    refresh_interval: Duration,
    snapshot: RwLock<Snapshot>,
    miss_reload: Mutex<()>,
}

impl Catalog {
    /// Build the catalog and perform the initial load.
    pub async fn load(pool: PgPool, refresh_interval: Duration) -> Result<Arc<Self>, sqlx::Error> {
        let catalog = Arc::new(Self {
            pool,
            refresh_interval,
            snapshot: RwLock::new(Snapshot::default()),
            miss_reload: Mutex::new(()),
        });
        catalog.reload().await?;
        Ok(catalog)
    }

    /// Re-read every table. The previous snapshot stays in place on error.
    pub async fn reload(&self) -> Result<(), sqlx::Error> {
        let models = GenerationModelRepo::list_active(&self.pool).await?;
        let admin_ids: HashSet<DbId> = UserRepo::admin_ids(&self.pool).await?.into_iter().collect();

        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(
            models = models.len(),
            admins = admin_ids.len(),
            "Catalog reloaded",
        );
        *snapshot = Snapshot {
            models,
            admin_ids,
            loaded_at: Some(chrono::Utc::now()),
        };
        Ok(())
    }

    pub fn loaded_at(&self) -> Option<Timestamp> {
        self.read().loaded_at
    }

    pub fn is_admin(&self, user_id: DbId) -> bool {
        self.read().admin_ids.contains(&user_id)
    }

    pub fn default_model(&self) -> Option<GenerationModel> {
        let snapshot = self.read();
        snapshot
            .models
            .iter()
            .find(|m| m.is_default)
            .or_else(|| snapshot.models.first())
            .cloned()
    }

    /// Resolve a model by name, or the default model when `name` is `None`.
    ///
    /// A miss reloads the snapshot when it is older than
    /// [`MISS_RELOAD_COOLDOWN`], so a model added since the last refresh is
    /// found without waiting for the interval. Misses within the cooldown
    /// are answered from the current snapshot.
    pub async fn resolve_model(&self, name: Option<&str>) -> Result<Option<GenerationModel>, sqlx::Error> {
        if let Some(model) = self.lookup(name) {
            return Ok(Some(model));
        }

        let _reloading = self.miss_reload.lock().await;
        if !self.is_stale() {
            return Ok(self.lookup(name));
        }
        tracing::debug!(model = ?name, "Catalog miss, reloading");
        self.reload().await?;
        Ok(self.lookup(name))
    }

    fn is_stale(&self) -> bool {
        match self.read().loaded_at {
            None => true,
            Some(at) => (chrono::Utc::now() - at)
                .to_std()
                .is_ok_and(|age| age >= MISS_RELOAD_COOLDOWN),
        }
    }

    fn lookup(&self, name: Option<&str>) -> Option<GenerationModel> {
        match name {
            None => self.default_model(),
            Some(name) => self.read().models.iter().find(|m| m.name == name).cloned(),
        }
    }

    /// Refresh on the configured interval until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        // The first tick completes immediately; the initial load already ran.
        ticker.tick().await;
        tracing::info!(
            refresh_secs = self.refresh_interval.as_secs(),
            "Catalog refresher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Catalog refresher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reload().await {
                        tracing::error!(error = %e, "Catalog refresh failed");
                    }
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn add_model(pool: &PgPool, name: &str) {
        sqlx::query("INSERT INTO generation_models (name) VALUES ($1)")
            .bind(name)
            .execute(pool)
            .await
            .unwrap();
    }

    fn age_snapshot(catalog: &Catalog, by: Duration) {
        let mut snapshot = catalog.snapshot.write().unwrap();
        let loaded_at = snapshot.loaded_at.unwrap();
        snapshot.loaded_at = Some(loaded_at - chrono::Duration::from_std(by).unwrap());
    }

    #[sqlx::test(migrations = "../../db/migrations")]
    async fn test_miss_within_cooldown_does_not_reload(pool: PgPool) {
        let catalog = Catalog::load(pool.clone(), Duration::from_secs(300)).await.unwrap();
        let loaded_at = catalog.loaded_at();
        add_model(&pool, "flux-dev").await;

        assert!(catalog.resolve_model(Some("flux-dev")).await.unwrap().is_none());
        assert!(catalog.resolve_model(Some("no-such-model")).await.unwrap().is_none());
        assert_eq!(catalog.loaded_at(), loaded_at);
    }

    #[sqlx::test(migrations = "../../db/migrations")]
    async fn test_miss_on_stale_snapshot_reloads(pool: PgPool) {
        let catalog = Catalog::load(pool.clone(), Duration::from_secs(300)).await.unwrap();
        add_model(&pool, "flux-dev").await;
        age_snapshot(&catalog, MISS_RELOAD_COOLDOWN);

        let model = catalog.resolve_model(Some("flux-dev")).await.unwrap();
        assert_eq!(model.map(|m| m.name).as_deref(), Some("flux-dev"));
    }

    #[sqlx::test(migrations = "../../db/migrations")]
    async fn test_default_model_is_resolved_without_name(pool: PgPool) {
        let catalog = Catalog::load(pool, Duration::from_secs(300)).await.unwrap();
        let model = catalog.resolve_model(None).await.unwrap().unwrap();
        assert_eq!(model.name, "sdxl-base");
    }
}
