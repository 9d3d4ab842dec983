//! # lectern-db
//!
//! PostgreSQL implementation of the pipeline persistence/log port
//! ([`PgPipelineStore`]), the section summary caches, and [`MemoryStore`]
//! for tests and runs without a database.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lectern_db::Database;
//!
//! let db = Database::connect("postgres://localhost/lectern").await?;
//! db.migrate().await?;
//! let store: Arc<dyn PipelineStore> = Arc::new(db.pipeline.clone());
//! ```

pub mod cache;
pub mod memory;
pub mod pipeline;
pub mod pool;

pub mod test_fixtures;

pub use lectern_core::*;

pub use cache::{FilesystemSummaryCache, MemorySummaryCache, PgSummaryCache};
pub use memory::MemoryStore;
pub use pipeline::PgPipelineStore;
pub use pool::{create_pool, create_pool_with_config, warn_if_saturated, PoolConfig};

/// Pool plus the stores built on it.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub pipeline: PgPipelineStore,
    pub summary_cache: PgSummaryCache,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            pipeline: PgPipelineStore::new(pool.clone()),
            summary_cache: PgSummaryCache::new(pool.clone()),
            pool,
        }
    }

    /// Connect with the pool sized from the environment.
    pub async fn connect(url: &str) -> Result<Self> {
        create_pool(url).await.map(Self::new)
    }

    /// Apply `migrations/`.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// True when a trivial query round-trips.
    pub async fn health_check(&self) -> Result<bool> {
        warn_if_saturated(&self.pool);
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(one == 1)
    }
}
