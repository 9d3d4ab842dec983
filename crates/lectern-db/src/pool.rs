//! Connection pool sized for the pipeline worker pool.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use lectern_core::{defaults, Error, Result};

/// Pool settings.
///
/// Every worker persists keyframes and appends task log records, so the
/// default size follows the worker count rather than a fixed number.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_workers(defaults::POOL_WORKERS)
    }
}

impl PoolConfig {
    /// Enough connections for `workers` concurrent pipeline tasks.
    pub fn for_workers(workers: usize) -> Self {
        let workers = workers.max(1) as u32;
        Self {
            max_connections: workers * defaults::DB_CONNECTIONS_PER_WORKER
                + defaults::DB_RESERVED_CONNECTIONS,
            acquire_timeout: Duration::from_secs(defaults::DB_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::DB_IDLE_TIMEOUT_SECS),
        }
    }

    /// Size from `LECTERN_POOL_WORKERS`, then apply
    /// `LECTERN_DB_MAX_CONNECTIONS` and `LECTERN_DB_ACQUIRE_TIMEOUT` (seconds).
    pub fn from_env() -> Self {
        let workers = env_parse(defaults::ENV_POOL_WORKERS).unwrap_or(defaults::POOL_WORKERS);
        let mut config = Self::for_workers(workers);
        if let Some(n) = env_parse::<u32>(defaults::ENV_DB_MAX_CONNECTIONS) {
            config.max_connections = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>(defaults::ENV_DB_ACQUIRE_TIMEOUT) {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Connect with [`PoolConfig::from_env`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

/// Warn when every connection is checked out.
pub fn warn_if_saturated(pool: &PgPool) {
    let size = pool.size();
    if size > 0 && pool.num_idle() == 0 {
        warn!(
            subsystem = "database",
            component = "pool",
            pool_size = size,
            "No idle database connections"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_follows_worker_count() {
        assert_eq!(PoolConfig::for_workers(1).max_connections, 4);
        assert_eq!(PoolConfig::for_workers(4).max_connections, 10);
        assert_eq!(PoolConfig::for_workers(0), PoolConfig::for_workers(1));
    }

    #[test]
    fn test_from_env_overrides_and_ignores_garbage() {
        std::env::set_var(defaults::ENV_DB_MAX_CONNECTIONS, "many");
        std::env::set_var(defaults::ENV_DB_ACQUIRE_TIMEOUT, "5");
        let config = PoolConfig::from_env();
        std::env::remove_var(defaults::ENV_DB_MAX_CONNECTIONS);
        std::env::remove_var(defaults::ENV_DB_ACQUIRE_TIMEOUT);

        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert!(config.max_connections >= 4);
    }
}
