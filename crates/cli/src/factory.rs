use std::sync::Arc;

use tollgate_lock::{LockError, LockStore, StoreRegistry};
use tollgate_lock_memory::MemoryLockStore;
use tollgate_lock_postgres::{PostgresConfig, PostgresLockStore};
use tollgate_lock_redis::{RedisConfig, RedisLockStore};

use crate::config::StoreConfig;

/// Build a registry holding the backend named in `[store]`.
pub async fn create_registry(config: &StoreConfig) -> Result<StoreRegistry, LockError> {
    let store = create_store(config).await?;
    let mut registry = StoreRegistry::new();
    registry.register(config.backend.clone(), store);
    Ok(registry)
}

/// Construct the `LockStore` selected by `config.backend`.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn LockStore>, LockError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryLockStore::new())),
        "redis" => create_redis(config),
        "postgres" => create_postgres(config).await,
        other => Err(LockError::InvalidConfiguration(format!(
            "unsupported lock store backend: {other}"
        ))),
    }
}

fn create_redis(config: &StoreConfig) -> Result<Arc<dyn LockStore>, LockError> {
    let defaults = RedisConfig::default();
    let redis_config = RedisConfig {
        url: config.url.clone().unwrap_or(defaults.url),
        prefix: config.prefix.clone().unwrap_or(defaults.prefix),
        ..defaults
    };
    Ok(Arc::new(RedisLockStore::new(&redis_config)?))
}

async fn create_postgres(config: &StoreConfig) -> Result<Arc<dyn LockStore>, LockError> {
    let url = config.url.as_deref().ok_or_else(|| {
        LockError::InvalidConfiguration("postgres backend requires 'url' in [store]".into())
    })?;
    let defaults = PostgresConfig::default();
    let pg_config = PostgresConfig {
        url: url.to_owned(),
        table_prefix: config.prefix.clone().unwrap_or(defaults.table_prefix),
        ..defaults
    };
    Ok(Arc::new(PostgresLockStore::new(pg_config).await?))
}
