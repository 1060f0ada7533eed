//! Redis-backed lock store.
//!
//! # Guarantees
//!
//! With a single Redis instance this store provides full mutual exclusion,
//! assuming the lock TTL is longer than the critical section.
//!
//! With Redis Cluster or Sentinel, replication is asynchronous: if the
//! master fails right after a lock is written and before the write reaches a
//! replica, the promoted replica has no record and a second client can
//! acquire the same lock. Use the `PostgreSQL` backend when failover must not
//! break exclusion.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate_lock::{LockCoordinator, LockKey, LockRequest};
//! use tollgate_lock_redis::{RedisConfig, RedisLockStore};
//!
//! let store = RedisLockStore::new(&RedisConfig::new("redis://localhost:6379"))?;
//! let coordinator = LockCoordinator::new(Arc::new(store));
//!
//! let request = LockRequest::new(LockKey::new("lock", "job:42")?)
//!     .with_expiration(Duration::from_secs(30));
//! let handle = coordinator.acquire(&request).await?;
//!
//! // Critical section...
//!
//! coordinator.release(&handle).await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::Script;
use tracing::debug;

use tollgate_lock::error::LockError;
use tollgate_lock::key::LockKey;
use tollgate_lock::store::LockStore;
use tollgate_lock::token::LockToken;

use crate::config::RedisConfig;
use crate::scripts;

/// Redis-backed implementation of [`LockStore`].
///
/// Uses `SET NX PX` and compare-then-delete Lua scripts for atomicity. See
/// the [module-level documentation](self) for failover caveats.
pub struct RedisLockStore {
    pool: Pool,
    prefix: String,
    acquire_script: Script,
    release_script: Script,
    refresh_script: Script,
}

impl RedisLockStore {
    /// Create a new `RedisLockStore` from the provided configuration.
    ///
    /// No connection is opened until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if the pool cannot be
    /// created from the configuration.
    pub fn new(config: &RedisConfig) -> Result<Self, LockError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| LockError::InvalidConfiguration(e.to_string()))?
            .map_err(|e| LockError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
            acquire_script: Script::new(scripts::LOCK_ACQUIRE),
            release_script: Script::new(scripts::LOCK_RELEASE),
            refresh_script: Script::new(scripts::LOCK_REFRESH),
        })
    }

    /// Build the full Redis key for a lock: `prefix:{len}:store_id:key`.
    fn redis_key(&self, key: &LockKey) -> String {
        render_key(&self.prefix, key)
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<deadpool_redis::Connection, LockError> {
        self.pool
            .get()
            .await
            .map_err(|e| LockError::StoreUnavailable(e.to_string()))
    }
}

/// The store id is length-prefixed so that a `:` inside it cannot shift the
/// boundary between store id and key.
fn render_key(prefix: &str, key: &LockKey) -> String {
    let store_id = key.store_id();
    format!("{prefix}:{}:{store_id}:{}", store_id.len(), key.key())
}

fn ttl_millis(ttl: Duration) -> i64 {
    // PX rejects 0, so sub-millisecond TTLs round up.
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;
        let result: i64 = self
            .acquire_script
            .key(&redis_key)
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::StoreUnavailable(e.to_string()))?;

        debug!(redis_key = %redis_key, acquired = result == 1, "redis lock acquire");
        Ok(result == 1)
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;
        let result: i64 = self
            .release_script
            .key(&redis_key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::StoreUnavailable(e.to_string()))?;

        Ok(result == 1)
    }

    async fn refresh(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let redis_key = self.redis_key(key);
        let mut conn = self.conn().await?;
        let result: i64 = self
            .refresh_script
            .key(&redis_key)
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::StoreUnavailable(e.to_string()))?;

        Ok(result == 1)
    }
}


#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use std::sync::Arc;

    use tollgate_lock::clock::TokioClock;
    use tollgate_lock::testing::{run_refresh_conformance_tests, run_store_conformance_tests};
    use tollgate_lock::{LockCoordinator, LockRequest};

    use super::*;

    fn test_config() -> RedisConfig {
        RedisConfig {
            url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            prefix: format!("tollgate-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn lock_conformance() {
        let store = RedisLockStore::new(&test_config()).expect("pool creation should succeed");
        run_store_conformance_tests(&store, &TokioClock)
            .await
            .expect("conformance tests should pass");
        run_refresh_conformance_tests(&store, &TokioClock)
            .await
            .expect("refresh conformance tests should pass");
    }

    #[tokio::test]
    async fn coordinator_round_trip() {
        let store = RedisLockStore::new(&test_config()).expect("pool creation should succeed");
        let coordinator = LockCoordinator::new(Arc::new(store));
        let request = LockRequest::new(LockKey::new("lock", "job:42").unwrap())
            .with_timeout(Duration::from_millis(200));

        let held = coordinator.acquire(&request).await.unwrap();
        let err = coordinator.acquire(&request).await.unwrap_err();
        assert!(matches!(err, LockError::AcquisitionTimeout { .. }));
        assert!(coordinator.release(&held).await.unwrap());
        assert!(!coordinator.release(&held).await.unwrap());
    }
}
