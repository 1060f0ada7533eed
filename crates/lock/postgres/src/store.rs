use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use tracing::debug;

use tollgate_lock::error::LockError;
use tollgate_lock::key::LockKey;
use tollgate_lock::store::LockStore;
use tollgate_lock::token::LockToken;

use crate::config::PostgresConfig;
use crate::migrations;

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
fn build_connect_options(config: &PostgresConfig) -> Result<PgConnectOptions, LockError> {
    let mut options: PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| LockError::InvalidConfiguration(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => PgSslMode::Disable,
            "prefer" => PgSslMode::Prefer,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,
            other => {
                return Err(LockError::InvalidConfiguration(format!(
                    "unknown ssl_mode: {other}"
                )));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    if let Some(ref path) = config.ssl_cert {
        options = options.ssl_client_cert(path);
    }

    if let Some(ref path) = config.ssl_key {
        options = options.ssl_client_key(path);
    }

    Ok(options)
}

/// SQL statements rendered once for the configured table.
///
/// Every comparison against `expires_at` uses the server's `NOW()`.
#[derive(Debug)]
struct Queries {
    acquire: String,
    release: String,
    refresh: String,
    purge: String,
}

impl Queries {
    fn for_table(table: &str) -> Self {
        Self {
            // Inserts a fresh row, or takes over a row whose TTL has lapsed. A
            // live row fails the WHERE and no row is affected.
            acquire: format!(
                "INSERT INTO {table} AS t (store_id, lock_key, token, expires_at) \
                 VALUES ($1, $2, $3, NOW() + $4::bigint * INTERVAL '1 millisecond') \
                 ON CONFLICT (store_id, lock_key) DO UPDATE \
                 SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at \
                 WHERE t.expires_at <= NOW()"
            ),
            release: format!(
                "DELETE FROM {table} \
                 WHERE store_id = $1 AND lock_key = $2 AND token = $3 AND expires_at > NOW()"
            ),
            refresh: format!(
                "UPDATE {table} \
                 SET expires_at = NOW() + $4::bigint * INTERVAL '1 millisecond' \
                 WHERE store_id = $1 AND lock_key = $2 AND token = $3 AND expires_at > NOW()"
            ),
            purge: format!("DELETE FROM {table} WHERE expires_at <= NOW()"),
        }
    }
}

/// PostgreSQL-backed implementation of [`LockStore`].
///
/// Acquisition is a single conditional upsert, so two clients racing for
/// the same key are serialized by the primary key and only one of them
/// affects a row.
pub struct PostgresLockStore {
    pool: PgPool,
    queries: Queries,
}

impl std::fmt::Debug for PostgresLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLockStore")
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl PostgresLockStore {
    /// Create a new `PostgresLockStore` from the provided configuration.
    ///
    /// Connects to `PostgreSQL`, creates the connection pool, and runs
    /// migrations to ensure the locks table exists.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] for a malformed URL or SSL
    /// setting, or [`LockError::StoreUnavailable`] if connecting or migrating
    /// fails.
    pub async fn new(config: PostgresConfig) -> Result<Self, LockError> {
        let connect_options = build_connect_options(&config)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| LockError::StoreUnavailable(e.to_string()))?;

        Self::from_pool(pool, &config).await
    }

    /// Create a `PostgresLockStore` from an existing pool.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::StoreUnavailable`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: &PostgresConfig) -> Result<Self, LockError> {
        migrations::run_migrations(&pool, config)
            .await
            .map_err(|e| LockError::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            pool,
            queries: Queries::for_table(&config.locks_table()),
        })
    }

    /// Delete every expired row. Returns how many were removed.
    ///
    /// Expired rows never block acquisition; this only keeps the table small.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::StoreUnavailable`] if the statement fails.
    pub async fn purge_expired(&self) -> Result<u64, LockError> {
        let result = sqlx::query(&self.queries.purge)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        let purged = result.rows_affected();
        if purged > 0 {
            debug!(purged, "purged expired lock rows");
        }
        Ok(purged)
    }
}

fn unavailable(e: sqlx::Error) -> LockError {
    LockError::StoreUnavailable(e.to_string())
}

/// Longest TTL the store accepts; `NOW()` plus anything near `i64::MAX`
/// milliseconds overflows `TIMESTAMPTZ`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// TTL in whole milliseconds, rounded up so a sub-millisecond TTL does not
/// write an already expired row.
fn ttl_millis(ttl: Duration) -> Result<i64, LockError> {
    if ttl > MAX_TTL {
        return Err(LockError::InvalidConfiguration(format!(
            "lock ttl {ttl:?} exceeds the supported maximum of {MAX_TTL:?}"
        )));
    }
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    Ok(i64::try_from(millis).unwrap_or(i64::MAX).max(1))
}

#[async_trait]
impl LockStore for PostgresLockStore {
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let result = sqlx::query(&self.queries.acquire)
            .bind(key.store_id())
            .bind(key.key())
            .bind(token.as_str())
            .bind(ttl_millis(ttl)?)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        let acquired = result.rows_affected() > 0;
        debug!(lock.key = %key, acquired, "postgres lock acquire");
        Ok(acquired)
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError> {
        let result = sqlx::query(&self.queries.release)
            .bind(key.store_id())
            .bind(key.key())
            .bind(token.as_str())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }

    async fn refresh(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let result = sqlx::query(&self.queries.refresh)
            .bind(key.store_id())
            .bind(key.key())
            .bind(token.as_str())
            .bind(ttl_millis(ttl)?)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_target_configured_table() {
        let queries = Queries::for_table("locking.app_locks");
        for sql in [
            &queries.acquire,
            &queries.release,
            &queries.refresh,
            &queries.purge,
        ] {
            assert!(sql.contains("locking.app_locks"), "{sql}");
        }
        assert!(queries.acquire.contains("WHERE t.expires_at <= NOW()"));
        assert!(queries.release.contains("token = $3"));
    }

    #[test]
    fn unknown_ssl_mode_is_rejected() {
        let config = PostgresConfig {
            ssl_mode: Some("sometimes".into()),
            ..PostgresConfig::default()
        };
        let err = build_connect_options(&config).unwrap_err();
        assert!(matches!(err, LockError::InvalidConfiguration(_)));
    }

    #[test]
    fn malformed_url_is_rejected() {
        let config = PostgresConfig::new("not a url");
        assert!(matches!(
            build_connect_options(&config),
            Err(LockError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn ttl_rounds_up_to_whole_milliseconds() {
        assert_eq!(ttl_millis(Duration::from_millis(1500)).unwrap(), 1500);
        assert_eq!(ttl_millis(Duration::from_micros(10)).unwrap(), 1);
        assert_eq!(ttl_millis(Duration::from_micros(1500)).unwrap(), 2);
    }

    #[test]
    fn oversized_ttl_is_a_configuration_error() {
        assert!(ttl_millis(MAX_TTL).is_ok());
        assert!(matches!(
            ttl_millis(Duration::MAX),
            Err(LockError::InvalidConfiguration(_))
        ));
    }
}
