use std::time::Duration;

/// Configuration for the Redis lock store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`).
    pub url: String,

    /// Key prefix applied to every lock key to avoid collisions.
    pub prefix: String,

    /// Number of connections in the `deadpool-redis` pool.
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection.
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            prefix: String::from("tollgate"),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Configuration for `url` with default pool settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = RedisConfig::default();
        assert_eq!(cfg.url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.prefix, "tollgate");
        assert_eq!(cfg.pool_size, 10);
        assert_eq!(cfg.connection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn new_keeps_pool_defaults() {
        let cfg = RedisConfig::new("redis://cache:6380/2");
        assert_eq!(cfg.url, "redis://cache:6380/2");
        assert_eq!(cfg.pool_size, 10);
    }
}
