use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LockError;
use crate::interval::Interval;
use crate::key::LockKey;
use crate::retry::Backoff;

/// Caller-facing lock settings, typically loaded from a configuration file.
///
/// Every field has a default, so an empty table is a valid configuration:
///
/// ```
/// use std::time::Duration;
/// use tollgate_lock::LockOptions;
///
/// let options = LockOptions::default();
/// assert_eq!(options.store_id, "lock");
/// assert_eq!(options.expiration.as_duration(), Duration::from_secs(10));
/// assert_eq!(options.timeout.as_duration(), Duration::from_secs(1));
/// assert_eq!(options.retry.as_duration(), Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Logical store namespace: a lock table, collection, or key space.
    pub store_id: String,
    /// Prefix prepended to every resolved key.
    pub prefix: String,
    /// How long a stored lock stays valid without being released.
    pub expiration: Interval,
    /// How long an acquisition keeps retrying. Zero means a single attempt.
    pub timeout: Interval,
    /// Pause between contended attempts.
    pub retry: Interval,
    /// Shape of the pause across attempts.
    pub backoff: Backoff,
    /// Leave the lock held after the protected operation returns; the caller
    /// releases it explicitly or lets it expire.
    pub manually_released: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            store_id: String::from("lock"),
            prefix: String::from("lock:"),
            expiration: Interval::seconds(10),
            timeout: Interval::seconds(1),
            retry: Interval::millis(50),
            backoff: Backoff::Constant,
            manually_released: false,
        }
    }
}

impl LockOptions {
    /// Build the store-scoped key for a resolved lock identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if the resolved identifier
    /// or the store id is empty.
    pub fn key_for(&self, resolved: &str) -> Result<LockKey, LockError> {
        if resolved.is_empty() {
            return Err(LockError::InvalidConfiguration(
                "resolved lock key must not be empty".into(),
            ));
        }
        LockKey::new(self.store_id.clone(), format!("{}{resolved}", self.prefix))
    }

    /// Build a validated acquisition request for a resolved lock identifier.
    pub fn request(&self, resolved: &str) -> Result<LockRequest, LockError> {
        let request = LockRequest {
            key: self.key_for(resolved)?,
            expiration: self.expiration.as_duration(),
            timeout: self.timeout.as_duration(),
            retry: self.retry.as_duration(),
            backoff: self.backoff.clone(),
            manually_released: self.manually_released,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Fully resolved parameters for one acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRequest {
    pub key: LockKey,
    pub expiration: Duration,
    pub timeout: Duration,
    pub retry: Duration,
    pub backoff: Backoff,
    pub manually_released: bool,
}

impl LockRequest {
    /// Request with the default timings for `key`.
    pub fn new(key: LockKey) -> Self {
        let defaults = LockOptions::default();
        Self {
            key,
            expiration: defaults.expiration.as_duration(),
            timeout: defaults.timeout.as_duration(),
            retry: defaults.retry.as_duration(),
            backoff: defaults.backoff,
            manually_released: defaults.manually_released,
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn manually_released(mut self, manually_released: bool) -> Self {
        self.manually_released = manually_released;
        self
    }

    /// Check the timing invariants.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidConfiguration`] if the expiration is zero,
    /// if the retry interval is zero while a non-zero timeout allows
    /// retries, or if the backoff could produce a zero pause.
    pub fn validate(&self) -> Result<(), LockError> {
        if self.expiration.is_zero() {
            return Err(LockError::InvalidConfiguration(format!(
                "expiration for lock {} must be positive",
                self.key
            )));
        }
        if !self.timeout.is_zero() && self.retry.is_zero() {
            return Err(LockError::InvalidConfiguration(format!(
                "retry interval for lock {} must be positive when a timeout is set",
                self.key
            )));
        }
        self.backoff.validate().map_err(|reason| {
            LockError::InvalidConfiguration(format!("lock {}: {reason}", self.key))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::TimeUnit;

    #[test]
    fn key_applies_prefix_and_store() {
        let options = LockOptions::default();
        let key = options.key_for("job:42").unwrap();
        assert_eq!(key.store_id(), "lock");
        assert_eq!(key.key(), "lock:job:42");
    }

    #[test]
    fn empty_resolved_key_is_rejected() {
        let options = LockOptions {
            prefix: String::new(),
            ..LockOptions::default()
        };
        assert!(matches!(
            options.key_for(""),
            Err(LockError::InvalidConfiguration(_))
        ));
        // A prefix alone does not make an empty resolution valid.
        assert!(LockOptions::default().key_for("").is_err());
    }

    #[test]
    fn request_carries_durations() {
        let request = LockOptions::default().request("job").unwrap();
        assert_eq!(request.expiration, Duration::from_secs(10));
        assert_eq!(request.timeout, Duration::from_secs(1));
        assert_eq!(request.retry, Duration::from_millis(50));
        assert!(!request.manually_released);
    }

    #[test]
    fn zero_expiration_is_invalid() {
        let options = LockOptions {
            expiration: Interval::seconds(0),
            ..LockOptions::default()
        };
        assert!(matches!(
            options.request("job"),
            Err(LockError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_retry_only_allowed_without_timeout() {
        let key = LockKey::new("lock", "job").unwrap();
        let retrying = LockRequest::new(key.clone()).with_retry(Duration::ZERO);
        assert!(retrying.validate().is_err());

        let single_shot = LockRequest::new(key)
            .with_retry(Duration::ZERO)
            .with_timeout(Duration::ZERO);
        assert!(single_shot.validate().is_ok());
    }

    #[test]
    fn zero_pause_backoff_is_invalid() {
        let key = LockKey::new("lock", "job").unwrap();
        let zero_cap = LockRequest::new(key.clone()).with_backoff(Backoff::Exponential {
            max: Interval::millis(0),
            multiplier: 2.0,
            jitter: false,
        });
        assert!(matches!(
            zero_cap.validate(),
            Err(LockError::InvalidConfiguration(_))
        ));

        let options: LockOptions = toml::from_str(
            r#"
            [backoff]
            type = "exponential"
            max = { value = 1 }
            multiplier = 0.0
            "#,
        )
        .unwrap();
        assert!(matches!(
            options.request("job"),
            Err(LockError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn deserializes_partial_table() {
        let options: LockOptions = toml::from_str(
            r#"
            store_id = "jobs"
            manually_released = true
            timeout = { value = 200, unit = "milliseconds" }
            "#,
        )
        .unwrap();
        assert_eq!(options.store_id, "jobs");
        assert!(options.manually_released);
        assert_eq!(options.timeout, Interval::new(200, TimeUnit::Milliseconds));
        assert_eq!(options.prefix, "lock:");
        assert_eq!(options.expiration, Interval::seconds(10));
    }
}
