use std::time::Duration;

use async_trait::async_trait;

use crate::error::LockError;
use crate::key::LockKey;
use crate::token::LockToken;

/// Atomic primitives a backend must provide to host locks.
///
/// Each stored record is `(key, token, expires_at)`. Both required
/// operations must be a single conditional write against the backend; a
/// read followed by a separate write lets two contenders win the same key.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Backend failures are reported as [`LockError::StoreUnavailable`].
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Write `(key, token, now + ttl)` if no live record exists for `key`.
    ///
    /// Returns `true` if the record was written (the key was absent or its
    /// previous record had expired), `false` if another live record exists,
    /// in which case nothing is changed.
    async fn try_acquire(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Delete the record for `key` if it is live and owned by `token`.
    ///
    /// Returns `true` if a record was deleted, `false` if it had expired,
    /// was never written, or belongs to another token.
    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<bool, LockError>;

    /// Push the expiry of a live record owned by `token` to `now + ttl`.
    ///
    /// Renewal is optional. The default implementation reports that nothing
    /// was refreshed.
    async fn refresh(
        &self,
        key: &LockKey,
        token: &LockToken,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let _ = (key, token, ttl);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_lock_store(_: &dyn LockStore) {}
}
