use std::time::Duration;

use tokio::time::Instant;

use crate::key::LockKey;
use crate::token::LockToken;

/// A successfully acquired lock, held by the caller.
///
/// The handle is plain data: dropping it does not release anything, and the
/// store-side record lapses on its own at `expires_at`. Release goes through
/// [`LockCoordinator::release`](crate::LockCoordinator::release).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: LockKey,
    token: LockToken,
    expires_at: Instant,
    expiry_known: bool,
    manually_released: bool,
}

impl LockHandle {
    /// Rebuild a handle from its parts when the expiry is known.
    pub fn from_parts(
        key: LockKey,
        token: LockToken,
        expires_at: Instant,
        manually_released: bool,
    ) -> Self {
        Self {
            key,
            token,
            expires_at,
            expiry_known: true,
            manually_released,
        }
    }

    /// Rebuild a handle from a token persisted by another process, e.g. to
    /// release a manually released lock. Its expiry is unknown, so it is
    /// treated as already expired locally until a refresh succeeds.
    pub fn from_token(
        key: LockKey,
        token: LockToken,
        now: Instant,
        manually_released: bool,
    ) -> Self {
        Self {
            key,
            token,
            expires_at: now,
            expiry_known: false,
            manually_released,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn store_id(&self) -> &str {
        self.key.store_id()
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Deadline after which the store no longer honors this lock.
    ///
    /// Computed from the moment the winning attempt started, so it never
    /// overstates how long the store keeps the record.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Whether the lock is excluded from scoped automatic release.
    pub fn is_manually_released(&self) -> bool {
        self.manually_released
    }

    /// False for handles rebuilt with [`from_token`](Self::from_token) until
    /// a refresh sets a real expiry.
    pub fn expiry_known(&self) -> bool {
        self.expiry_known
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    pub(crate) fn set_expires_at(&mut self, expires_at: Instant) {
        self.expires_at = expires_at;
        self.expiry_known = true;
    }
}
